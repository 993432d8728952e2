// src/main.rs
// Command-line front end for SPB Reader

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process;

use spb_reader::Capture;

fn print_usage() {
    eprintln!("Usage: spb_reader <command> <capture_file> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  info <file>                         Display capture information");
    eprintln!("  convert <file> <output> [delim]     Convert capture to delimited text");
    eprintln!("  extract <file> <channel>            Extract one channel to stdout");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --no-header    Omit the header row when converting");
    eprintln!();
    eprintln!("When <file> or <output> is -, standard input/output is used.");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  spb_reader info capture.bin");
    eprintln!("  spb_reader convert capture.bin output.tsv");
    eprintln!("  spb_reader convert capture.bin output.csv ,");
    eprintln!("  spb_reader extract capture.bin CH1 > ch1.txt");
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        print_usage();
        process::exit(1);
    }

    let command = &args[1];
    let input_file = &args[2];

    let capture = match load_capture(input_file) {
        Ok(capture) => capture,
        Err(e) => {
            eprintln!("Error reading capture '{}': {}", input_file, e);
            process::exit(1);
        }
    };

    match command.as_str() {
        "info" => {
            print_capture_info(&capture, input_file);
        }

        "convert" => {
            if args.len() < 4 {
                eprintln!("Error: Missing output file argument");
                print_usage();
                process::exit(1);
            }

            let output_file = &args[3];
            let mut delim = "\t";
            let mut include_header = true;
            for extra in &args[4..] {
                match extra.as_str() {
                    "--no-header" => include_header = false,
                    other => delim = other,
                }
            }

            if let Err(e) = write_converted(&capture, output_file, delim, include_header) {
                eprintln!("Error writing '{}': {}", output_file, e);
                process::exit(1);
            }

            if output_file != "-" {
                println!("Successfully converted {} to {}", input_file, output_file);
                println!("Channels written: {}", capture.channel_count());
            }
        }

        "extract" => {
            if args.len() < 4 {
                eprintln!("Error: Missing channel argument");
                print_usage();
                process::exit(1);
            }

            let target = &args[3];
            let channel = capture
                .channels()
                .iter()
                .find(|channel| channel.name == *target)
                .or_else(|| {
                    target
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| capture.channels().get(index))
                });

            match channel {
                Some(channel) => {
                    println!("# Channel {} from {}", channel.name, input_file);
                    println!("# Time (us), Voltage (mV)");

                    for index in 0..channel.sample_count() {
                        if let Some(millivolts) = channel.voltage_at(index) {
                            println!(
                                "{:.6e}, {:.6e}",
                                index as f32 * channel.time_mul,
                                millivolts
                            );
                        }
                    }
                }
                None => {
                    eprintln!(
                        "Error: Channel '{}' not found (capture has {} channels)",
                        target,
                        capture.channel_count()
                    );
                    process::exit(1);
                }
            }
        }

        _ => {
            eprintln!("Error: Unknown command '{}'", command);
            print_usage();
            process::exit(1);
        }
    }
}

fn load_capture(path: &str) -> spb_reader::Result<Capture> {
    if path == "-" {
        Capture::from_reader(io::stdin().lock())
    } else {
        Capture::load_file(path)
    }
}

fn write_converted(
    capture: &Capture,
    path: &str,
    delim: &str,
    include_header: bool,
) -> spb_reader::Result<()> {
    if path == "-" {
        let stdout = io::stdout();
        let mut writer = BufWriter::new(stdout.lock());
        capture.write_delim(delim, "\n", include_header, &mut writer)?;
        writer.flush()?;
    } else {
        let mut writer = BufWriter::new(File::create(path)?);
        capture.write_delim(delim, "\n", include_header, &mut writer)?;
        writer.flush()?;
    }
    Ok(())
}

fn print_capture_info(capture: &Capture, input_file: &str) {
    println!("SPB Capture Information");
    println!("=======================");
    println!();
    println!("File: {}", input_file);
    println!("Header: {}", capture.magic());
    if let Some(model) = capture.model() {
        println!("Model selector: {}", model);
    }
    println!("Channels: {}", capture.channel_count());

    for channel in capture.channels() {
        println!();
        println!("Channel {}:", channel.name);
        println!("  Samples: {}", channel.sample_count());
        println!("  Shown on screen: {}", channel.sample_screen);
        if channel.slow_scan_pos != 0 {
            println!("  Slow-scan position: {}", channel.slow_scan_pos);
        }
        println!(
            "  Vertical: {} V/div, {}x probe, {} mV/count",
            channel.volts_div, channel.attenuation, channel.volts_mul
        );
        println!(
            "  Horizontal: {} s/div, {} us/sample",
            channel.time_div, channel.time_mul
        );
        println!("  Zero offset: {} (0.04 div steps)", channel.zero_point);
        println!("  Frequency: {} Hz", channel.frequency);
        println!("  Period: {} us", channel.period);

        if !channel.samples.is_empty() {
            let mut min_mv = f32::INFINITY;
            let mut max_mv = f32::NEG_INFINITY;
            for index in 0..channel.sample_count() {
                if let Some(millivolts) = channel.voltage_at(index) {
                    min_mv = min_mv.min(millivolts);
                    max_mv = max_mv.max(millivolts);
                }
            }
            println!(
                "  Data range: {:.3} mV to {:.3} mV (peak-to-peak {:.3} mV)",
                min_mv,
                max_mv,
                max_mv - min_mv
            );
        }
    }
}
