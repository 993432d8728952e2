// SPB capture decoder module

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::tables;

/// Allocation ceiling for channel records in one capture.
pub const MAX_CHANNELS: usize = 6;

/// Upper bound on a single channel's sample count, covering the deepest
/// record memory across supported models. The count field comes from the
/// stream and is not trusted beyond this.
pub const MAX_SAMPLE_COUNT: i32 = 10_000_000;

const MAGIC: &[u8; 3] = b"SPB";
const MAGIC_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum SpbError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("not an SPB capture (magic {0:?})")]
    BadMagic(String),

    #[error("unsupported oscilloscope model '{0}'")]
    UnsupportedModel(char),

    #[error("unsupported capture: negative declared length {0}")]
    NegativeLength(i32),

    #[error("unsupported record kind {0:?}")]
    UnsupportedRecord(String),

    #[error("{table} index {index} out of table range")]
    ScaleIndexOutOfRange { table: &'static str, index: i32 },

    #[error("sample count {0} out of range")]
    SampleCountOutOfRange(i32),

    #[error("truncated stream: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("stream declares more than {MAX_CHANNELS} channel records")]
    TooManyChannels,

    #[error("channel record at offset {0} did not advance the stream")]
    StalledStream(usize),

    #[error("failed to allocate sample buffer")]
    OutOfMemory,

    #[error("capture has no channels")]
    EmptyCapture,
}

pub type Result<T> = std::result::Result<T, SpbError>;

/// Cursor over a fully buffered capture stream.
///
/// Positions are measured from the start of the stream; the declared
/// payload length in the file header is compared against this same origin.
struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        SliceReader { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(SpbError::Truncated {
                offset: self.pos,
                needed: len,
            });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.take(4)?
            .try_into()
            .map(i32::from_le_bytes)
            .map_err(|_| SpbError::Truncated {
                offset: self.pos,
                needed: 4,
            })
    }

    fn read_f32(&mut self) -> Result<f32> {
        self.take(4)?
            .try_into()
            .map(f32::from_le_bytes)
            .map_err(|_| SpbError::Truncated {
                offset: self.pos,
                needed: 4,
            })
    }
}

/// Raw channel record metadata as it appears on the wire, ahead of the
/// sample array: a 3-byte name plus twelve little-endian 4-byte fields,
/// 51 bytes in total.
struct ChannelHeader {
    name: [u8; 3],      // not null-terminated
    length: i32,        // sample bytes + 48, informational only
    sample_count: i32,
    sample_screen: i32, // differs from sample_count in slow-scan mode
    slow_scan_pos: i32,
    time_div: i32,      // sec/div table index
    zero_point: i32,    // 1 = 0.04 divisions
    volts_div: i32,     // volts/div table index
    attenuation: i32,   // attenuation table index
    time_mul: f32,      // us between samples
    frequency: f32,     // Hz
    period: f32,        // us
    volts_mul: f32,     // mV per count, attenuation not applied
}

impl ChannelHeader {
    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let name = reader.take(3)?.try_into().map_err(|_| SpbError::Truncated {
            offset: reader.position(),
            needed: 3,
        })?;
        Ok(ChannelHeader {
            name,
            length: reader.read_i32()?,
            sample_count: reader.read_i32()?,
            sample_screen: reader.read_i32()?,
            slow_scan_pos: reader.read_i32()?,
            time_div: reader.read_i32()?,
            zero_point: reader.read_i32()?,
            volts_div: reader.read_i32()?,
            attenuation: reader.read_i32()?,
            time_mul: reader.read_f32()?,
            frequency: reader.read_f32()?,
            period: reader.read_f32()?,
            volts_mul: reader.read_f32()?,
        })
    }
}

/// One calibrated waveform trace.
///
/// Samples are stored raw; sample `i` measures
/// `samples[i] * volts_mul * attenuation` millivolts at `i * time_mul`
/// microseconds into the record.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel name (CH1..CH4, or CHA..CHD from a wave save).
    pub name: String,
    /// Probe attenuation factor.
    pub attenuation: f32,
    /// Millivolts per raw count, attenuation not applied.
    pub volts_mul: f32,
    /// Vertical scale in volts per division.
    pub volts_div: f32,
    /// Microseconds between samples.
    pub time_mul: f32,
    /// Horizontal scale in seconds per division.
    pub time_div: f32,
    /// Measured frequency in Hz.
    pub frequency: f32,
    /// Measured period in microseconds.
    pub period: f32,
    /// Samples shown on screen; diverges from the capture length in
    /// slow-scan mode.
    pub sample_screen: i32,
    /// Relative on-screen sample position while slow scanning.
    pub slow_scan_pos: i32,
    /// Vertical offset from the zero level, in 0.04-division steps.
    pub zero_point: i32,
    /// Raw sample values.
    pub samples: Vec<i16>,
}

impl Channel {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Calibrated voltage of one sample in millivolts, or `None` past the
    /// end of the record.
    pub fn voltage_at(&self, index: usize) -> Option<f32> {
        self.samples
            .get(index)
            .map(|&raw| raw as f32 * self.volts_mul * self.attenuation)
    }
}

/// One decoded multi-channel acquisition.
///
/// A capture is only ever produced whole by one of the decode entry points;
/// a failed decode drops everything it had read and returns the error.
#[derive(Debug)]
pub struct Capture {
    magic: String,
    channels: Vec<Channel>,
}

impl Capture {
    /// Decode a capture from a byte buffer.
    pub fn from_bytes(buf: &[u8]) -> Result<Capture> {
        decode_capture(buf)
    }

    /// Decode a capture from any byte source. The source is read to its
    /// end; an interrupted source surfaces as an IO error.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Capture> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Decode a capture file as written by the acquisition tool.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Capture> {
        Self::from_reader(File::open(path)?)
    }

    /// The 6-character file header, retained verbatim.
    pub fn magic(&self) -> &str {
        &self.magic
    }

    /// The model selector character (4th byte of the header).
    pub fn model(&self) -> Option<char> {
        self.magic.chars().nth(3)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Decoded channels in wire order. The first channel's time base is
    /// the canonical time axis of the capture.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Write the capture as a delimited text table.
    ///
    /// Rows run to the longest channel; a channel past its own end emits a
    /// single blank field, which marks missing data as opposed to a real
    /// zero reading. The time column always uses the first channel's
    /// sample interval.
    pub fn write_delim<W: Write>(
        &self,
        delim: &str,
        line_end: &str,
        include_header: bool,
        sink: &mut W,
    ) -> Result<()> {
        if self.channels.is_empty() {
            return Err(SpbError::EmptyCapture);
        }

        let max_samples = self
            .channels
            .iter()
            .map(Channel::sample_count)
            .max()
            .unwrap_or(0);
        let last = self.channels.len() - 1;

        if include_header {
            write!(sink, "Time (us){}", delim)?;
            for (idx, channel) in self.channels.iter().enumerate() {
                let sep = if idx < last { delim } else { line_end };
                write!(sink, "{} (mV){}", channel.name, sep)?;
            }
        }

        for sample_idx in 0..max_samples {
            let time = sample_idx as f32 * self.channels[0].time_mul;
            write!(sink, "{}{}", time, delim)?;
            for (idx, channel) in self.channels.iter().enumerate() {
                let sep = if idx < last { delim } else { line_end };
                match channel.voltage_at(sample_idx) {
                    Some(millivolts) => write!(sink, "{}{}", millivolts, sep)?,
                    None => write!(sink, " {}", sep)?,
                }
            }
        }

        Ok(())
    }
}

/// Channel names arrive as 3 raw bytes with no terminator; trailing NULs
/// and spaces are padding.
fn channel_name(raw: &[u8; 3]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(|c| c == '\0' || c == ' ')
        .to_string()
}

fn scale_lookup(table: &[f32], index: i32, name: &'static str) -> Result<f32> {
    usize::try_from(index)
        .ok()
        .and_then(|idx| table.get(idx))
        .copied()
        .ok_or(SpbError::ScaleIndexOutOfRange { table: name, index })
}

fn decode_capture(buf: &[u8]) -> Result<Capture> {
    let mut reader = SliceReader::new(buf);

    let magic_bytes = reader.take(MAGIC_LEN)?;
    if &magic_bytes[..3] != MAGIC {
        return Err(SpbError::BadMagic(
            String::from_utf8_lossy(magic_bytes).into_owned(),
        ));
    }
    let magic = String::from_utf8_lossy(magic_bytes).into_owned();

    // The 4th magic character selects the calibration table variant.
    let model = magic_bytes[3] as char;
    let attenuation_table = tables::attenuation_table();
    let volt_table = tables::volt_table();
    let time_table =
        tables::time_table(model).ok_or(SpbError::UnsupportedModel(model))?;

    // Custom models declare a negative length.
    let declared_length = reader.read_i32()?;
    if declared_length < 0 {
        return Err(SpbError::NegativeLength(declared_length));
    }
    let declared_length = declared_length as usize;

    let mut channels: Vec<Channel> = Vec::new();

    // The declared length is authoritative: records are consumed until the
    // stream position reaches it. Each record also carries its own length
    // field, but the device does not keep it consistent with the sample
    // count, so it is never used for framing.
    while reader.position() < declared_length {
        if channels.len() == MAX_CHANNELS {
            return Err(SpbError::TooManyChannels);
        }
        let record_start = reader.position();

        let header = ChannelHeader::parse(&mut reader)?;
        let name = channel_name(&header.name);

        // FFT traces use a different payload layout.
        if name.starts_with("Cf") {
            return Err(SpbError::UnsupportedRecord(name));
        }

        if header.sample_count < 0 || header.sample_count > MAX_SAMPLE_COUNT {
            return Err(SpbError::SampleCountOutOfRange(header.sample_count));
        }
        let sample_count = header.sample_count as usize;

        let attenuation =
            scale_lookup(attenuation_table, header.attenuation, "attenuation")?;
        let volts_div = scale_lookup(volt_table, header.volts_div, "volts/div")?;
        let time_div = scale_lookup(time_table, header.time_div, "time/div")?;

        let mut samples: Vec<i16> = Vec::new();
        samples
            .try_reserve_exact(sample_count)
            .map_err(|_| SpbError::OutOfMemory)?;
        for pair in reader.take(sample_count * 2)?.chunks_exact(2) {
            samples.push(i16::from_le_bytes([pair[0], pair[1]]));
        }

        log::debug!(
            "channel {}: {} samples, {} declared record bytes",
            name,
            sample_count,
            header.length
        );

        channels.push(Channel {
            name,
            attenuation,
            volts_mul: header.volts_mul,
            volts_div,
            time_mul: header.time_mul,
            time_div,
            frequency: header.frequency,
            period: header.period,
            sample_screen: header.sample_screen,
            slow_scan_pos: header.slow_scan_pos,
            zero_point: header.zero_point,
            samples,
        });

        // A record always moves the cursor; anything else is a framing
        // fault, not a reason to spin.
        if reader.position() <= record_start {
            return Err(SpbError::StalledStream(record_start));
        }
    }

    log::debug!(
        "decoded {} channels from {} byte stream",
        channels.len(),
        buf.len()
    );

    Ok(Capture { magic, channels })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_channel(
        payload: &mut Vec<u8>,
        name: &[u8; 3],
        time_div: i32,
        volts_div: i32,
        attenuation: i32,
        time_mul: f32,
        volts_mul: f32,
        samples: &[i16],
    ) {
        payload.extend_from_slice(name);
        payload.extend_from_slice(&((samples.len() * 2 + 48) as i32).to_le_bytes());
        payload.extend_from_slice(&(samples.len() as i32).to_le_bytes());
        payload.extend_from_slice(&(samples.len() as i32).to_le_bytes()); // sample_screen
        payload.extend_from_slice(&0i32.to_le_bytes()); // slow_scan_pos
        payload.extend_from_slice(&time_div.to_le_bytes());
        payload.extend_from_slice(&25i32.to_le_bytes()); // zero_point
        payload.extend_from_slice(&volts_div.to_le_bytes());
        payload.extend_from_slice(&attenuation.to_le_bytes());
        payload.extend_from_slice(&time_mul.to_le_bytes());
        payload.extend_from_slice(&50.0f32.to_le_bytes()); // frequency
        payload.extend_from_slice(&20_000.0f32.to_le_bytes()); // period
        payload.extend_from_slice(&volts_mul.to_le_bytes());
        for sample in samples {
            payload.extend_from_slice(&sample.to_le_bytes());
        }
    }

    fn build_stream(model: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"SPB");
        buf.push(model);
        buf.extend_from_slice(b"01");
        buf.extend_from_slice(&((10 + payload.len()) as i32).to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_decode_single_channel() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 2, 4.0, 1.0, &[-100, 0, 100]);
        let stream = build_stream(b'M', &payload);

        let capture = Capture::from_bytes(&stream).unwrap();
        assert_eq!(capture.magic(), "SPBM01");
        assert_eq!(capture.model(), Some('M'));
        assert_eq!(capture.channel_count(), 1);

        let channel = &capture.channels()[0];
        assert_eq!(channel.name, "CH1");
        assert_eq!(channel.attenuation, 100.0);
        assert_eq!(channel.volts_div, 1.0);
        assert_eq!(channel.time_div, 1.0e-9); // model M, index 0
        assert_eq!(channel.time_mul, 4.0);
        assert_eq!(channel.frequency, 50.0);
        assert_eq!(channel.period, 20_000.0);
        assert_eq!(channel.sample_screen, 3);
        assert_eq!(channel.zero_point, 25);
        assert_eq!(channel.samples, vec![-100, 0, 100]);
    }

    #[test]
    fn test_decode_preserves_wire_order() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 3, 8, 0, 1.0, 1.0, &[1, 2]);
        push_channel(&mut payload, b"CH2", 3, 9, 0, 1.0, 2.0, &[3, 4]);
        let stream = build_stream(b'V', &payload);

        let capture = Capture::from_bytes(&stream).unwrap();
        assert_eq!(capture.channel_count(), 2);
        assert_eq!(capture.channels()[0].name, "CH1");
        assert_eq!(capture.channels()[1].name, "CH2");
        // 1-2.5-5 progression offset to start at 5ns, index 3
        assert_eq!(capture.channels()[0].time_div, 5.0e-8);
    }

    #[test]
    fn test_trailing_bytes_beyond_declared_length_ignored() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[7]);
        let mut stream = build_stream(b'M', &payload);
        stream.extend_from_slice(&[0xAB; 64]);

        let capture = Capture::from_bytes(&stream).unwrap();
        assert_eq!(capture.channel_count(), 1);
    }

    #[test]
    fn test_bad_magic() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[1]);
        let mut stream = build_stream(b'M', &payload);
        stream[0..3].copy_from_slice(b"LZB");

        let result = Capture::from_bytes(&stream);
        assert!(matches!(result, Err(SpbError::BadMagic(_))));
    }

    #[test]
    fn test_unknown_model_rejected_regardless_of_payload() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[1]);
        let stream = build_stream(b'Z', &payload);

        let result = Capture::from_bytes(&stream);
        assert!(matches!(result, Err(SpbError::UnsupportedModel('Z'))));
    }

    #[test]
    fn test_negative_declared_length() {
        let mut stream = Vec::new();
        stream.extend_from_slice(b"SPBM01");
        stream.extend_from_slice(&(-1i32).to_le_bytes());

        let result = Capture::from_bytes(&stream);
        assert!(matches!(result, Err(SpbError::NegativeLength(-1))));
    }

    #[test]
    fn test_truncated_header() {
        let result = Capture::from_bytes(b"SPBM");
        assert!(matches!(result, Err(SpbError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_record_metadata() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[1, 2, 3]);
        let stream = build_stream(b'M', &payload);

        // Cut inside the fixed metadata fields.
        let result = Capture::from_bytes(&stream[..30]);
        assert!(matches!(result, Err(SpbError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_sample_array() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[1, 2, 3, 4]);
        let stream = build_stream(b'M', &payload);

        // Cut inside the sample array.
        let result = Capture::from_bytes(&stream[..stream.len() - 3]);
        assert!(matches!(result, Err(SpbError::Truncated { .. })));
    }

    #[test]
    fn test_scale_index_out_of_range() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 99, 0, 1.0, 1.0, &[1]);
        let stream = build_stream(b'M', &payload);

        let result = Capture::from_bytes(&stream);
        assert!(matches!(
            result,
            Err(SpbError::ScaleIndexOutOfRange {
                table: "volts/div",
                index: 99
            })
        ));
    }

    #[test]
    fn test_sample_count_bounds() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[]);
        // Overwrite sample_count with a negative value.
        payload[7..11].copy_from_slice(&(-5i32).to_le_bytes());
        let stream = build_stream(b'M', &payload);

        let result = Capture::from_bytes(&stream);
        assert!(matches!(result, Err(SpbError::SampleCountOutOfRange(-5))));

        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[]);
        payload[7..11].copy_from_slice(&(MAX_SAMPLE_COUNT + 1).to_le_bytes());
        let stream = build_stream(b'M', &payload);

        let result = Capture::from_bytes(&stream);
        assert!(matches!(result, Err(SpbError::SampleCountOutOfRange(_))));
    }

    #[test]
    fn test_channel_ceiling() {
        let mut payload = Vec::new();
        for _ in 0..MAX_CHANNELS + 1 {
            push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[1]);
        }
        let stream = build_stream(b'M', &payload);

        let result = Capture::from_bytes(&stream);
        assert!(matches!(result, Err(SpbError::TooManyChannels)));
    }

    #[test]
    fn test_fft_record_rejected() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"Cf1", 0, 8, 0, 1.0, 1.0, &[1]);
        let stream = build_stream(b'M', &payload);

        let result = Capture::from_bytes(&stream);
        assert!(matches!(result, Err(SpbError::UnsupportedRecord(_))));
    }

    #[test]
    fn test_name_padding_trimmed() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"C1\0", 0, 8, 0, 1.0, 1.0, &[1]);
        let stream = build_stream(b'M', &payload);

        let capture = Capture::from_bytes(&stream).unwrap();
        assert_eq!(capture.channels()[0].name, "C1");
    }

    #[test]
    fn test_write_delim_calibration() {
        // Attenuation index 2 resolves to 100x; with 1 mV per count, a raw
        // sample of 100 reads as exactly 10000 mV.
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 2, 4.0, 1.0, &[100]);
        let stream = build_stream(b'M', &payload);
        let capture = Capture::from_bytes(&stream).unwrap();

        let mut out = Vec::new();
        capture.write_delim("\t", "\n", true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Time (us)\tCH1 (mV)");
        assert_eq!(lines[1], "0\t10000");
    }

    #[test]
    fn test_write_delim_time_column_uses_first_channel() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 2.5, 1.0, &[1, 1]);
        push_channel(&mut payload, b"CH2", 0, 8, 0, 100.0, 1.0, &[2, 2]);
        let stream = build_stream(b'M', &payload);
        let capture = Capture::from_bytes(&stream).unwrap();

        let mut out = Vec::new();
        capture.write_delim("\t", "\n", false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "0\t1\t2");
        assert_eq!(lines[1], "2.5\t1\t2");
    }

    #[test]
    fn test_write_delim_pads_short_channels_with_blank() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 0, 1.0, 1.0, &[5, 5, 5]);
        push_channel(&mut payload, b"CH2", 0, 8, 0, 1.0, 1.0, &[9]);
        let stream = build_stream(b'M', &payload);
        let capture = Capture::from_bytes(&stream).unwrap();

        let mut out = Vec::new();
        capture.write_delim(",", "\n", false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "0,5,9");
        // Missing data is a blank field, never a numeric zero.
        assert_eq!(lines[1], "1,5, ");
        assert_eq!(lines[2], "2,5, ");
    }

    #[test]
    fn test_write_delim_empty_capture() {
        let capture = Capture {
            magic: "SPBM01".to_string(),
            channels: Vec::new(),
        };

        let mut out = Vec::new();
        let result = capture.write_delim("\t", "\n", true, &mut out);
        assert!(matches!(result, Err(SpbError::EmptyCapture)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_voltage_at() {
        let mut payload = Vec::new();
        push_channel(&mut payload, b"CH1", 0, 8, 1, 1.0, 0.5, &[-20, 20]);
        let stream = build_stream(b'M', &payload);
        let capture = Capture::from_bytes(&stream).unwrap();

        let channel = &capture.channels()[0];
        assert_eq!(channel.voltage_at(0), Some(-100.0)); // -20 * 0.5 mV * 10x
        assert_eq!(channel.voltage_at(1), Some(100.0));
        assert_eq!(channel.voltage_at(2), None);
    }
}
