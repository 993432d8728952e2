// src/lib.rs
// SPB Reader Library - Public API

//! # SPB Reader
//!
//! A Rust library for decoding OWON SPB oscilloscope waveform captures.
//!
//! ## Features
//!
//! - Decode SPB capture streams from files, readers, or byte buffers
//! - Resolve model-specific attenuation, volts/division and time/division tables
//! - Calibrate raw samples into physical units
//! - Export captures as delimited text
//! - Proper error handling
//!
//! ## Example
//!
//! ```no_run
//! use spb_reader::Capture;
//!
//! let capture = Capture::load_file("capture.bin").expect("Failed to load capture");
//!
//! println!("Model: {:?}", capture.model());
//! for channel in capture.channels() {
//!     println!("{}: {} samples", channel.name, channel.sample_count());
//! }
//!
//! // Export as tab-separated values
//! let mut out = Vec::new();
//! capture
//!     .write_delim("\t", "\n", true, &mut out)
//!     .expect("Failed to serialize");
//! ```

mod spb_tools;
mod tables;

pub use spb_tools::{Capture, Channel, Result, SpbError, MAX_CHANNELS, MAX_SAMPLE_COUNT};
pub use tables::{attenuation_table, time_table, volt_table};
