//! PCM audio format descriptor.
//!
//! The ring buffers only need two numbers from a format: how many bytes make
//! up one frame of a channel stream, and how many channel streams there are.
//! Everything else here exists so callers can describe and log the audio they
//! push through.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChronoringError, Result};

/// Sample encoding of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 24-bit signed integer, packed in 3 bytes.
    I24,
    /// 32-bit signed integer.
    I32,
    /// 32-bit float normalized to [-1.0, 1.0].
    F32,
    /// 64-bit float normalized to [-1.0, 1.0].
    F64,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub fn byte_size(self) -> u32 {
        match self {
            SampleFormat::I8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::I32 => 4,
            SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::F32 | SampleFormat::F64)
    }

    pub fn is_signed_integer(self) -> bool {
        !self.is_float()
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::F32
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::I8 => "Int8",
            SampleFormat::I16 => "Int16",
            SampleFormat::I24 => "Int24",
            SampleFormat::I32 => "Int32",
            SampleFormat::F32 => "Float32",
            SampleFormat::F64 => "Float64",
        };
        f.write_str(name)
    }
}

/// Native-endian linear PCM format.
///
/// A non-interleaved format stores each channel in its own stream, so a
/// "frame" of one stream is a single sample. An interleaved format has a single
/// stream whose frames hold one sample per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    /// Frames per second.
    pub sample_rate: f64,
    /// Total channel count.
    pub channels: u32,
    pub interleaved: bool,
}

impl AudioFormat {
    pub fn new(sample_format: SampleFormat, sample_rate: f64, channels: u32, interleaved: bool) -> Self {
        Self {
            sample_format,
            sample_rate,
            channels,
            interleaved,
        }
    }

    /// Deinterleaved 32-bit float, the usual layout for processing graphs.
    pub fn standard(sample_rate: f64, channels: u32) -> Self {
        Self::new(SampleFormat::F32, sample_rate, channels, false)
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    /// Number of channels sharing one stream.
    pub fn interleaved_channel_count(&self) -> u32 {
        if self.interleaved {
            self.channels
        } else {
            1
        }
    }

    /// Number of independent buffers needed to hold one block of this format.
    pub fn channel_stream_count(&self) -> u32 {
        if self.interleaved {
            1
        } else {
            self.channels
        }
    }

    pub fn channel_count(&self) -> u32 {
        self.channels
    }

    pub fn bytes_per_sample(&self) -> u32 {
        self.sample_format.byte_size()
    }

    /// Bytes occupied by one frame within a single channel stream.
    pub fn bytes_per_frame(&self) -> u32 {
        self.bytes_per_sample() * self.interleaved_channel_count()
    }

    pub fn is_float(&self) -> bool {
        self.sample_format.is_float()
    }

    pub fn is_signed_integer(&self) -> bool {
        self.sample_format.is_signed_integer()
    }

    pub fn non_interleaved_equivalent(&self) -> Self {
        Self {
            interleaved: false,
            ..*self
        }
    }

    pub fn interleaved_equivalent(&self) -> Self {
        Self {
            interleaved: true,
            ..*self
        }
    }

    /// Checks the fields a ring buffer depends on.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(ChronoringError::InvalidFormat("channel count is zero"));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ChronoringError::InvalidFormat("sample rate must be positive"));
        }
        if self.bytes_per_frame() == 0 || self.channel_stream_count() == 0 {
            return Err(ChronoringError::InvalidFormat("frame layout is empty"));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::standard(48_000.0, 2)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch, {} Hz, {}, {}",
            self.channels,
            self.sample_rate,
            self.sample_format,
            if self.interleaved {
                "interleaved"
            } else {
                "deinterleaved"
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleaved_stereo_layout() {
        let format = AudioFormat::standard(44_100.0, 2);
        assert_eq!(format.channel_stream_count(), 2);
        assert_eq!(format.interleaved_channel_count(), 1);
        assert_eq!(format.bytes_per_frame(), 4);
    }

    #[test]
    fn interleaved_layout_packs_channels_into_one_stream() {
        let format = AudioFormat::new(SampleFormat::I24, 96_000.0, 6, true);
        assert_eq!(format.channel_stream_count(), 1);
        assert_eq!(format.interleaved_channel_count(), 6);
        assert_eq!(format.bytes_per_frame(), 18);
    }

    #[test]
    fn equivalents_flip_only_the_layout() {
        let format = AudioFormat::new(SampleFormat::I16, 22_050.0, 2, true);
        let planar = format.non_interleaved_equivalent();
        assert!(!planar.is_interleaved());
        assert_eq!(planar.bytes_per_frame(), 2);
        assert_eq!(planar.interleaved_equivalent(), format);
    }

    #[test]
    fn validate_rejects_empty_layouts() {
        assert!(AudioFormat::standard(48_000.0, 0).validate().is_err());
        assert!(AudioFormat::standard(0.0, 2).validate().is_err());
        assert!(AudioFormat::standard(f64::NAN, 2).validate().is_err());
        assert!(AudioFormat::default().validate().is_ok());
    }

    #[test]
    fn description_is_readable() {
        let format = AudioFormat::standard(48_000.0, 2);
        assert_eq!(format.to_string(), "2 ch, 48000 Hz, Float32, deinterleaved");
    }

    #[test]
    fn deserializes_from_camel_case_json() {
        let json = r#"{"sampleFormat":"i16","sampleRate":44100.0,"channels":1,"interleaved":true}"#;
        let format: AudioFormat = serde_json::from_str(json).unwrap();
        assert_eq!(format.sample_format, SampleFormat::I16);
        assert_eq!(format.bytes_per_frame(), 2);
    }
}
