//! RIFF/WAVE backend
//!
//! Each frame is interleaved into little-endian PCM: 8-bit samples as
//! offset binary, 16-bit as signed integers, 32/64-bit as IEEE floats. In
//! buffered mode the assembled result is the 44-byte header followed by
//! every chunk of the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Codec, CodecSession};
use crate::config::EncoderConfig;
use crate::depth;
use crate::error::{Result, TranscodeError};
use crate::types::{AudioFrame, ChannelBuffer, SampleFormat};

/// Size of the canonical header
pub const HEADER_LEN: usize = 44;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Fields of a canonical 44-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    /// Total length minus 8
    pub riff_len: u32,
    /// 1 = integer PCM, 3 = IEEE float
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl WavHeader {
    /// Fails with `Codec` when a field does not fit its header width.
    pub fn new(
        channels: usize,
        sample_rate: u32,
        format: SampleFormat,
        data_len: usize,
    ) -> Result<Self> {
        let block_align = channels
            .checked_mul(format.bytes())
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| {
                TranscodeError::Codec(format!("{} channels do not fit a wav header", channels))
            })?;
        let byte_rate = sample_rate
            .checked_mul(u32::from(block_align))
            .ok_or_else(|| {
                TranscodeError::Codec(format!(
                    "byte rate of {} Hz x {} bytes overflows a wav header",
                    sample_rate, block_align
                ))
            })?;
        let data_len = u32::try_from(data_len)
            .ok()
            .filter(|n| n.checked_add(36).is_some())
            .ok_or_else(|| {
                TranscodeError::Codec(format!("{} data bytes overflow a wav header", data_len))
            })?;

        Ok(Self {
            riff_len: 36 + data_len,
            format_tag: if format.is_float() {
                FORMAT_IEEE_FLOAT
            } else {
                FORMAT_PCM
            },
            // block_align fits u16, so the channel count does too
            channels: channels as u16,
            sample_rate,
            byte_rate,
            block_align,
            bits_per_sample: format.bits(),
            data_len,
        })
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(b"RIFF");
        buf.put_u32_le(self.riff_len);
        buf.put_slice(b"WAVEfmt ");
        buf.put_u32_le(16);
        buf.put_u16_le(self.format_tag);
        buf.put_u16_le(self.channels);
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(self.byte_rate);
        buf.put_u16_le(self.block_align);
        buf.put_u16_le(self.bits_per_sample);
        buf.put_slice(b"data");
        buf.put_u32_le(self.data_len);
    }
}

/// Read back a canonical 44-byte header.
pub fn parse_header(data: &[u8]) -> Result<WavHeader> {
    if data.len() < HEADER_LEN {
        return Err(TranscodeError::Codec(format!(
            "wav header needs {} bytes, got {}",
            HEADER_LEN,
            data.len()
        )));
    }
    if &data[0..4] != b"RIFF" || &data[8..16] != b"WAVEfmt " || &data[36..40] != b"data" {
        return Err(TranscodeError::Codec("not a canonical wav header".into()));
    }

    let mut buf = &data[4..];
    let riff_len = buf.get_u32_le();
    buf.advance(8);
    let fmt_len = buf.get_u32_le();
    if fmt_len != 16 {
        return Err(TranscodeError::Codec(format!(
            "unexpected fmt chunk length {}",
            fmt_len
        )));
    }
    let format_tag = buf.get_u16_le();
    let channels = buf.get_u16_le();
    let sample_rate = buf.get_u32_le();
    let byte_rate = buf.get_u32_le();
    let block_align = buf.get_u16_le();
    let bits_per_sample = buf.get_u16_le();
    buf.advance(4);
    let data_len = buf.get_u32_le();

    Ok(WavHeader {
        riff_len,
        format_tag,
        channels,
        sample_rate,
        byte_rate,
        block_align,
        bits_per_sample,
        data_len,
    })
}

/// Container/raw backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavCodec;

impl Codec for WavCodec {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn negotiate(&self, config: &EncoderConfig) -> Result<EncoderConfig> {
        config.validate()?;
        WavHeader::new(config.channels, config.sample_rate, config.format, 0)?;
        Ok(config.clone())
    }

    fn create(&self, config: &EncoderConfig) -> Result<Box<dyn CodecSession>> {
        Ok(Box::new(WavSession {
            channels: config.channels,
            format: config.format,
        }))
    }

    fn assemble(&self, config: &EncoderConfig, chunks: &[Bytes]) -> Result<Bytes> {
        let data_len: usize = chunks.iter().map(|c| c.len()).sum();
        let header = WavHeader::new(config.channels, config.sample_rate, config.format, data_len)?;
        let mut out = BytesMut::with_capacity(HEADER_LEN + data_len);
        header.write(&mut out);
        for chunk in chunks {
            out.extend_from_slice(chunk);
        }
        Ok(out.freeze())
    }
}

struct WavSession {
    channels: usize,
    format: SampleFormat,
}

impl CodecSession for WavSession {
    fn encode(&mut self, frame: AudioFrame) -> Result<Bytes> {
        if frame.channel_count() < self.channels {
            return Err(TranscodeError::ChannelMismatch {
                source_channels: frame.channel_count(),
                encoder_channels: self.channels,
            });
        }

        let len = frame.len();
        let channels: Vec<ChannelBuffer> = frame
            .channels
            .into_iter()
            .take(self.channels)
            .map(|c| depth::convert(c, self.format))
            .collect();

        let mut out = BytesMut::with_capacity(len * self.channels * self.format.bytes());
        for i in 0..len {
            for channel in &channels {
                match channel {
                    ChannelBuffer::I8(s) => out.put_u8((s[i] as u8) ^ 0x80),
                    ChannelBuffer::I16(s) => out.put_i16_le(s[i]),
                    ChannelBuffer::F32(s) => out.put_f32_le(s[i]),
                    ChannelBuffer::F64(s) => out.put_f64_le(s[i]),
                }
            }
        }
        Ok(out.freeze())
    }

    fn flush(&mut self) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(channels: usize, sample_rate: u32, format: SampleFormat) -> EncoderConfig {
        EncoderConfig {
            channels,
            sample_rate,
            format,
            streaming: false,
            chunk_size: 1024,
        }
    }

    fn encode(config: &EncoderConfig, frame: AudioFrame) -> Result<Bytes> {
        WavCodec.create(config)?.encode(frame)
    }

    #[test]
    fn test_header_fields_16bit_stereo() {
        let mut buf = BytesMut::new();
        WavHeader::new(2, 44100, SampleFormat::I16, 400).unwrap().write(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);

        let header = parse_header(&buf).unwrap();
        assert_eq!(header.riff_len, 436);
        assert_eq!(header.format_tag, 1);
        assert_eq!(header.channels, 2);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.byte_rate, 176400);
        assert_eq!(header.block_align, 4);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.data_len, 400);
    }

    #[test]
    fn test_float_header_tag() {
        let mut buf = BytesMut::new();
        WavHeader::new(1, 48000, SampleFormat::F32, 0).unwrap().write(&mut buf);
        let header = parse_header(&buf).unwrap();
        assert_eq!(header.format_tag, 3);
        assert_eq!(header.block_align, 4);
        assert_eq!(header.byte_rate, 192000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_header(b"RIFF").is_err());
        assert!(parse_header(&[0u8; 44]).is_err());
    }

    #[test]
    fn test_interleaves_16bit() {
        let frame = AudioFrame::new(
            vec![
                ChannelBuffer::I16(vec![1, 0x0203]),
                ChannelBuffer::I16(vec![-1, 4]),
            ],
            44100,
        )
        .unwrap();
        let out = encode(&config(2, 44100, SampleFormat::I16), frame).unwrap();
        assert_eq!(&out[..], &[1, 0, 0xff, 0xff, 0x03, 0x02, 4, 0]);
    }

    #[test]
    fn test_8bit_is_offset_binary() {
        let frame = AudioFrame::new(vec![ChannelBuffer::I8(vec![0, -128, 127])], 8000).unwrap();
        let out = encode(&config(1, 8000, SampleFormat::I8), frame).unwrap();
        assert_eq!(&out[..], &[0x80, 0x00, 0xff]);
    }

    #[test]
    fn test_extra_channels_are_dropped() {
        let frame = AudioFrame::new(
            vec![
                ChannelBuffer::F32(vec![0.5]),
                ChannelBuffer::F32(vec![-0.5]),
            ],
            8000,
        )
        .unwrap();
        let out = encode(&config(1, 8000, SampleFormat::F32), frame).unwrap();
        assert_eq!(&out[..], &0.5f32.to_le_bytes());
    }

    #[test]
    fn test_missing_channels_fail() {
        let frame = AudioFrame::new(vec![ChannelBuffer::I16(vec![0])], 8000).unwrap();
        let result = encode(&config(2, 8000, SampleFormat::I16), frame);
        assert_eq!(
            result,
            Err(TranscodeError::ChannelMismatch {
                source_channels: 1,
                encoder_channels: 2
            })
        );
    }

    #[test]
    fn test_assemble_prepends_header() {
        let cfg = config(1, 8000, SampleFormat::I16);
        let chunks = vec![Bytes::from_static(&[1, 0]), Bytes::from_static(&[2, 0, 3, 0])];
        let out = WavCodec.assemble(&cfg, &chunks).unwrap();
        assert_eq!(out.len(), HEADER_LEN + 6);
        let header = parse_header(&out).unwrap();
        assert_eq!(header.data_len, 6);
        assert_eq!(header.riff_len as usize, out.len() - 8);
        assert_eq!(&out[HEADER_LEN..], &[1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn test_header_overflow_is_an_error() {
        assert!(matches!(
            WavHeader::new(2, 400_000_000, SampleFormat::F64, 0),
            Err(TranscodeError::Codec(_))
        ));
        assert!(matches!(
            WavHeader::new(1, 8000, SampleFormat::I16, u32::MAX as usize),
            Err(TranscodeError::Codec(_))
        ));
        assert!(matches!(
            WavHeader::new(40_000, 8000, SampleFormat::I16, 0),
            Err(TranscodeError::Codec(_))
        ));
    }

    #[test]
    fn test_negotiate_rejects_unrepresentable_byte_rate() {
        let result = WavCodec.negotiate(&config(2, 400_000_000, SampleFormat::F64));
        assert!(matches!(result, Err(TranscodeError::Codec(_))));
        assert!(WavCodec
            .negotiate(&config(2, 192_000, SampleFormat::F64))
            .is_ok());
    }
}
