//! End-to-end pipeline tests

use std::io::Cursor;
use std::sync::Arc;

use super::fixtures::{fake_lossy_codec, frames, sine, Harness};
use crate::codec::wav::HEADER_LEN;
use crate::codec::{parse_header, CodecWorker, WavCodec};
use crate::config::{ConfigFile, EncoderConfig};
use crate::depth::ConversionOrder;
use crate::resample::ResampleKernel;
use crate::types::{AudioFrame, SampleFormat};

fn wav_worker(channels: usize, sample_rate: u32, format: SampleFormat, chunk_size: usize) -> CodecWorker {
    CodecWorker::new(
        Arc::new(WavCodec),
        EncoderConfig {
            channels,
            sample_rate,
            format,
            streaming: false,
            chunk_size,
        },
    )
    .unwrap()
}

/// Concatenate the frames channel by channel, as f64.
fn planar(frames: &[AudioFrame]) -> Vec<Vec<f64>> {
    let channels = frames.first().map_or(0, |f| f.channel_count());
    (0..channels)
        .map(|ch| frames.iter().flat_map(|f| f.channels[ch].to_f64()).collect())
        .collect()
}

fn interleave<T: Copy>(planar: &[Vec<T>]) -> Vec<T> {
    let len = planar.iter().map(|c| c.len()).min().unwrap_or(0);
    (0..len)
        .flat_map(|i| planar.iter().map(move |c| c[i]))
        .collect()
}

#[tokio::test]
async fn test_wav_roundtrip_16bit_stereo() {
    let harness = Harness::new(2, 44100, SampleFormat::I16, wav_worker(2, 44100, SampleFormat::I16, 4096));
    let input = frames(&sine(2, 10_000, 44100, 440.0, 0.5), 4096, 44100, SampleFormat::I16);
    let expected: Vec<i16> = interleave(&planar(&input))
        .into_iter()
        .map(|s| s as i16)
        .collect();

    harness.recorder.record().unwrap();
    harness.push_all(input);
    let finished = harness.recorder.finish().await.unwrap();
    let assembled = finished.assembled.unwrap();

    let header = parse_header(&assembled).unwrap();
    assert_eq!(header.channels, 2);
    assert_eq!(header.sample_rate, 44100);
    assert_eq!(header.bits_per_sample, 16);
    assert_eq!(header.byte_rate, 176400);
    assert_eq!(header.block_align, 4);
    assert_eq!(header.data_len as usize, 10_000 * 2 * 2);
    assert_eq!(header.riff_len as usize, assembled.len() - 8);

    let mut reader = hound::WavReader::new(Cursor::new(assembled.to_vec())).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 44100);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, expected);

    // the streamed chunks are exactly the data section
    assert_eq!(harness.joined(), assembled[HEADER_LEN..].to_vec());
    assert!(harness.errors.lock().is_empty());
}

#[tokio::test]
async fn test_resampled_float_matches_kernel() {
    let harness = Harness::new(2, 48000, SampleFormat::F32, wav_worker(2, 44100, SampleFormat::F32, 1000));
    assert_eq!(harness.recorder.conversion_order(), ConversionOrder::AfterResample);
    assert!(harness.recorder.is_resampling());

    // 10 ms capture buffers
    let input = frames(&sine(2, 9600, 48000, 1000.0, 0.9), 480, 48000, SampleFormat::F32);
    let mut kernel = ResampleKernel::new(48000, 44100, 2).unwrap();
    let expected: Vec<f32> = interleave(&kernel.process(&planar(&input)))
        .into_iter()
        .map(|s| s as f32)
        .collect();
    assert_eq!(expected.len(), 8820 * 2);

    harness.recorder.record().unwrap();
    harness.push_all(input);
    let finished = harness.recorder.finish().await.unwrap();
    let assembled = finished.assembled.unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(assembled.to_vec())).unwrap();
    assert_eq!(reader.spec().sample_rate, 44100);
    assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
    let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, expected);

    let state = harness.recorder.state();
    assert_eq!(state.queued, state.finished);
    // eight full chunks of 1000, the flushed remainder and the end marker
    assert_eq!(state.queued, 10);
}

#[tokio::test]
async fn test_8bit_source_widened_before_upsampling() {
    let harness = Harness::new(1, 8000, SampleFormat::I8, wav_worker(1, 16000, SampleFormat::I16, 256));
    assert_eq!(harness.recorder.conversion_order(), ConversionOrder::BeforeResample);

    let input = frames(&[vec![0.5; 400]], 100, 8000, SampleFormat::I8);
    harness.recorder.record().unwrap();
    harness.push_all(input);
    let assembled = harness.recorder.finish().await.unwrap().assembled.unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(assembled.to_vec())).unwrap();
    assert_eq!(reader.spec().sample_rate, 16000);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 800);
    // 0.5 -> 64 (8 bit) -> 16384 (16 bit); the first output rises from silence
    assert_eq!(samples[0], 8192);
    assert!(samples[1..].iter().all(|&s| s == 16384));
}

#[tokio::test]
async fn test_lossy_streaming_pipeline() {
    let encoder = CodecWorker::new(
        Arc::new(fake_lossy_codec()),
        EncoderConfig {
            channels: 2,
            sample_rate: 44000,
            format: SampleFormat::F32,
            streaming: true,
            chunk_size: 4096,
        },
    )
    .unwrap();
    assert_eq!(encoder.config().sample_rate, 44100);

    let harness = Harness::new(2, 44000, SampleFormat::F32, encoder);
    assert!(harness.recorder.is_resampling());

    harness.recorder.record().unwrap();
    harness.push_all(frames(&sine(2, 4400, 44000, 300.0, 0.3), 440, 44000, SampleFormat::F32));
    let finished = harness.recorder.finish().await.unwrap();

    assert_eq!(finished.assembled, None);
    assert_eq!(*harness.ends.lock(), vec![None]);

    let mut expected = vec![2u8; 4410];
    expected.extend_from_slice(b"\xff\xfb");
    assert_eq!(harness.joined(), expected);
}

#[tokio::test]
async fn test_config_file_drives_pipeline() {
    let config = ConfigFile::from_toml(
        r#"
        [encoder]
        channels = 1
        sample_rate = 22050
        bit_depth = 16
        chunk_size = 256

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();
    let encoder_config = config.encoder_config().unwrap();
    let encoder = CodecWorker::new(Arc::new(WavCodec), encoder_config).unwrap();

    let harness = Harness::new(1, 22050, SampleFormat::F32, encoder);
    assert!(!harness.recorder.is_resampling());

    harness.recorder.record().unwrap();
    harness.push_all(frames(&sine(1, 2205, 22050, 100.0, 0.25), 1024, 22050, SampleFormat::F32));
    let assembled = harness.recorder.finish().await.unwrap().assembled.unwrap();

    let reader = hound::WavReader::new(Cursor::new(assembled.to_vec())).unwrap();
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().sample_rate, 22050);
    assert_eq!(reader.spec().bits_per_sample, 16);
    assert_eq!(reader.len(), 2205);
}

#[tokio::test]
async fn test_pause_resume_and_second_take() {
    let harness = Harness::new(1, 8000, SampleFormat::I16, wav_worker(1, 8000, SampleFormat::I16, 64));
    let take = || frames(&[vec![0.25; 80]], 40, 8000, SampleFormat::I16);

    harness.recorder.record().unwrap();
    harness.push_all(take());
    harness.recorder.pause().unwrap();
    harness.push_all(take());
    harness.recorder.record().unwrap();
    harness.push_all(take());
    let first = harness.recorder.finish().await.unwrap().assembled.unwrap();
    assert_eq!(parse_header(&first).unwrap().data_len, 160 * 2);

    harness.recorder.reset(false).await.unwrap();
    harness.recorder.record().unwrap();
    harness.push_all(take());
    let second = harness.recorder.finish().await.unwrap().assembled.unwrap();
    assert_eq!(parse_header(&second).unwrap().data_len, 80 * 2);
    assert_eq!(harness.ends.lock().len(), 2);
}
