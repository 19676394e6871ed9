// Resampling and PCM conversion properties
//
// These pin down the numeric behavior the wire format depends on: chunk
// cadence independent of the device rate, bucket-average downsampling, and
// 16-bit quantization error bounds.

use sereno_voice::audio::{decode_pcm16, downsample, encode_pcm16, rms, FrameChunker, UtteranceRecorder};

#[test]
fn test_downsample_length_within_one_sample() {
    // round(len * r_out / r_in) within ±1 across common device rates
    let cases = [
        (48_000u32, 16_000u32, 4800usize, 1600usize),
        (44_100, 16_000, 4410, 1600),
        (44_100, 16_000, 1000, 363),
        (48_000, 16_000, 333, 111),
    ];

    for (r_in, r_out, len, expected) in cases {
        let output = downsample(&vec![0.1f32; len], r_in, r_out);
        let diff = output.len() as i64 - expected as i64;
        assert!(
            diff.abs() <= 1,
            "{}->{}Hz with {} samples gave {} (expected ~{})",
            r_in,
            r_out,
            len,
            output.len(),
            expected
        );
    }
}

#[test]
fn test_downsample_output_is_span_mean() {
    // A ramp signal: each output sample must equal the mean of its span,
    // so every output lies strictly inside the span's value range
    let input: Vec<f32> = (0..4410).map(|i| i as f32 / 4410.0).collect();
    let output = downsample(&input, 44_100, 16_000);

    let ratio = 44_100.0 / 16_000.0;
    for (i, sample) in output.iter().enumerate() {
        let start = (i as f64 * ratio).floor() as usize;
        let end = (((i + 1) as f64 * ratio).floor() as usize).min(input.len());
        let span = &input[start..end.max(start + 1)];
        let mean = span.iter().sum::<f32>() / span.len() as f32;

        assert!(
            (sample - mean).abs() < 1e-6,
            "output[{}] = {} but span mean is {}",
            i,
            sample,
            mean
        );
    }
}

#[test]
fn test_pcm16_round_trip_error_bound() {
    // Quantization error stays within one 16-bit step per sample
    let samples: Vec<f32> = (0..2000)
        .map(|i| ((i as f32) * 0.0173).sin() * 0.9)
        .collect();

    let decoded = decode_pcm16(&encode_pcm16(&samples));

    assert_eq!(decoded.len(), samples.len());
    for (original, recovered) in samples.iter().zip(decoded.iter()) {
        assert!((original - recovered).abs() <= 1.0 / 32768.0);
    }
}

#[test]
fn test_pcm16_little_endian_layout() {
    let bytes = encode_pcm16(&[1.0]);
    // 32767 = 0xFF 0x7F little-endian
    assert_eq!(bytes, vec![0xFF, 0x7F]);
}

#[test]
fn test_chunker_cadence_is_rate_independent() {
    // One second of audio yields ten 100ms chunks whatever the device rate
    for device_rate in [44_100u32, 48_000] {
        let mut chunker = FrameChunker::new(device_rate, 16_000, 100);
        let mut chunks = Vec::new();

        // Feed in uneven blocks, as real devices do
        let mut remaining = device_rate as usize;
        while remaining > 0 {
            let block = remaining.min(479);
            chunks.extend(chunker.push(&vec![0.2f32; block]));
            remaining -= block;
        }

        assert_eq!(chunks.len(), 10, "device rate {}", device_rate);
        for chunk in &chunks {
            let diff = chunk.len() as i64 - 1600;
            assert!(diff.abs() <= 1, "chunk of {} samples", chunk.len());
        }
    }
}

#[test]
fn test_rms_distinguishes_speech_from_silence() {
    let silence = vec![0.001f32; 1600];
    let speech: Vec<f32> = (0..1600).map(|i| ((i as f32) * 0.2).sin() * 0.3).collect();

    let threshold = 0.015;
    assert!(rms(&silence) < threshold);
    assert!(rms(&speech) > threshold);
}

#[test]
fn test_recorder_wav_dump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("utterance.wav");

    let mut recorder = UtteranceRecorder::new();
    recorder.push(&vec![0.25f32; 4800], 48_000).unwrap();
    recorder.save_wav(&path).unwrap();

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 48_000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len(), 4800);
}
