//! Audio format conversion utilities

use anyhow::{Context, Result};
use std::io::Cursor;

/// Convert raw PCM s16le bytes to an in-memory WAV file.
pub fn pcm_to_wav(pcm_data: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for chunk in pcm_data.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer.write_sample(sample).context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }
    Ok(cursor.into_inner())
}

/// Convert PCM s16le bytes to f32 samples in [-1, 1].
pub fn pcm_to_f32(pcm_data: &[u8]) -> Vec<f32> {
    pcm_data
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

/// Compute RMS energy of PCM s16le audio.
pub fn compute_rms(pcm_data: &[u8]) -> f32 {
    if pcm_data.len() < 2 {
        return 0.0;
    }
    let sum: f64 = pcm_data
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64;
            sample * sample
        })
        .sum();
    let count = (pcm_data.len() / 2) as f64;
    (sum / count).sqrt() as f32
}
