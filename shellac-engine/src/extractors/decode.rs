//! Shared audio decode path
//!
//! Decodes a file to mono f32 PCM with symphonia. Both the defect
//! scanner and the envelope fingerprinter run on this output, so the
//! two always agree about what the audio contains. Mid-stream decode
//! errors are counted rather than fatal; the scanner turns them into
//! defect codes.

use super::ExtractError;
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

/// Decoded mono audio
#[derive(Debug)]
pub struct DecodedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
    /// Seconds actually decoded
    pub decoded_duration_sec: f64,
    /// Duration the container header declares, when known
    pub declared_duration_sec: Option<f64>,
    /// Packets that failed to decode mid-stream
    pub decode_errors: u32,
}

/// Decode a file to mono f32. `max_seconds` bounds the retained samples;
/// the stream is still consumed to the end so truncation is measurable.
pub fn decode_audio_file(
    file_path: &Path,
    max_seconds: Option<f64>,
) -> Result<DecodedAudio, ExtractError> {
    let file = std::fs::File::open(file_path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| ExtractError::Unsupported(format!("{}: {}", file_path.display(), e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ExtractError::Unsupported("No audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| ExtractError::Decode("Sample rate unknown".to_string()))?;
    let channel_count = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1);
    let declared_duration_sec = track
        .codec_params
        .n_frames
        .map(|frames| frames as f64 / sample_rate as f64);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ExtractError::Decode(format!("Decoder init: {}", e)))?;

    let max_samples = max_seconds.map(|s| (s * sample_rate as f64) as usize);
    let mut samples: Vec<f32> = Vec::new();
    let mut frames_seen: u64 = 0;
    let mut decode_errors = 0u32;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(e) => {
                tracing::debug!(path = %file_path.display(), error = %e, "Packet read error");
                decode_errors += 1;
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let frames = decoded.frames() as u64;
                frames_seen += frames;

                let keep = match max_samples {
                    Some(cap) => samples.len() < cap,
                    None => true,
                };
                if keep {
                    let mono = convert_to_mono_f32(&decoded);
                    samples.extend_from_slice(&mono);
                    if let Some(cap) = max_samples {
                        samples.truncate(cap);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(path = %file_path.display(), error = %e, "Packet decode error");
                decode_errors += 1;
            }
        }
    }

    let decoded_duration_sec = frames_seen as f64 / sample_rate as f64;

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels: channel_count,
        decoded_duration_sec,
        declared_duration_sec,
        decode_errors,
    })
}

fn mix_to_mono<S>(buf: &AudioBuffer<S>) -> Vec<f32>
where
    S: Sample,
    f32: FromSample<S>,
{
    let num_channels = buf.spec().channels.count();
    let num_frames = buf.frames();
    let mut mono = Vec::with_capacity(num_frames);

    for frame_idx in 0..num_frames {
        let mut sum = 0.0f32;
        for ch in 0..num_channels {
            sum += f32::from_sample(buf.chan(ch)[frame_idx]);
        }
        mono.push(sum / num_channels as f32);
    }

    mono
}

fn convert_to_mono_f32(decoded: &AudioBufferRef) -> Vec<f32> {
    match decoded {
        AudioBufferRef::U8(buf) => mix_to_mono(buf),
        AudioBufferRef::U16(buf) => mix_to_mono(buf),
        AudioBufferRef::U24(buf) => mix_to_mono(buf),
        AudioBufferRef::U32(buf) => mix_to_mono(buf),
        AudioBufferRef::S8(buf) => mix_to_mono(buf),
        AudioBufferRef::S16(buf) => mix_to_mono(buf),
        AudioBufferRef::S24(buf) => mix_to_mono(buf),
        AudioBufferRef::S32(buf) => mix_to_mono(buf),
        AudioBufferRef::F32(buf) => mix_to_mono(buf),
        AudioBufferRef::F64(buf) => mix_to_mono(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_missing_file_errors() {
        let result = decode_audio_file(Path::new("/nonexistent/file.mp3"), None);
        assert!(matches!(result, Err(ExtractError::Io(_))));
    }

    #[test]
    fn test_decode_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        let result = decode_audio_file(&path, None);
        assert!(matches!(result, Err(ExtractError::Unsupported(_))));
    }
}
