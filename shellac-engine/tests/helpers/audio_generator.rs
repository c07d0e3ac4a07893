//! WAV fixture generation
//!
//! Generates small sine-wave WAV files with hound and stamps ID3v2 tags
//! onto them with lofty, so the full tag -> analyze -> organize path
//! runs against real audio.

use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::tag::{Tag, TagType};
use std::path::Path;

/// Write a mono 16-bit sine wave
pub fn write_sine_wav(path: &Path, seconds: f32, freq: f32, amplitude: f32, sample_rate: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();

    let total = (seconds * sample_rate as f32) as u32;
    for t in 0..total {
        let phase = t as f32 / sample_rate as f32 * freq * 2.0 * std::f32::consts::PI;
        let sample = (phase.sin() * amplitude * i16::MAX as f32) as i16;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// Stamp an ID3v2 tag onto an existing file
pub fn tag_file(path: &Path, artist: &str, title: &str, year: u32, genre: &str) {
    let mut tag = Tag::new(TagType::Id3v2);
    tag.set_artist(artist.to_string());
    tag.set_title(title.to_string());
    tag.set_year(year);
    tag.set_genre(genre.to_string());
    tag.save_to_path(path, WriteOptions::default()).unwrap();
}

/// Sine fixture with tags in one call
pub fn tagged_wav(
    path: &Path,
    seconds: f32,
    freq: f32,
    amplitude: f32,
    artist: &str,
    title: &str,
    year: u32,
    genre: &str,
) {
    write_sine_wav(path, seconds, freq, amplitude, 22050);
    tag_file(path, artist, title, year, genre);
}
