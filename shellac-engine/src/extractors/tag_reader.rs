//! Tag reading and filename parsing
//!
//! [`TagReader`] is the default [`MetadataReader`], built on lofty.
//! [`FilenameParser`] supplies the configured-regex fallback used when a
//! field is missing from the tags.

use super::{ExtractError, MetadataReader, TagData};
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use regex::Regex;
use std::path::Path;

/// Lofty-backed tag reader
pub struct TagReader;

impl TagReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TagReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataReader for TagReader {
    fn read(&self, path: &Path) -> Result<TagData, ExtractError> {
        let tagged_file = Probe::open(path)
            .map_err(|e| ExtractError::TagRead(e.to_string()))?
            .read()
            .map_err(|e| ExtractError::TagRead(e.to_string()))?;

        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

        let data = if let Some(tag) = tag {
            TagData {
                artist: tag.artist().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                title: tag.title().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                album: tag.album().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                year: tag.year(),
                genre: tag.genre().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                track_number: tag.track(),
                disc_number: tag.disk(),
            }
        } else {
            TagData::default()
        };

        tracing::debug!(
            path = %path.display(),
            artist = ?data.artist,
            title = ?data.title,
            "Tags read"
        );

        Ok(data)
    }
}

/// Fallback parser over file stems, patterns supplied by config.
///
/// Patterns are tried in order; the first with a match wins. Named
/// capture groups recognized: `artist`, `title`, `year`.
pub struct FilenameParser {
    patterns: Vec<Regex>,
}

impl FilenameParser {
    pub fn new(patterns: &[String]) -> Result<Self, shellac_common::Error> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    shellac_common::Error::Config(format!("Bad filename pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns: compiled })
    }

    /// Parse artist/title/year out of the file stem
    pub fn parse(&self, path: &Path) -> TagData {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return TagData::default();
        };

        for pattern in &self.patterns {
            if let Some(captures) = pattern.captures(stem) {
                let field = |name: &str| {
                    captures
                        .name(name)
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|s| !s.is_empty())
                };
                let year = field("year").and_then(|y| y.parse::<u32>().ok());

                let data = TagData {
                    artist: field("artist"),
                    title: field("title"),
                    year,
                    ..TagData::default()
                };
                if data.artist.is_some() || data.title.is_some() {
                    tracing::debug!(stem, "Filename parse matched");
                    return data;
                }
            }
        }

        TagData::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_parser() -> FilenameParser {
        let config = shellac_common::config::CleanupConfig::default();
        FilenameParser::new(&config.filename_patterns).unwrap()
    }

    #[test]
    fn test_artist_dash_title() {
        let parser = default_parser();
        let data = parser.parse(Path::new("/in/Carl Craig - At Les.mp3"));
        assert_eq!(data.artist.as_deref(), Some("Carl Craig"));
        assert_eq!(data.title.as_deref(), Some("At Les"));
    }

    #[test]
    fn test_track_number_prefix() {
        let parser = default_parser();
        let data = parser.parse(Path::new("/in/04. Moodymann - Shades of Jae.flac"));
        assert_eq!(data.artist.as_deref(), Some("Moodymann"));
        assert_eq!(data.title.as_deref(), Some("Shades of Jae"));
    }

    #[test]
    fn test_unparseable_stem_is_empty() {
        let parser = default_parser();
        let data = parser.parse(Path::new("/in/AUDIO_0001.wav"));
        assert!(data.artist.is_none());
        assert!(data.title.is_none());
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let result = FilenameParser::new(&["(unclosed".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tag_read_missing_file_errors() {
        let reader = TagReader::new();
        assert!(reader.read(Path::new("/nonexistent/x.mp3")).is_err());
    }
}
