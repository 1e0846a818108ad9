use std::path::Path;

use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;

#[derive(Debug)]
pub enum TagError {
    ReadError(lofty::error::LoftyError),
    NoTags,
    TaskFailed(String),
}

impl From<lofty::error::LoftyError> for TagError {
    fn from(err: lofty::error::LoftyError) -> TagError {
        TagError::ReadError(err)
    }
}

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TagError::ReadError(e) => write!(f, "{}", e),
            TagError::NoTags => write!(f, "no tags found"),
            TagError::TaskFailed(e) => write!(f, "reader task failed: {}", e),
        }
    }
}

impl std::error::Error for TagError {}

/// Metadata as extracted from a file, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackTags {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub number: Option<u32>,
    pub year: Option<u32>,
    pub genres: Vec<String>,
    pub duration: f64,
}

impl TrackTags {
    /// Names of the required tags that are absent or empty.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if is_blank(&self.artist) {
            missing.push("artist");
        }
        if is_blank(&self.album) {
            missing.push("album");
        }
        if is_blank(&self.title) {
            missing.push("title");
        }
        if self.number.unwrap_or(0) == 0 {
            missing.push("track");
        }

        missing
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Source of track metadata. Implementations are called from blocking tasks.
pub trait TagReader: Send + Sync + 'static {
    fn read(&self, path: &Path) -> Result<TrackTags, TagError>;
}

pub struct LoftyReader;

impl TagReader for LoftyReader {
    fn read(&self, path: &Path) -> Result<TrackTags, TagError> {
        let tagged_file = Probe::open(path)?.read()?;

        let duration = tagged_file.properties().duration().as_secs_f64();

        let tag = match tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
        {
            Some(tag) => tag,
            None => return Err(TagError::NoTags),
        };

        let genres = tag
            .get_strings(&ItemKey::Genre)
            .flat_map(|g| g.split('\0'))
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(|g| g.to_string())
            .collect();

        Ok(TrackTags {
            artist: tag.artist().map(|s| s.into_owned()),
            album: tag.album().map(|s| s.into_owned()),
            title: tag.title().map(|s| s.into_owned()),
            number: tag.track(),
            year: tag.year(),
            genres,
            duration,
        })
    }
}
