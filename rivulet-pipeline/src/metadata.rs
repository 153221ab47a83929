//! Stream tag parsing
//!
//! Tag notifications arrive as loosely typed lists. They are flattened into a
//! `MetaBundle` for the caller, with a fallback for internet radio streams
//! that only fill in the title and pack artist and album into it.

use serde::Serialize;
use std::collections::HashMap;

pub const TAG_TITLE: &str = "title";
pub const TAG_ARTIST: &str = "artist";
pub const TAG_ALBUM: &str = "album";
pub const TAG_COMMENT: &str = "comment";
pub const TAG_BITRATE: &str = "bitrate";
pub const TAG_LYRICS: &str = "lyrics";

/// A single tag value
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Str(String),
    UInt(u32),
}

/// Tags carried by one notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagList {
    values: HashMap<String, TagValue>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style string tag
    pub fn with_str(mut self, name: &str, value: &str) -> Self {
        self.values
            .insert(name.to_string(), TagValue::Str(value.to_string()));
        self
    }

    /// Builder-style unsigned tag
    pub fn with_uint(mut self, name: &str, value: u32) -> Self {
        self.values.insert(name.to_string(), TagValue::UInt(value));
        self
    }

    /// String tag, trimmed; empty when absent or not a string
    pub fn get_str(&self, name: &str) -> String {
        match self.values.get(name) {
            Some(TagValue::Str(s)) => s.trim().to_string(),
            _ => String::new(),
        }
    }

    /// Unsigned tag; 0 when absent or not a number
    pub fn get_uint(&self, name: &str) -> u32 {
        match self.values.get(name) {
            Some(TagValue::UInt(v)) => *v,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Flat metadata delivered to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaBundle {
    /// Original (pre-redirect) URL of the track
    pub url: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub comment: String,
    pub lyrics: String,
    /// Bitrate in kbit/s
    pub bitrate: u32,
}

impl MetaBundle {
    /// Flatten a tag list for the track at `url`
    pub fn from_tags(tags: &TagList, url: &str) -> Self {
        let mut bundle = Self {
            url: url.to_string(),
            title: tags.get_str(TAG_TITLE),
            artist: tags.get_str(TAG_ARTIST),
            album: tags.get_str(TAG_ALBUM),
            comment: tags.get_str(TAG_COMMENT),
            lyrics: tags.get_str(TAG_LYRICS),
            bitrate: tags.get_uint(TAG_BITRATE) / 1000,
        };
        bundle.split_title();
        bundle
    }

    /// Recover artist/album packed into the title
    ///
    /// Only applies when nothing else identified the artist or album.
    /// "Artist - Title" keeps the first and last parts; "Artist~Title~Album"
    /// needs at least two separators.
    fn split_title(&mut self) {
        if self.title.is_empty() || !self.artist.is_empty() || !self.album.is_empty() {
            return;
        }

        if self.title.contains(" - ") {
            let parts: Vec<&str> = self.title.split(" - ").collect();
            let artist = parts.first().map(|s| s.trim().to_string()).unwrap_or_default();
            let title = parts.last().map(|s| s.trim().to_string()).unwrap_or_default();
            self.artist = artist;
            self.title = title;
        } else if self.title.matches('~').count() >= 2 {
            let parts: Vec<String> = self.title.split('~').map(str::to_string).collect();
            let mut parts = parts.into_iter();
            if let Some(artist) = parts.next() {
                self.artist = artist;
            }
            if let Some(title) = parts.next() {
                self.title = title;
            }
            if let Some(album) = parts.next() {
                self.album = album;
            }
        }
    }
}
