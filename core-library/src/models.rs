//! Domain models for the audiobook library
//!
//! Identifiers are assigned by the remote media server, so they are plain
//! integers wrapped in newtypes rather than locally generated UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// ID Types
// =============================================================================

/// Server-assigned identifier for a track
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TrackId(pub i64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier for an audiobook
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AudiobookId(pub i64);

impl fmt::Display for AudiobookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a chapter; synthesised chapters reuse their track's id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(pub i64);

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// One audio file of an audiobook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub audiobook_id: AudiobookId,
    pub title: String,
    /// Ordinal position within the audiobook, 1-based as reported by the server
    pub index: u32,
    pub disc_number: u32,
    pub duration_ms: u64,
    /// Server-side listening progress within this track
    pub progress_ms: u64,
    /// Unix milliseconds of the last time this track was listened to, 0 if never
    pub last_viewed_at: i64,
    /// Whether the file is available offline
    pub cached: bool,
    /// Server-side path of the media part, used for playback negotiation
    pub media_path: String,
}

impl Track {
    pub fn new(
        id: TrackId,
        audiobook_id: AudiobookId,
        index: u32,
        duration_ms: u64,
        media_path: impl Into<String>,
    ) -> Self {
        Self {
            id,
            audiobook_id,
            title: format!("Track {}", index),
            index,
            disc_number: 1,
            duration_ms,
            progress_ms: 0,
            last_viewed_at: 0,
            cached: false,
            media_path: media_path.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_progress(mut self, progress_ms: u64, last_viewed_at: i64) -> Self {
        self.progress_ms = progress_ms;
        self.last_viewed_at = last_viewed_at;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.media_path.trim().is_empty() {
            return Err(format!("Track {} has no media path", self.id));
        }

        if self.disc_number == 0 {
            return Err("Disc number must be positive".to_string());
        }

        Ok(())
    }
}

/// A named span of the audiobook timeline
///
/// Offsets are measured on the whole-book timeline, not within the owning
/// track. The span is half-open: `[start_offset_ms, end_offset_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    pub index: u32,
    pub start_offset_ms: u64,
    pub end_offset_ms: u64,
    pub track_id: TrackId,
}

impl Chapter {
    pub fn validate(&self) -> Result<(), String> {
        if self.start_offset_ms > self.end_offset_ms {
            return Err(format!(
                "Chapter {} starts at {}ms after it ends at {}ms",
                self.id, self.start_offset_ms, self.end_offset_ms
            ));
        }
        Ok(())
    }

    pub fn contains(&self, book_position_ms: u64) -> bool {
        self.start_offset_ms <= book_position_ms && book_position_ms < self.end_offset_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_offset_ms.saturating_sub(self.start_offset_ms)
    }

    /// Builds one chapter per track, laid end to end on the book timeline.
    pub fn synthesize_from_tracks(tracks: &[Track]) -> Vec<Chapter> {
        let mut start = 0u64;
        tracks
            .iter()
            .enumerate()
            .map(|(position, track)| {
                let end = start.saturating_add(track.duration_ms);
                let chapter = Chapter {
                    id: ChapterId(track.id.0),
                    title: track.title.clone(),
                    index: position as u32 + 1,
                    start_offset_ms: start,
                    end_offset_ms: end,
                    track_id: track.id,
                };
                start = end;
                chapter
            })
            .collect()
    }
}

/// An audiobook as known to the playback core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audiobook {
    pub id: AudiobookId,
    pub title: String,
    pub author: Option<String>,
    /// Chapter metadata from the server; may be empty
    pub chapters: Vec<Chapter>,
}

impl Audiobook {
    pub fn new(id: AudiobookId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            author: None,
            chapters: Vec::new(),
        }
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    /// Chapters to use for navigation: the stored ones, or a 1:1 mapping
    /// from tracks when the server supplied none.
    pub fn effective_chapters(&self, tracks: &[Track]) -> Vec<Chapter> {
        if self.chapters.is_empty() {
            Chapter::synthesize_from_tracks(tracks)
        } else {
            self.chapters.clone()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Audiobook title cannot be empty".to_string());
        }
        for chapter in &self.chapters {
            chapter.validate()?;
        }
        Ok(())
    }
}

/// A candidate network endpoint for the media server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerConnection {
    /// Base URI, e.g. `https://192-168-1-2.example.direct:32400`
    pub uri: String,
    /// Whether the endpoint is on the local network
    pub local: bool,
    /// Optional ordering hint; lower is preferred
    #[serde(default)]
    pub weight: Option<u32>,
}

impl ServerConnection {
    pub fn local(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            local: true,
            weight: None,
        }
    }

    pub fn remote(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            local: false,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }
}
