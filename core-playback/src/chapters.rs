//! Timeline math shared by the state controller and the position tracker.
//!
//! Book positions are derived from server-reported track durations and are
//! therefore approximate; they are fine for navigation and display, not for
//! accounting.

use core_library::models::{Chapter, Track};

/// Sum of the durations of all tracks before `track_index`, plus `offset_ms`.
pub fn book_position_ms(tracks: &[Track], track_index: usize, offset_ms: u64) -> u64 {
    tracks
        .iter()
        .take(track_index)
        .fold(0u64, |acc, track| acc.saturating_add(track.duration_ms))
        .saturating_add(offset_ms)
}

/// Map a book position back to `(track_index, offset_ms)`.
///
/// A position on a track boundary maps to the start of the later track.
/// Positions past the end clamp to the end of the last track.
pub fn locate_book_position(tracks: &[Track], book_position_ms: u64) -> (usize, u64) {
    let Some(last) = tracks.len().checked_sub(1) else {
        return (0, 0);
    };

    let mut remaining = book_position_ms;
    for (index, track) in tracks.iter().enumerate() {
        if remaining < track.duration_ms {
            return (index, remaining);
        }
        if index == last {
            return (index, track.duration_ms);
        }
        remaining -= track.duration_ms;
    }

    (last, tracks[last].duration_ms)
}

/// Find the chapter covering `book_position_ms`.
///
/// Picks the first chapter whose half-open span contains the position. When
/// none does (a gap, or past the final end), falls back to the last chapter
/// starting at or before the position.
pub fn chapter_at(chapters: &[Chapter], book_position_ms: u64) -> Option<(usize, &Chapter)> {
    chapters
        .iter()
        .enumerate()
        .find(|(_, chapter)| chapter.contains(book_position_ms))
        .or_else(|| {
            chapters
                .iter()
                .enumerate()
                .rev()
                .find(|(_, chapter)| chapter.start_offset_ms <= book_position_ms)
        })
}
