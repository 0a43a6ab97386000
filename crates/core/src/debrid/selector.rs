//! Playable-file selection from a provider file listing.
//!
//! First-match policy: files are visited in listed order and the first one
//! that survives the filters wins. Ranking is deliberately out of scope.

use crate::naming::{is_video, ParsedName};

use super::{FileQuery, MediaKind};

/// A file as reported by a provider, in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub name: String,
    pub size: u64,
    /// Logical files inside a pack entry (a season archive, a batch). When
    /// present, the first one is what actually gets streamed and its
    /// name/size replace the outer entry's for filtering.
    pub pack: Vec<PackEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub name: String,
    pub size: u64,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            pack: Vec::new(),
        }
    }

    pub fn with_pack(mut self, entries: Vec<PackEntry>) -> Self {
        self.pack = entries;
        self
    }

    /// The name/size that matter for filtering.
    fn effective(&self) -> (&str, u64) {
        match self.pack.first() {
            Some(entry) => (&entry.name, entry.size),
            None => (&self.name, self.size),
        }
    }
}

/// The winning file: its position in the original listing plus the resolved
/// title and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub index: usize,
    pub title: String,
    pub size: u64,
}

/// Pick the first file matching the query, or `None`.
///
/// Non-video names and anything containing "sample" are skipped. For series,
/// the requested episode must appear in the parsed episode set; with kitsu
/// numbering any explicit season marker disqualifies the file, otherwise the
/// requested season must appear in the parsed season set.
pub fn select_playable_file(files: &[CandidateFile], query: &FileQuery) -> Option<SelectedFile> {
    for (index, file) in files.iter().enumerate() {
        let (name, size) = file.effective();

        if !is_video(name) || name.to_lowercase().contains("sample") {
            continue;
        }

        if query.kind == MediaKind::Series {
            let parsed = ParsedName::parse(name);

            if let Some(episode) = query.episode {
                if !parsed.has_episode(episode) {
                    continue;
                }
            }

            if query.kitsu {
                if parsed.has_explicit_season() {
                    continue;
                }
            } else if let Some(season) = query.season {
                if !parsed.has_season(season) {
                    continue;
                }
            }
        }

        return Some(SelectedFile {
            index,
            title: name.to_string(),
            size,
        });
    }

    None
}
