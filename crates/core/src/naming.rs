//! Release-name classification for provider file listings.
//!
//! Extracts season/episode number sets from video file names and filters out
//! non-video entries. The grammar is intentionally narrow: it covers the
//! naming schemes that actually show up in debrid file listings (SxxEyy,
//! NxMM, season packs, absolute anime numbering), not the full release-name
//! zoo.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// File extensions treated as playable video.
const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".m4v", ".webm", ".mov", ".ts", ".wmv", ".mpg", ".mpeg", ".flv",
];

/// Check whether a file name looks like a video file.
pub fn is_video(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// `S01E02`, `S01E01-03`, `S01E01-E03`
static SEASON_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)s(\d{1,2})[ ._-]?e(\d{1,3})(?:[ ]?[-~][ ]?e?(\d{1,3}))?").unwrap()
});

/// `1x02`, `01x02`
static CROSS_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{2,3})\b").unwrap());

/// `Season 1`, `season.2`
static SEASON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bseason[ ._-]?(\d{1,2})\b").unwrap());

/// Standalone `S2` (not followed by an episode marker).
static SEASON_SHORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bs(\d{1,2})\b").unwrap());

/// Standalone `E12`, `Ep12`, `Episode 12`.
static EPISODE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\be(?:p(?:isode)?)?[ ._-]?(\d{1,3})\b").unwrap());

/// Absolute anime numbering: `Show - 12 [1080p]`, `Show - 12.mkv`
static DASH_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ _]-[ _](\d{1,3})(?:[ ._\[\(v]|$)").unwrap());

/// Season/episode numbers extracted from a single file name.
///
/// A name can carry several of either: season packs list one season and no
/// episodes, multi-episode files list a range. Empty `seasons` on a series
/// file usually means absolute (kitsu-style) numbering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedName {
    pub seasons: Vec<u32>,
    pub episodes: Vec<u32>,
}

impl ParsedName {
    /// Parse season/episode markers out of a file name.
    pub fn parse(name: &str) -> Self {
        let mut seasons: Vec<u32> = Vec::new();
        let mut episodes: Vec<u32> = Vec::new();

        for caps in SEASON_EPISODE.captures_iter(name) {
            if let Some(season) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                push_unique(&mut seasons, season);
            }
            let start: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
            let end: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());
            match (start, end) {
                (Some(start), Some(end)) if end >= start && end - start < 100 => {
                    for episode in start..=end {
                        push_unique(&mut episodes, episode);
                    }
                }
                (Some(start), _) => push_unique(&mut episodes, start),
                _ => {}
            }
        }

        if episodes.is_empty() {
            for caps in CROSS_FORMAT.captures_iter(name) {
                if let Some(season) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                    push_unique(&mut seasons, season);
                }
                if let Some(episode) = caps.get(2).and_then(|m| m.as_str().parse().ok()) {
                    push_unique(&mut episodes, episode);
                }
            }
        }

        for caps in SEASON_WORD.captures_iter(name) {
            if let Some(season) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                push_unique(&mut seasons, season);
            }
        }

        if seasons.is_empty() {
            for caps in SEASON_SHORT.captures_iter(name) {
                if let Some(season) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                    push_unique(&mut seasons, season);
                }
            }
        }

        if episodes.is_empty() {
            for caps in EPISODE_WORD.captures_iter(name) {
                if let Some(episode) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                    push_unique(&mut episodes, episode);
                }
            }
        }

        if episodes.is_empty() {
            if let Some(caps) = DASH_NUMBER.captures(name) {
                if let Some(episode) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                    push_unique(&mut episodes, episode);
                }
            }
        }

        Self { seasons, episodes }
    }

    /// Whether the name carries any explicit season marker.
    pub fn has_explicit_season(&self) -> bool {
        !self.seasons.is_empty()
    }

    pub fn has_season(&self, season: u32) -> bool {
        self.seasons.contains(&season)
    }

    pub fn has_episode(&self, episode: u32) -> bool {
        self.episodes.contains(&episode)
    }
}

fn push_unique(values: &mut Vec<u32>, value: u32) {
    if !values.contains(&value) {
        values.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video() {
        assert!(is_video("Show.S01E02.mkv"));
        assert!(is_video("Movie.2019.MP4"));
        assert!(!is_video("Show.S01E02.nfo"));
        assert!(!is_video("cover.jpg"));
        assert!(!is_video("Show.S01E02.srt"));
    }

    #[test]
    fn test_parse_standard_season_episode() {
        let parsed = ParsedName::parse("Show.S01E02.1080p.WEB-DL.mkv");
        assert_eq!(parsed.seasons, vec![1]);
        assert_eq!(parsed.episodes, vec![2]);
    }

    #[test]
    fn test_parse_lowercase_and_separator() {
        let parsed = ParsedName::parse("show s02 e05 [720p].mkv");
        assert_eq!(parsed.seasons, vec![2]);
        assert_eq!(parsed.episodes, vec![5]);
    }

    #[test]
    fn test_parse_episode_range() {
        let parsed = ParsedName::parse("Show.S03E01-E03.mkv");
        assert_eq!(parsed.seasons, vec![3]);
        assert_eq!(parsed.episodes, vec![1, 2, 3]);

        let parsed = ParsedName::parse("Show.S03E04-06.mkv");
        assert_eq!(parsed.episodes, vec![4, 5, 6]);
    }

    #[test]
    fn test_parse_cross_format() {
        let parsed = ParsedName::parse("Show 1x02 HDTV.mkv");
        assert_eq!(parsed.seasons, vec![1]);
        assert_eq!(parsed.episodes, vec![2]);
    }

    #[test]
    fn test_parse_season_pack() {
        let parsed = ParsedName::parse("Show Season 2 Complete 1080p");
        assert_eq!(parsed.seasons, vec![2]);
        assert!(parsed.episodes.is_empty());
    }

    #[test]
    fn test_parse_short_season_marker() {
        let parsed = ParsedName::parse("Show S2 - 05.mkv");
        assert_eq!(parsed.seasons, vec![2]);
        assert_eq!(parsed.episodes, vec![5]);
    }

    #[test]
    fn test_parse_absolute_numbering() {
        let parsed = ParsedName::parse("[Group] Show - 12 [1080p].mkv");
        assert!(parsed.seasons.is_empty());
        assert_eq!(parsed.episodes, vec![12]);
    }

    #[test]
    fn test_parse_standalone_episode_word() {
        let parsed = ParsedName::parse("Show.Episode.7.mkv");
        assert!(parsed.seasons.is_empty());
        assert_eq!(parsed.episodes, vec![7]);
    }

    #[test]
    fn test_year_is_not_an_episode() {
        let parsed = ParsedName::parse("Movie - 2019.mkv");
        assert!(parsed.episodes.is_empty());
    }

    #[test]
    fn test_no_markers() {
        let parsed = ParsedName::parse("Some.Movie.1080p.BluRay.mkv");
        assert!(parsed.seasons.is_empty());
        assert!(parsed.episodes.is_empty());
    }
}
