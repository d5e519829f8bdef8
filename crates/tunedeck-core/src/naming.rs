//! Name handling: filename heuristics, locator normalization and
//! filesystem-safe file names.
//!
//! The title/artist heuristic works on the file stem only. It recognises the
//! common `Artist - Title` layout, drops bracketed annotations such as
//! `(Official Video)` or `[320kbps]`, strips bare quality tokens, and pulls
//! `feat.`/`ft.` credits out as additional artists. Titles that use ` - `
//! stylistically will be split anyway.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::UNKNOWN_ARTIST;

#[allow(clippy::expect_used)]
static FEAT_BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\(\[]\s*(?:feat\.?|ft\.?|featuring)\s+([^\)\]]+)[\)\]]").expect("valid regex")
});

#[allow(clippy::expect_used)]
static FEAT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+(.+)$").expect("valid regex")
});

#[allow(clippy::expect_used)]
static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}|【[^】]*】").expect("valid regex")
});

#[allow(clippy::expect_used)]
static QUALITY_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:\d{2,3}\s?kbps|\d{3,4}p|(?:320|256|192|160|128)k|hq|hd|4k|hi-?res)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[allow(clippy::expect_used)]
static CREDIT_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:,|&)\s*").expect("valid regex"));

const SEPARATORS: [&str; 3] = [" - ", " – ", " — "];

/// Title and artists derived from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Cleaned title.
    pub title: String,
    /// Main artist first, then featured artists.
    pub artists: Vec<String>,
}

/// Parse a file stem (no extension) into title and artists.
#[must_use]
pub fn parse_track_name(stem: &str) -> ParsedName {
    let mut name = stem.replace('_', " ");
    let mut featured = Vec::new();

    for caps in FEAT_BRACKETED.captures_iter(&name) {
        if let Some(credit) = caps.get(1) {
            featured.extend(split_credits(credit.as_str()));
        }
    }
    name = FEAT_BRACKETED.replace_all(&name, " ").into_owned();
    name = BRACKETED.replace_all(&name, " ").into_owned();
    name = QUALITY_TOKENS.replace_all(&name, " ").into_owned();

    let (artist_part, title_part) = split_artist_title(&name);

    let title_part = take_feat_suffix(&title_part, &mut featured);
    let artist_part = artist_part.map(|a| take_feat_suffix(&a, &mut featured));

    let mut title = clean(&title_part);
    if title.is_empty() {
        title = clean(&stem.replace('_', " "));
    }

    let mut artists: Vec<String> = artist_part
        .map(|a| clean(&a))
        .filter(|a| !a.is_empty())
        .into_iter()
        .collect();
    for credit in featured {
        if !artists.contains(&credit) {
            artists.push(credit);
        }
    }
    if artists.is_empty() {
        artists.push(UNKNOWN_ARTIST.to_string());
    }

    ParsedName { title, artists }
}

fn split_artist_title(name: &str) -> (Option<String>, String) {
    let split = SEPARATORS
        .iter()
        .filter_map(|sep| name.find(sep).map(|pos| (pos, sep.len())))
        .min_by_key(|(pos, _)| *pos);

    match split {
        Some((pos, len)) => {
            let artist = name[..pos].to_string();
            let title = name[pos + len..].to_string();
            if clean(&artist).is_empty() || clean(&title).is_empty() {
                (None, name.to_string())
            } else {
                (Some(artist), title)
            }
        }
        None => (None, name.to_string()),
    }
}

fn take_feat_suffix(part: &str, featured: &mut Vec<String>) -> String {
    match FEAT_SUFFIX.captures(part) {
        Some(caps) => {
            if let Some(credit) = caps.get(1) {
                featured.extend(split_credits(credit.as_str()));
            }
            caps.get(0)
                .map_or_else(|| part.to_string(), |m| part[..m.start()].to_string())
        }
        None => part.to_string(),
    }
}

fn split_credits(credit: &str) -> Vec<String> {
    CREDIT_SPLIT
        .split(credit)
        .map(clean)
        .filter(|c| !c.is_empty())
        .collect()
}

fn clean(text: &str) -> String {
    WHITESPACE
        .replace_all(text, " ")
        .trim()
        .trim_matches(|c: char| c == '-' || c == '|' || c == '–' || c == '—' || c.is_whitespace())
        .to_string()
}

/// Sanitize a string for use as a filename.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

    let sanitized: String = name
        .chars()
        .map(|c| {
            if invalid_chars.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Trim whitespace and dots from ends
    let trimmed = sanitized.trim().trim_matches('.');

    // Limit length (leaving room for extension)
    trimmed.chars().take(200).collect::<String>().trim_end().to_string()
}

/// An alternative mount point that refers to the same storage as `canonical`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountAlias {
    /// Path prefix that should be rewritten.
    pub alias: String,
    /// Prefix it is rewritten to.
    pub canonical: String,
}

impl MountAlias {
    /// Create an alias rule.
    pub fn new(alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            canonical: canonical.into(),
        }
    }
}

/// Default aliases for Android shared storage.
#[must_use]
pub fn default_mount_aliases() -> Vec<MountAlias> {
    vec![
        MountAlias::new("/sdcard", "/storage/emulated/0"),
        MountAlias::new("/storage/self/primary", "/storage/emulated/0"),
        MountAlias::new("/mnt/sdcard", "/storage/emulated/0"),
    ]
}

/// Produces the dedup key for a locator.
///
/// File paths are lowercased, use `/` separators, have no duplicate or
/// trailing separators, and have alias mount prefixes rewritten. URLs are only
/// trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorNormalizer {
    aliases: Vec<(String, String)>,
}

impl LocatorNormalizer {
    /// Create a normalizer with the given alias rules.
    #[must_use]
    pub fn new(aliases: &[MountAlias]) -> Self {
        let mut aliases: Vec<(String, String)> = aliases
            .iter()
            .map(|a| (normalize_path_text(&a.alias), normalize_path_text(&a.canonical)))
            .filter(|(alias, _)| !alias.is_empty() && alias != "/")
            .collect();
        // Longest prefix wins.
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { aliases }
    }

    /// Normalize a locator into its dedup key.
    #[must_use]
    pub fn normalize(&self, locator: &str) -> String {
        let trimmed = locator.trim();
        if is_url(trimmed) {
            return trimmed.to_string();
        }

        let path = normalize_path_text(trimmed);
        for (alias, canonical) in &self.aliases {
            if path == *alias {
                return canonical.clone();
            }
            if let Some(rest) = path.strip_prefix(alias.as_str())
                && rest.starts_with('/')
            {
                return format!("{canonical}{rest}");
            }
        }
        path
    }
}

/// Whether a locator is a URL rather than a file path.
#[must_use]
pub fn is_url(locator: &str) -> bool {
    let lower = locator.trim_start().to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn normalize_path_text(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.trim().chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.extend(c.to_lowercase());
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artist_title_with_annotation() {
        let parsed = parse_track_name("Artist Name - Song Title (Official Video)");
        assert_eq!(parsed.title, "Song Title");
        assert_eq!(parsed.artists, vec!["Artist Name".to_string()]);
    }

    #[test]
    fn test_no_separator_uses_whole_name() {
        let parsed = parse_track_name("Just A Song");
        assert_eq!(parsed.title, "Just A Song");
        assert_eq!(parsed.artists, vec![UNKNOWN_ARTIST.to_string()]);
    }

    #[test]
    fn test_feat_suffix_becomes_artist() {
        let parsed = parse_track_name("Drake - Hotline Bling ft. Rihanna [320kbps]");
        assert_eq!(parsed.title, "Hotline Bling");
        assert_eq!(parsed.artists, vec!["Drake".to_string(), "Rihanna".to_string()]);
    }

    #[test]
    fn test_bracketed_feat_with_multiple_credits() {
        let parsed = parse_track_name("Main - Track (feat. One & Two)");
        assert_eq!(parsed.title, "Track");
        assert_eq!(
            parsed.artists,
            vec!["Main".to_string(), "One".to_string(), "Two".to_string()]
        );
    }

    #[test]
    fn test_quality_tokens_are_stripped() {
        let parsed = parse_track_name("Band - Anthem HQ 1080p");
        assert_eq!(parsed.title, "Anthem");
        assert_eq!(parsed.artists, vec!["Band".to_string()]);
    }

    #[test]
    fn test_underscores_become_spaces() {
        let parsed = parse_track_name("Some_Artist_-_Some_Song");
        assert_eq!(parsed.title, "Some Song");
        assert_eq!(parsed.artists, vec!["Some Artist".to_string()]);
    }

    #[test]
    fn test_only_annotation_falls_back_to_stem() {
        let parsed = parse_track_name("(Intro)");
        assert_eq!(parsed.title, "(Intro)");
    }

    #[test]
    fn test_stylistic_dash_is_split() {
        // The heuristic splits on the first separator regardless of intent.
        let parsed = parse_track_name("Nocturne - Part I - Reprise");
        assert_eq!(parsed.artists, vec!["Nocturne".to_string()]);
        assert_eq!(parsed.title, "Part I - Reprise");
    }

    #[test]
    fn test_sanitize_filename_invalid_chars() {
        assert_eq!(sanitize_filename("AC/DC: Back?"), "AC_DC_ Back_");
    }

    #[test]
    fn test_sanitize_filename_trim() {
        assert_eq!(sanitize_filename("  ..name..  "), "name");
    }

    #[test]
    fn test_sanitize_filename_long_multibyte_name() {
        let long = "é".repeat(300);
        let result = sanitize_filename(&long);
        assert_eq!(result.chars().count(), 200);
    }

    #[test]
    fn test_normalize_path_case_and_separators() {
        let normalizer = LocatorNormalizer::default();
        assert_eq!(
            normalizer.normalize("C:\\Music\\\\Song.MP3"),
            "c:/music/song.mp3"
        );
        assert_eq!(normalizer.normalize("/Music/Dir/"), "/music/dir");
    }

    #[test]
    fn test_normalize_rewrites_mount_alias() {
        let normalizer = LocatorNormalizer::new(&default_mount_aliases());
        assert_eq!(
            normalizer.normalize("/sdcard/Music/a.mp3"),
            "/storage/emulated/0/music/a.mp3"
        );
        assert_eq!(
            normalizer.normalize("/storage/self/primary/Music/a.mp3"),
            normalizer.normalize("/storage/emulated/0/Music/A.mp3")
        );
        // Prefix must end at a separator.
        assert_eq!(normalizer.normalize("/sdcardx/a.mp3"), "/sdcardx/a.mp3");
    }

    #[test]
    fn test_normalize_leaves_urls_alone() {
        let normalizer = LocatorNormalizer::default();
        let url = "https://Example.com/Watch?v=AbC";
        assert_eq!(normalizer.normalize(url), url);
        assert!(is_url(url));
        assert!(!is_url("/music/a.mp3"));
    }
}
