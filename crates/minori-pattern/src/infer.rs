//! Automatic pattern inference from a directory listing.
//!
//! Given the file names of an episode sequence, find the number span that
//! varies across names and emit a `%ep%` pattern anchored on the text the
//! names share. Purely lexical; needs at least two media files to work.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

const MIN_SEQUENCE: usize = 2;

static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:\\\s|\s)+").unwrap());
static NUM_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

const VIDEO_EXTENSIONS: &[&str] = &[
    "3gp", "avi", "flv", "m2ts", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ogv", "ts", "webm",
    "wmv",
];

fn is_media_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Longest run of characters shared by every string, digits trimmed off the
/// edges so a varying number is never split between anchor and episode span.
/// With `reverse` the strings are compared back to front (common suffix).
fn common_affix(names: &[&str], reverse: bool) -> Vec<char> {
    let chars: Vec<Vec<char>> = names
        .iter()
        .map(|n| {
            let mut v: Vec<char> = n.chars().collect();
            if reverse {
                v.reverse();
            }
            v
        })
        .collect();

    let mut out: Vec<char> = Vec::new();
    if let Some(first) = chars.first() {
        'outer: for (i, &c) in first.iter().enumerate() {
            for other in &chars[1..] {
                if other.get(i) != Some(&c) {
                    break 'outer;
                }
            }
            out.push(c);
        }
    }

    while out.last().is_some_and(|c| c.is_ascii_digit()) {
        out.pop();
    }
    while out.first().is_some_and(|c| c.is_ascii_digit()) {
        out.remove(0);
    }

    if reverse {
        out.reverse();
    }
    out
}

fn digit_runs(chars: &[char]) -> Vec<(usize, usize, String)> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            runs.push((start, i, chars[start..i].iter().collect()));
        } else {
            i += 1;
        }
    }
    runs
}

/// The (start, end) span whose digit run takes the most distinct values
/// across names. Ties keep the first span encountered.
fn most_variable_number_span(middles: &[Vec<char>]) -> Option<(usize, usize)> {
    let mut spans: Vec<((usize, usize), Vec<String>)> = Vec::new();
    for middle in middles {
        for (start, end, value) in digit_runs(middle) {
            match spans.iter_mut().find(|(span, _)| *span == (start, end)) {
                Some((_, values)) => {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                None => spans.push(((start, end), vec![value])),
            }
        }
    }

    let mut best: Option<((usize, usize), usize)> = None;
    for (span, values) in &spans {
        if best.is_none_or(|(_, n)| values.len() > n) {
            best = Some((*span, values.len()));
        }
    }
    best.map(|(span, _)| span)
}

/// Escape regex metacharacters, then widen whitespace runs to `\s+` and
/// digit runs to `\d+` so release-group variations still match.
fn escape_normalize(pattern: &str) -> String {
    let escaped = regex::escape(pattern);
    let spaced = SPACE_RUN.replace_all(&escaped, r"\s+");
    NUM_RUN.replace_all(&spaced, r"\d+").into_owned()
}

fn strip_hanging_backslash(pattern: &str) -> &str {
    let bytes = pattern.as_bytes();
    if bytes.last() == Some(&b'\\') && bytes.get(bytes.len().wrapping_sub(2)) != Some(&b'\\') {
        &pattern[..pattern.len() - 1]
    } else {
        pattern
    }
}

/// Collapse per-file patterns into the text they all agree on around `%ep%`.
fn extract_ep_anchor(patterns: &[String]) -> Option<String> {
    let mut befores: Vec<&str> = Vec::new();
    let mut afters: Vec<&str> = Vec::new();

    for p in patterns {
        let Some(i) = p.find("%ep%") else { continue };
        befores.push(&p[..i]);
        afters.push(&p[i + "%ep%".len()..]);
    }

    if befores.is_empty() {
        return None;
    }

    let prefix: String = common_affix(&befores, false).into_iter().collect();
    let suffix: String = common_affix(&afters, false).into_iter().collect();
    let pattern = format!("{prefix}%ep%{suffix}");
    Some(strip_hanging_backslash(&pattern).to_string())
}

/// Infer a `%ep%` pattern from a set of file names. `None` when fewer than
/// two media files remain after filtering or no varying number exists.
pub fn build_filename_pattern(filenames: &[String]) -> Option<String> {
    let media: Vec<&str> = filenames
        .iter()
        .map(String::as_str)
        .filter(|f| is_media_file(f))
        .collect();
    if media.len() < MIN_SEQUENCE {
        return None;
    }

    let prefix = common_affix(&media, false);
    let suffix = common_affix(&media, true);
    debug!(
        prefix = %prefix.iter().collect::<String>(),
        suffix = %suffix.iter().collect::<String>(),
        "detected common affixes"
    );

    let middles: Vec<Vec<char>> = media
        .iter()
        .map(|name| {
            let chars: Vec<char> = name.chars().collect();
            let end = chars.len().saturating_sub(suffix.len());
            let start = prefix.len().min(end);
            chars[start..end].to_vec()
        })
        .collect();

    let (span_start, span_end) = most_variable_number_span(&middles)?;
    debug!(span_start, span_end, "detected episode span");

    let patterns: Vec<String> = middles
        .iter()
        .map(|middle| {
            let before: String = prefix
                .iter()
                .chain(&middle[..span_start.min(middle.len())])
                .collect();
            let after: String = middle[span_end.min(middle.len())..]
                .iter()
                .chain(suffix.iter())
                .collect();
            escape_normalize(&format!("{before}%ep%{after}"))
        })
        .collect();

    extract_ep_anchor(&patterns)
}

/// Infer a pattern from the files of `dir`. Read errors propagate; an
/// undecidable listing is `Ok(None)`.
pub fn infer_from_dir(dir: &Path) -> io::Result<Option<String>> {
    let mut filenames = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                filenames.push(name.to_string());
            }
        }
    }
    filenames.sort();
    Ok(build_filename_pattern(&filenames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EpisodeMatch, EpisodePattern};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Infer a pattern and check that every episode file matches it with the
    /// expected sequential episode numbers.
    fn assert_matches_sequence(filenames: &[&str], episodes: usize) {
        let pattern = build_filename_pattern(&names(filenames)).expect("pattern inferred");
        let compiled = EpisodePattern::compile(&pattern).expect("inferred pattern compiles");

        let mut expected = 1..=episodes;
        for file in filenames {
            if !file.ends_with(".mkv") {
                continue;
            }
            let Some(EpisodeMatch::Numbered { episode, .. }) = compiled.apply(file) else {
                continue;
            };
            let want = expected.next().expect("more matches than episodes");
            assert_eq!(episode, want.to_string(), "wrong episode for {file}");
        }
        assert_eq!(expected.next(), None, "some episodes went unmatched");
    }

    #[test]
    fn test_infer_release_group_with_version_tags() {
        let files: Vec<String> = (1..=16)
            .map(|i| {
                let v2 = if (3..=10).contains(&i) { " V2" } else { "" };
                format!("[EMBER] Arifureta Shokugyou de Sekai Saikyou S3 - {i:02}{v2}.mkv")
            })
            .collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        assert_matches_sequence(&refs, 16);
    }

    #[test]
    fn test_infer_skips_non_media_files() {
        let mut files: Vec<String> = (1..=12)
            .map(|i| format!("[EMBER] Dandadan - {i:02}.mkv"))
            .collect();
        files.push("rpc.config".to_string());
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        assert_matches_sequence(&refs, 12);
    }

    #[test]
    fn test_infer_season_episode_naming() {
        let files: Vec<String> = (1..=12)
            .map(|i| format!("[Judas] Salaryman - S01E{i:02}v2.mkv"))
            .collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        assert_matches_sequence(&refs, 12);
    }

    #[test]
    fn test_infer_with_subtitle_siblings() {
        let mut files = Vec::new();
        for i in 1..=7 {
            files.push(format!("Breaking Bad s01e{i:02} 720p.BRrip.Sujaidr.mkv"));
            files.push(format!("Breaking Bad s01e{i:02} 720p.BRrip.Sujaidr.srt"));
        }
        files.push("sujaidr.txt".to_string());
        files.push("Torrent downloaded from AhaShare.com.txt".to_string());
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        assert_matches_sequence(&refs, 7);
    }

    #[test]
    fn test_infer_bracketed_episode_with_titles() {
        let titles = [
            "Pilot",
            "Paternity",
            "Occam's Razor",
            "Maternity",
            "Damned if you Do",
            "The Socratic Method",
            "Fidelity",
            "Poison",
            "DNR",
            "Histories",
        ];
        let mut files = Vec::new();
        for (i, title) in titles.iter().enumerate() {
            files.push(format!("House - [1x{:02}] - {title}.mkv", i + 1));
            files.push(format!("House - [1x{:02}] - {title}.srt", i + 1));
        }
        files.push("Read Me.txt".to_string());
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        assert_matches_sequence(&refs, 10);
    }

    #[test]
    fn test_infer_hashed_releases() {
        let hashes = [
            "37A7738A", "FD85DB3B", "DA3A7942", "15C004DC", "67F09F1E", "31495666", "CC62BE28",
            "80D8938E", "E13D3D71", "7E21DEAC", "3234B245", "AA7A5258",
        ];
        let files: Vec<String> = hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| format!("[MiniMTBB] Dungeon Meshi - {:02} (BD 1080p) [{hash}].mkv", i + 1))
            .collect();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        assert_matches_sequence(&refs, 12);
    }

    #[test]
    fn test_infer_needs_two_media_files() {
        assert_eq!(
            build_filename_pattern(&names(&["Suzume no Tojimari.mkv"])),
            None
        );
        assert_eq!(
            build_filename_pattern(&names(&["a.txt", "b.txt", "c.txt"])),
            None
        );
    }

    #[test]
    fn test_infer_no_varying_number() {
        assert_eq!(
            build_filename_pattern(&names(&["Movie Part One.mkv", "Movie Part Two.mkv"])),
            None
        );
    }

    #[test]
    fn test_common_affix_strips_edge_digits() {
        let prefix: String = common_affix(&["Show s01e01.mkv", "Show s01e02.mkv"], false)
            .into_iter()
            .collect();
        assert_eq!(prefix, "Show s01e");

        let suffix: String = common_affix(&["a 01v2.mkv", "b 02v2.mkv"], true)
            .into_iter()
            .collect();
        assert_eq!(suffix, "v2.mkv");
    }

    #[test]
    fn test_strip_hanging_backslash() {
        assert_eq!(strip_hanging_backslash(r"abc\"), "abc");
        assert_eq!(strip_hanging_backslash(r"abc\\"), r"abc\\");
        assert_eq!(strip_hanging_backslash("abc"), "abc");
    }
}
