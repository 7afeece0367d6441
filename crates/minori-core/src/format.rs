//! Text shaping for presence payloads.

/// Unicode ranges treated as CJK when deciding quote style.
const CJK_RANGES: &[(u32, u32)] = &[
    (0x3300, 0x33FF),
    (0xFE30, 0xFE4F),
    (0xF900, 0xFAFF),
    (0x2F800, 0x2FA1F),
    (0x3040, 0x309F),
    (0x30A0, 0x30FF),
    (0x2E80, 0x2EFF),
    (0x4E00, 0x9FFF),
    (0x3400, 0x4DBF),
    (0x20000, 0x2A6DF),
    (0x2A700, 0x2B73F),
    (0x2B740, 0x2B81F),
    (0x2B820, 0x2CEAF),
];

fn is_cjk(c: char) -> bool {
    let cp = c as u32;
    CJK_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&cp))
}

/// Quote a title, with corner brackets when it contains CJK characters.
/// Text that already starts or ends quoted is left alone.
pub fn quote(text: &str) -> String {
    if text.chars().any(is_cjk) {
        if text.starts_with(['「', '『']) || text.ends_with(['」', '』']) {
            return text.to_string();
        }
        return format!("「{text}」");
    }

    if text.starts_with('"') || text.ends_with('"') {
        return text.to_string();
    }
    format!("\"{text}\"")
}

/// Format a millisecond offset as `H:MM:SS`.
pub fn ms2timestamp(ms: u64) -> String {
    let total = ms / 1000;
    let h = total / 3600;
    let m = total % 3600 / 60;
    let s = total % 60;
    format!("{h}:{m:02}:{s:02}")
}

/// Cap `text` at `max` characters, replacing the tail with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ascii() {
        assert_eq!(quote("Dandadan"), "\"Dandadan\"");
    }

    #[test]
    fn test_quote_cjk_uses_corner_brackets() {
        assert_eq!(quote("ダンダダン"), "「ダンダダン」");
        assert_eq!(quote("Re:ゼロから始める異世界生活"), "「Re:ゼロから始める異世界生活」");
    }

    #[test]
    fn test_quote_leaves_quoted_text_alone() {
        assert_eq!(quote("\"Dandadan\""), "\"Dandadan\"");
        assert_eq!(quote("「ダンダダン」"), "「ダンダダン」");
        assert_eq!(quote("『ダンダダン』"), "『ダンダダン』");
    }

    #[test]
    fn test_ms2timestamp() {
        assert_eq!(ms2timestamp(0), "0:00:00");
        assert_eq!(ms2timestamp(83_000), "0:01:23");
        assert_eq!(ms2timestamp(4_271_000), "1:11:11");
        assert_eq!(ms2timestamp(999), "0:00:00");
    }

    #[test]
    fn test_truncate_long_text() {
        let details: String = "a".repeat(200);
        let truncated = truncate(&details, 128);
        assert_eq!(truncated.chars().count(), 128);
        assert!(truncated.ends_with('…'));
        assert!(truncated.starts_with("aaa"));
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate("short", 128), "short");
        let exact: String = "b".repeat(128);
        assert_eq!(truncate(&exact, 128), exact);
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let title: String = "ダ".repeat(200);
        let truncated = truncate(&title, 128);
        assert_eq!(truncated.chars().count(), 128);
    }
}
