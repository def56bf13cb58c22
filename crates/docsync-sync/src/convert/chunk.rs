//! Size limiting for rich-text runs
//!
//! A run longer than the limit is cut into chunks of at most `limit`
//! characters. A chunk ends at the last separator inside the window when that
//! position is past [`MIN_SOFT_CUT`], and the separator itself is dropped.
//! Otherwise the chunk is cut hard at exactly `limit` characters, so a chunk
//! of full length always marks a hard cut. [`join_chunks`] relies on that to
//! rebuild the original text.

/// Separator positions at or before this index are not used as cut points
pub const MIN_SOFT_CUT: usize = 100;

/// How a chunk boundary may be chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutRule {
    /// Cut at the last separator if it lies past [`MIN_SOFT_CUT`]
    Soft(char),
    /// Cut at the last separator wherever it lies
    Always(char),
}

impl CutRule {
    /// The separator character
    pub fn separator(self) -> char {
        match self {
            Self::Soft(c) | Self::Always(c) => c,
        }
    }

    fn accepts(self, position: usize) -> bool {
        match self {
            Self::Soft(_) => position > MIN_SOFT_CUT,
            Self::Always(_) => position > 0,
        }
    }
}

/// Split `text` into chunks of at most `limit` characters
pub fn split_text(text: &str, limit: usize, rule: CutRule) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if limit == 0 || chars.len() <= limit {
        return vec![text.to_string()];
    }

    let separator = rule.separator();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + limit).min(chars.len());
        let window = &chars[start..end];

        if end == chars.len() {
            chunks.push(window.iter().collect());
            break;
        }

        match window.iter().rposition(|c| *c == separator) {
            Some(cut) if rule.accepts(cut) => {
                chunks.push(window[..cut].iter().collect());
                start += cut + 1;
            }
            _ => {
                chunks.push(window.iter().collect());
                start = end;
            }
        }
    }

    chunks
}

/// Rebuild the text that [`split_text`] was given
pub fn join_chunks<S: AsRef<str>>(chunks: &[S], limit: usize, separator: char) -> String {
    let mut text = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let chunk = chunk.as_ref();
        text.push_str(chunk);
        if i + 1 < chunks.len() && chunk.chars().count() < limit {
            text.push(separator);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LIMIT: usize = 1800;

    #[test]
    fn test_short_text_is_untouched() {
        assert_eq!(split_text("hello world", LIMIT, CutRule::Soft(' ')), vec!["hello world"]);
        assert_eq!(split_text("", LIMIT, CutRule::Soft(' ')), vec![""]);
    }

    #[test]
    fn test_soft_cut_at_last_space() {
        let text = format!("{} {}", "a".repeat(1500), "b".repeat(1000));
        let chunks = split_text(&text, LIMIT, CutRule::Soft(' '));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(1500));
        assert_eq!(chunks[1], "b".repeat(1000));
    }

    #[test]
    fn test_early_separator_forces_hard_cut() {
        let text = format!("{} {}", "a".repeat(50), "b".repeat(3000));
        let chunks = split_text(&text, LIMIT, CutRule::Soft(' '));

        assert_eq!(chunks[0].chars().count(), LIMIT);
        assert_eq!(join_chunks(&chunks, LIMIT, ' '), text);
    }

    #[test]
    fn test_always_rule_cuts_at_short_lines() {
        let text = format!("key: 1\n{}", "x".repeat(2000));
        let soft = split_text(&text, LIMIT, CutRule::Soft('\n'));
        let always = split_text(&text, LIMIT, CutRule::Always('\n'));

        assert_eq!(soft[0].chars().count(), LIMIT);
        assert_eq!(always[0], "key: 1");
        assert_eq!(join_chunks(&always, LIMIT, '\n'), text);
    }

    #[test]
    fn test_multibyte_text_is_counted_in_characters() {
        let text = "日本語 ".repeat(700);
        let chunks = split_text(&text, LIMIT, CutRule::Soft(' '));

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= LIMIT));
        assert_eq!(join_chunks(&chunks, LIMIT, ' '), text);
    }

    proptest! {
        #[test]
        fn test_chunks_reconstruct_input(
            words in prop::collection::vec("[a-z]{0,300}", 1..40),
            newline in any::<bool>(),
            always in any::<bool>(),
        ) {
            let separator = if newline { '\n' } else { ' ' };
            let text = words.join(&separator.to_string());
            let rule = if always { CutRule::Always(separator) } else { CutRule::Soft(separator) };
            let chunks = split_text(&text, LIMIT, rule);

            prop_assert!(chunks.iter().all(|c| c.chars().count() <= LIMIT));
            if text.chars().count() > LIMIT {
                prop_assert!(chunks.len() >= 2);
            }
            prop_assert_eq!(join_chunks(&chunks, LIMIT, separator), text);
        }
    }
}
