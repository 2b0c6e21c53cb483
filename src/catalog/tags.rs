//! Keyword sanitation for catalog tags.

/// Tag used when nothing usable survives sanitation.
pub const FALLBACK_TAG: &str = "government-data";

pub const MAX_TAGS: usize = 30;
pub const MAX_TAG_LENGTH: usize = 50;

fn allowed(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ' ' | '-' | '.')
}

/// Split raw keyword strings, strip list punctuation and anything outside
/// word characters, spaces, `-`, `_` and `.`.
///
/// Output holds at most [`MAX_TAGS`] entries of at most [`MAX_TAG_LENGTH`]
/// characters and is never empty.
pub fn clean_keywords<S: AsRef<str>>(keywords: &[S]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();

    for raw in keywords {
        let stripped: String = raw
            .as_ref()
            .chars()
            .filter(|c| !matches!(c, '[' | ']' | '\'' | '"'))
            .collect();

        for part in stripped.split(',') {
            let kept: String = part.chars().filter(|c| allowed(*c)).collect();
            let kept = kept.trim();
            if kept.is_empty() {
                continue;
            }
            let tag: String = kept.chars().take(MAX_TAG_LENGTH).collect();
            let tag = tag.trim_end().to_string();
            if !cleaned.contains(&tag) {
                cleaned.push(tag);
            }
        }
    }

    cleaned.truncate(MAX_TAGS);
    if cleaned.is_empty() {
        cleaned.push(FALLBACK_TAG.to_string());
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_uses_fallback() {
        let none: [&str; 0] = [];
        assert_eq!(clean_keywords(&none), vec![FALLBACK_TAG]);
        assert_eq!(clean_keywords(&["  ", "!!!"]), vec![FALLBACK_TAG]);
    }

    #[test]
    fn keeps_cyrillic_and_strips_symbols() {
        let tags = clean_keywords(&["['образование', \"школы\"]", "COVID-19 (статистика)"]);
        assert_eq!(tags, vec!["образование", "школы", "COVID-19 статистика"]);
    }

    #[test]
    fn bounds_count_and_length() {
        let many: Vec<String> = (0..50).map(|i| format!("тег{}", i)).collect();
        let long = vec!["а".repeat(80)];

        let tags = clean_keywords(&many);
        assert_eq!(tags.len(), MAX_TAGS);

        let tags = clean_keywords(&long);
        assert_eq!(tags[0].chars().count(), MAX_TAG_LENGTH);
    }

    #[test]
    fn deduplicates() {
        let tags = clean_keywords(&["налоги, налоги", "налоги"]);
        assert_eq!(tags, vec!["налоги"]);
    }
}
