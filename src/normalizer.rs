// Code Normalizer - OCR repair for scanned prescription numbers
// Pure functions: substitution table + digit filter + stable dedup

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// SUBSTITUTION TABLE
// ============================================================================

/// Map one scanned character to its repaired digit.
///
/// Digits pass through unchanged; characters the scanner commonly confuses
/// with digits are replaced; everything else is dropped. The table entries
/// never collide (no output of one rule is an input of another), so a single
/// pass per character is equivalent to the original replace chain.
fn substitute(c: char) -> Option<char> {
    match c {
        '&' | '(' | 'G' => Some('6'),
        '\'' => Some('7'),
        ')' | 'O' | 'D' => Some('0'),
        'I' | 'l' => Some('1'),
        'S' | 's' => Some('5'),
        'B' => Some('8'),
        'Z' => Some('2'),
        '0'..='9' => Some(c),
        _ => None,
    }
}

/// Normalize one raw scanned code.
///
/// Returns the cleaned all-digit string, or `None` when nothing survives the
/// cleaning (the record is rejected, silently excluded from output).
pub fn normalize(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter_map(substitute).collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

// ============================================================================
// CATEGORY
// ============================================================================

/// Payer/program classification by leading digit.
///
/// APROSS codes start with `9`, PAMI codes with `8`. Store-level selection
/// matches the *raw* stored string's first character; export post-filtering
/// re-checks the *normalized* value. Both checks are intentional and kept
/// (the original application does the same without reconciling the two).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Apross,
    Pami,
}

impl Category {
    pub fn leading_digit(&self) -> char {
        match self {
            Category::Apross => '9',
            Category::Pami => '8',
        }
    }

    /// LIKE pattern for raw-prefix selection at the store level.
    pub fn raw_prefix_pattern(&self) -> String {
        format!("{}%", self.leading_digit())
    }

    /// Does a normalized code belong to this category?
    pub fn matches(&self, code: &str) -> bool {
        code.starts_with(self.leading_digit())
    }
}

// ============================================================================
// BATCH PIPELINE
// ============================================================================

/// Normalize a batch of raw codes for export.
///
/// Rejected (empty) results are dropped, the optional category filter is
/// applied on the normalized value, and duplicates are removed keeping the
/// first occurrence. Dedup runs only over values that pass the filter.
pub fn normalize_batch<I>(raws: I, category: Option<Category>) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut codes = Vec::new();

    for raw in raws {
        let Some(code) = normalize(raw.as_ref()) else {
            continue;
        };
        if let Some(cat) = category {
            if !cat.matches(&code) {
                continue;
            }
        }
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }

    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitution_table() {
        assert_eq!(normalize("O&I'B").as_deref(), Some("06178"));
        assert_eq!(normalize("S(l)").as_deref(), Some("5610"));
        assert_eq!(normalize("9D12").as_deref(), Some("9012"));
        assert_eq!(normalize("sZG").as_deref(), Some("526"));
    }

    #[test]
    fn test_unknown_characters_dropped() {
        assert_eq!(normalize("9A1").as_deref(), Some("91"));
        assert_eq!(normalize("  8-4 7/x").as_deref(), Some("847"));
    }

    #[test]
    fn test_empty_result_rejected() {
        assert_eq!(normalize("abc"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("- _ ."), None);
    }

    #[test]
    fn test_idempotent_on_clean_digits() {
        // Running normalize over an already-normalized string is a no-op.
        let once = normalize("O&I'B9D12").unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_category_leading_digit() {
        let code = normalize("9D12").unwrap();
        assert!(Category::Apross.matches(&code));
        assert!(!Category::Pami.matches(&code));
        assert_eq!(Category::Pami.raw_prefix_pattern(), "8%");
    }

    #[test]
    fn test_batch_dedup_preserves_first_occurrence_order() {
        let raws = ["8Z", "9A1", "8Z0", "9A1", "82"];
        // "8Z" -> "82" and the literal "82" collide; first occurrence wins.
        let codes = normalize_batch(raws, None);
        assert_eq!(codes, vec!["82", "91", "820"]);
    }

    #[test]
    fn test_batch_category_filter_before_dedup() {
        let raws = ["9A1", "9A1", "8B2"];
        let apross = normalize_batch(raws, Some(Category::Apross));
        assert_eq!(apross, vec!["91"]);

        let pami = normalize_batch(raws, Some(Category::Pami));
        assert_eq!(pami, vec!["882"]);
    }

    #[test]
    fn test_batch_drops_rejected_values() {
        let raws = ["abc", "9I", "", "xyz"];
        assert_eq!(normalize_batch(raws, None), vec!["91"]);
    }
}
