//! Output comparator
//!
//! Applies a submission's comparison policy to the program output and the
//! expected output. The comparator returns a plain boolean; mapping it onto
//! verdicts is the runner's job.

use crate::models::SubmissionSettings;

/// Compare program output against the expected output under the given
/// settings. Transformations apply in a fixed order: trim, case folding,
/// whitespace normalization; the transformed strings are then compared
/// byte-for-byte.
pub fn outputs_match(actual: &str, expected: &str, settings: &SubmissionSettings) -> bool {
    let mut actual = actual.to_string();
    let mut expected = expected.to_string();

    if settings.trim {
        actual = actual.trim().to_string();
        expected = expected.trim().to_string();
    }

    if !settings.case_sensitive {
        actual = actual.to_ascii_lowercase();
        expected = expected.to_ascii_lowercase();
    }

    if settings.whitespace_normalize {
        actual = normalize_whitespace(&actual);
        expected = normalize_whitespace(&expected);
    }

    actual == expected
}

/// Collapse each line's runs of ASCII whitespace to a single space (dropping
/// leading and trailing runs), then remove trailing empty lines.
fn normalize_whitespace(s: &str) -> String {
    let mut lines: Vec<String> = s
        .lines()
        .map(|line| line.split_ascii_whitespace().collect::<Vec<_>>().join(" "))
        .collect();

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(trim: bool, case_sensitive: bool, whitespace_normalize: bool) -> SubmissionSettings {
        SubmissionSettings {
            trim,
            case_sensitive,
            whitespace_normalize,
        }
    }

    #[test]
    fn test_exact_match_without_settings() {
        let s = settings(false, true, false);
        assert!(outputs_match("hello", "hello", &s));
        assert!(!outputs_match("hello\n", "hello", &s));
    }

    #[test]
    fn test_trim_strips_surrounding_whitespace() {
        let s = settings(true, true, false);
        assert!(outputs_match("hi\n", "hi", &s));
        assert!(outputs_match("\t hi \r\n", "hi", &s));
        assert!(!outputs_match("h i", "hi", &s));
    }

    #[test]
    fn test_case_insensitive_folds_ascii() {
        assert!(!outputs_match("HI", "hi", &settings(false, true, false)));
        assert!(outputs_match("HI", "hi", &settings(false, false, false)));
    }

    #[test]
    fn test_whitespace_normalize_collapses_runs() {
        let s = settings(false, true, true);
        assert!(outputs_match("1  2\t3", "1 2 3", &s));
        assert!(outputs_match("  1 2  ", "1 2", &s));
    }

    #[test]
    fn test_whitespace_normalize_drops_trailing_empty_lines() {
        let s = settings(false, true, true);
        assert!(outputs_match("a\nb\n\n\n", "a\nb", &s));
        // Interior empty lines stay significant.
        assert!(!outputs_match("a\n\nb", "a\nb", &s));
    }

    #[test]
    fn test_transformations_compose() {
        let s = settings(true, false, true);
        assert!(outputs_match(" Foo   Bar \n\n", "foo bar", &s));
    }
}
