//! Label cleaning rules.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Characters that cannot appear in a path component on the machines the
/// dataset travels between.
const ILLEGAL_PATH_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Whether label case is significant for class assignment.
///
/// Some tasks treat "Vehicle" and "vehicle" as one class, others must keep
/// them apart, so this is always chosen per deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CasePolicy {
    /// Keep labels as annotated.
    Preserve,
    /// Lower-case labels before lookup.
    #[default]
    Lowercase,
}

impl CasePolicy {
    /// Name used in reports and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            CasePolicy::Preserve => "preserve",
            CasePolicy::Lowercase => "lowercase",
        }
    }
}

/// Turns raw display labels into the cleaned form used for class lookup and
/// folder names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LabelCleaner {
    pub case: CasePolicy,
}

impl LabelCleaner {
    pub fn new(case: CasePolicy) -> Self {
        Self { case }
    }

    /// Trims, replaces path-illegal characters with `_`, then applies the
    /// case policy. Returns `None` when nothing is left.
    ///
    /// A label made only of dots would name the current or parent directory,
    /// so each dot becomes `_` as well.
    pub fn clean(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let dots_only = trimmed.chars().all(|c| c == '.');
        let replaced: String = trimmed
            .chars()
            .map(|c| {
                if dots_only || ILLEGAL_PATH_CHARS.contains(&c) {
                    '_'
                } else {
                    c
                }
            })
            .collect();

        Some(match self.case {
            CasePolicy::Preserve => replaced,
            CasePolicy::Lowercase => replaced.to_lowercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_replaces_illegal_characters() {
        let cleaner = LabelCleaner::new(CasePolicy::Preserve);
        assert_eq!(
            cleaner.clean("  car/truck: big?  ").as_deref(),
            Some("car_truck_ big_")
        );
        assert_eq!(cleaner.clean(r#"a\b*c"d<e>f|g"#).as_deref(), Some("a_b_c_d_e_f_g"));
    }

    #[test]
    fn case_policy_is_applied_last() {
        assert_eq!(
            LabelCleaner::new(CasePolicy::Lowercase).clean(" Vehicle ").as_deref(),
            Some("vehicle")
        );
        assert_eq!(
            LabelCleaner::new(CasePolicy::Preserve).clean(" Vehicle ").as_deref(),
            Some("Vehicle")
        );
    }

    #[test]
    fn blank_labels_clean_to_none() {
        let cleaner = LabelCleaner::default();
        assert_eq!(cleaner.clean(""), None);
        assert_eq!(cleaner.clean(" \t\n"), None);
    }

    #[test]
    fn punctuation_only_labels_survive_as_underscores() {
        assert_eq!(LabelCleaner::default().clean("??").as_deref(), Some("__"));
    }

    #[test]
    fn dot_labels_never_name_a_directory_link() {
        let cleaner = LabelCleaner::default();
        assert_eq!(cleaner.clean("..").as_deref(), Some("__"));
        assert_eq!(cleaner.clean(" . ").as_deref(), Some("_"));
        assert_eq!(cleaner.clean("a.b").as_deref(), Some("a.b"));
        assert_eq!(cleaner.clean("../x").as_deref(), Some(".._x"));
    }
}
