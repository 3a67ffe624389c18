//! Include/exclude keyword matching on posting titles.

use std::collections::BTreeSet;

use crate::models::Destination;

/// Case-insensitive substring policy:
/// `(include empty OR any include hit) AND no exclude hit`.
pub fn matches<S>(title: &str, include: &BTreeSet<S>, exclude: &BTreeSet<S>) -> bool
where
    S: AsRef<str> + Ord,
{
    let title = title.to_lowercase();
    let hit = |keyword: &S| title.contains(&keyword.as_ref().to_lowercase());

    let included = include.is_empty() || include.iter().any(hit);
    included && !exclude.iter().any(hit)
}

/// Apply a destination's keyword sets to a title.
pub fn destination_matches(destination: &Destination, title: &str) -> bool {
    matches(
        title,
        &destination.include_keywords,
        &destination.exclude_keywords,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_include_admits_everything() {
        let none = set(&[]);
        assert!(matches("Backend Engineer", &none, &none));
    }

    #[test]
    fn exclude_rejects_on_substring() {
        let none = set(&[]);
        let exclude = set(&["intern"]);
        for title in [
            "Software Intern",
            "INTERNATIONAL Sales",
            "Internship - Data",
            "Data Analyst",
            "Customer Success",
        ] {
            let expected = !title.to_lowercase().contains("intern");
            assert_eq!(matches(title, &none, &exclude), expected, "{title}");
        }
    }

    #[test]
    fn include_is_substring_not_word_match() {
        let include = set(&["student"]);
        let none = set(&[]);
        assert!(matches("Students wanted", &include, &none));
        assert!(matches("STUDENT Assistant", &include, &none));
        assert!(!matches("Graduate Analyst", &include, &none));
    }

    #[test]
    fn exclude_beats_include() {
        let include = set(&["student"]);
        let exclude = set(&["senior"]);
        assert!(matches("Student Data Analyst", &include, &exclude));
        assert!(!matches("Senior Student Advisor", &include, &exclude));
    }

    #[test]
    fn mixed_case_keywords_still_match() {
        let include = set(&["Data"]);
        let none = set(&[]);
        assert!(matches("big data engineer", &include, &none));
    }
}
