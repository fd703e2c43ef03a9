//! Title -> branch-name slug rule: lowercase; collapse every run of non-`[a-z0-9]`
//! characters into a single `-`; trim leading/trailing `-`.

use std::sync::LazyLock;

use regex::Regex;

static NON_ALNUM_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let collapsed = NON_ALNUM_RUN.replace_all(&lowered, "-");
    collapsed.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_spaces_and_numbers() {
        assert_eq!(slugify("Fix Bug 42"), "fix-bug-42");
    }

    #[test]
    fn test_slugify_collapses_special_runs() {
        assert_eq!(slugify("Fix   bug!!  42"), "fix-bug-42");
    }

    #[test]
    fn test_slugify_trims_leading_trailing_dashes() {
        assert_eq!(slugify("  !!! hello !!!  "), "hello");
    }

    #[test]
    fn test_slugify_collision_candidates() {
        assert_eq!(slugify("Fix bug!"), slugify("Fix bug?"));
    }
}
