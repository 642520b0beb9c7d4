// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Destination number classification.

use anyhow::{Context, Result};
use regex::Regex;
use smol_str::SmolStr;
use tracing::warn;

/// Class returned when no rule matches or no number is present.
pub const UNKNOWN_CLASS: &str = "unknown";

/// Ordered destination-number classification rules, compiled once at
/// startup from the configured `(regex, class)` list.
#[derive(Debug, Clone)]
pub struct ClassRules {
    rules: Vec<(Regex, SmolStr)>,
}

impl ClassRules {
    /// Compiles the configured rules.
    ///
    /// Patterns beginning with `^+` are skipped with a warning: `+` right
    /// after the anchor is a repetition operator, and a rule written that
    /// way almost certainly meant `^\+` to match a literal plus. Other
    /// compile failures are errors.
    pub fn compile(defs: &[(String, SmolStr)]) -> Result<Self> {
        let mut rules = Vec::with_capacity(defs.len());
        for (pattern, class) in defs {
            if pattern.starts_with("^+") {
                warn!(
                    pattern = %pattern,
                    class = %class,
                    "number class regex starts with \"^+\" (missing backslash?), rule skipped"
                );
                continue;
            }
            let regex = Regex::new(pattern)
                .with_context(|| format!("invalid number class regex {:?}", pattern))?;
            rules.push((regex, class.clone()));
        }
        Ok(Self { rules })
    }

    /// Classifies a destination number: first matching rule wins.
    pub fn classify(&self, number: Option<&str>) -> SmolStr {
        let number = match number {
            Some(number) => number,
            None => return SmolStr::new(UNKNOWN_CLASS),
        };
        for (regex, class) in &self.rules {
            if regex.is_match(number) {
                return class.clone();
            }
        }
        SmolStr::new(UNKNOWN_CLASS)
    }

    /// Number of active (compiled) rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(defs: &[(&str, &str)]) -> ClassRules {
        let defs: Vec<(String, SmolStr)> = defs
            .iter()
            .map(|(pattern, class)| (pattern.to_string(), SmolStr::new(*class)))
            .collect();
        ClassRules::compile(&defs).unwrap()
    }

    #[test]
    fn first_match_wins() {
        let rules = rules(&[("^123", "internal"), ("^00", "external"), ("^1", "late")]);
        assert_eq!(rules.classify(Some("1234")), "internal");
        assert_eq!(rules.classify(Some("00234")), "external");
        // "^1" would also match "1234" but comes after "^123".
        assert_eq!(rules.classify(Some("19")), "late");
    }

    #[test]
    fn no_match_is_unknown() {
        let rules = rules(&[("^123", "internal"), ("^00", "external")]);
        assert_eq!(rules.classify(Some("9")), UNKNOWN_CLASS);
    }

    #[test]
    fn missing_number_is_unknown() {
        let rules = rules(&[("^123", "internal")]);
        assert_eq!(rules.classify(None), UNKNOWN_CLASS);
    }

    #[test]
    fn empty_rule_set_is_unknown() {
        let rules = rules(&[]);
        assert_eq!(rules.classify(Some("1234")), UNKNOWN_CLASS);
    }

    #[test]
    fn caret_plus_rule_is_skipped() {
        let rules = rules(&[("^+1", "internal")]);
        assert!(rules.is_empty());
        assert_eq!(rules.classify(Some("+123")), UNKNOWN_CLASS);
    }

    #[test]
    fn escaped_plus_matches_literally() {
        let rules = rules(&[(r"^\+1", "international")]);
        assert_eq!(rules.classify(Some("+123")), "international");
        assert_eq!(rules.classify(Some("123")), UNKNOWN_CLASS);
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let defs = vec![("(".to_string(), SmolStr::new("broken"))];
        assert!(ClassRules::compile(&defs).is_err());
    }
}
