//! Label matchers used to select series.
//!
//! A matcher constrains one label to an exact value, a negated exact value,
//! a regex or a negated regex. A label that is absent from a series matches
//! as the empty string, so `job=""` selects series without a `job` label.

use std::fmt;

use regex::Regex;

use crate::error::QueryError;
use crate::labels::{Labels, METRIC_NAME_LABEL};

/// Comparison performed by a [`Matcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    /// `name="value"`
    Equal,
    /// `name!="value"`
    NotEqual,
    /// `name=~"regex"`
    Regex,
    /// `name!~"regex"`
    NotRegex,
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        })
    }
}

/// A predicate over the value of one label.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    op: MatchOp,
    value: String,
    /// Anchored pattern, present only for the regex operators.
    regex: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher, compiling the pattern for regex operators.
    ///
    /// Regex patterns are fully anchored: `a|b` matches `a` or `b`, never
    /// `abc`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidMatcher`] if a regex pattern does not compile.
    pub fn new(
        op: MatchOp,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, QueryError> {
        let name = name.into();
        let value = value.into();
        let regex = match op {
            MatchOp::Regex | MatchOp::NotRegex => Some(
                Regex::new(&format!("^(?:{value})$")).map_err(|source| {
                    QueryError::InvalidMatcher {
                        name: name.clone(),
                        pattern: value.clone(),
                        source,
                    }
                })?,
            ),
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(Self {
            name,
            op,
            value,
            regex,
        })
    }

    /// Shorthand for an exact-match matcher.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            value: value.into(),
            regex: None,
        }
    }

    /// Shorthand for a negated exact-match matcher.
    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::NotEqual,
            value: value.into(),
            regex: None,
        }
    }

    /// Shorthand for `__name__="<metric>"`.
    pub fn metric_name(metric: impl Into<String>) -> Self {
        Self::equal(METRIC_NAME_LABEL, metric)
    }

    /// The label name this matcher constrains.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The comparison operator.
    pub fn op(&self) -> MatchOp {
        self.op
    }

    /// The literal value or pattern.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Tests a single label value.
    pub fn matches_value(&self, value: &str) -> bool {
        match (self.op, &self.regex) {
            (MatchOp::Equal, _) => value == self.value,
            (MatchOp::NotEqual, _) => value != self.value,
            (MatchOp::Regex, Some(re)) => re.is_match(value),
            (MatchOp::NotRegex, Some(re)) => !re.is_match(value),
            // Regex ops are only constructed through `new`, which always compiles.
            (MatchOp::Regex | MatchOp::NotRegex, None) => false,
        }
    }

    /// Tests a label set; an absent label matches as the empty string.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.matches_value(labels.get(&self.name).unwrap_or(""))
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

/// Returns `true` if every matcher accepts `labels`.
///
/// An empty matcher list accepts every series.
pub fn matches_all(matchers: &[Matcher], labels: &Labels) -> bool {
    matchers.iter().all(|matcher| matcher.matches(labels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(job: &str) -> Labels {
        Labels::from_pairs([("__name__", "up"), ("job", job)])
    }

    #[test]
    fn test_equal_and_not_equal() {
        let eq = Matcher::equal("job", "a");
        let ne = Matcher::not_equal("job", "a");

        assert!(eq.matches(&series("a")));
        assert!(!eq.matches(&series("b")));
        assert!(!ne.matches(&series("a")));
        assert!(ne.matches(&series("b")));
    }

    #[test]
    fn test_regex_is_anchored() {
        let re = Matcher::new(MatchOp::Regex, "job", "a|b").unwrap();
        assert!(re.matches(&series("a")));
        assert!(re.matches(&series("b")));
        assert!(!re.matches(&series("ab")));
        assert!(!re.matches(&series("c")));

        let nre = Matcher::new(MatchOp::NotRegex, "job", "a.*").unwrap();
        assert!(!nre.matches(&series("api")));
        assert!(nre.matches(&series("batch")));
    }

    #[test]
    fn test_absent_label_matches_empty_string() {
        let labels = Labels::from_pairs([("__name__", "up")]);

        assert!(Matcher::equal("job", "").matches(&labels));
        assert!(!Matcher::equal("job", "a").matches(&labels));
        assert!(Matcher::not_equal("job", "a").matches(&labels));
        assert!(Matcher::new(MatchOp::Regex, "job", "a?").unwrap().matches(&labels));
    }

    #[test]
    fn test_invalid_regex() {
        let result = Matcher::new(MatchOp::Regex, "job", "(unclosed");
        assert!(matches!(result, Err(QueryError::InvalidMatcher { .. })));
    }

    #[test]
    fn test_matches_all() {
        let labels = series("a");
        assert!(matches_all(&[], &labels));
        assert!(matches_all(
            &[Matcher::metric_name("up"), Matcher::equal("job", "a")],
            &labels
        ));
        assert!(!matches_all(
            &[Matcher::metric_name("up"), Matcher::equal("job", "b")],
            &labels
        ));
    }

    #[test]
    fn test_display() {
        let m = Matcher::new(MatchOp::NotRegex, "job", "a|b").unwrap();
        assert_eq!(m.to_string(), r#"job!~"a|b""#);
    }
}
