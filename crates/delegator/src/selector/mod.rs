//! Label selector parsing and matching.
//!
//! Grammar: comma separated clauses. Each clause is one of
//!
//! - `key` / `!key` (presence / absence)
//! - `key=value`, `key==value`, `key!=value` (`*` wildcards allowed on both sides)
//! - `key in (a,b)`, `key notin (a,b)`
//! - `key>n`, `key>=n`, `key<n`, `key<=n` (numeric label values)
//!
//! Clauses without wildcards or numeric comparisons can be evaluated by the
//! backing store. The rest is evaluated by the caller on the store's result.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use glob::Pattern;
use regex::Regex;
use thiserror::Error;

use crate::resource::Labels;

static BINARY_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([a-zA-Z0-9_.*/-]+)\s*(==|!=|>=|<=|=|>|<)\s*([^,]+)\s*$").unwrap()
});

static SET_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([a-zA-Z0-9_.*/-]+)\s+(in|notin)\s*\(([^()]*)\)\s*$").unwrap()
});

static PRESENCE_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(!?)\s*([a-zA-Z0-9_.*/-]+)\s*$").unwrap());

static VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.*/-]+$").unwrap());

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Invalid selector clause '{clause}': {reason}")]
    InvalidClause { clause: String, reason: String },

    #[error("Unbalanced parentheses in selector '{0}'")]
    Unbalanced(String),
}

impl SelectorError {
    fn invalid(clause: &str, reason: impl Into<String>) -> Self {
        SelectorError::InvalidClause {
            clause: clause.trim().to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

/// A single selector clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    Exists(String),
    NotExists(String),
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
    Compare { key: String, op: CompareOp, value: f64 },
}

impl Requirement {
    fn key(&self) -> &str {
        match self {
            Requirement::Exists(key) | Requirement::NotExists(key) => key,
            Requirement::Equals { key, .. }
            | Requirement::NotEquals { key, .. }
            | Requirement::In { key, .. }
            | Requirement::NotIn { key, .. }
            | Requirement::Compare { key, .. } => key,
        }
    }

    /// Whether a store with exact-match label queries can evaluate this clause.
    pub fn is_store_expressible(&self) -> bool {
        let values_plain = match self {
            Requirement::Compare { .. } => return false,
            Requirement::Exists(_) | Requirement::NotExists(_) => true,
            Requirement::Equals { value, .. } | Requirement::NotEquals { value, .. } => {
                !is_wildcard(value)
            }
            Requirement::In { values, .. } | Requirement::NotIn { values, .. } => {
                values.iter().all(|v| !is_wildcard(v))
            }
        };
        values_plain && !is_wildcard(self.key())
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        let values = values_for_key(labels, self.key());
        match self {
            Requirement::Exists(_) => !values.is_empty(),
            Requirement::NotExists(_) => values.is_empty(),
            Requirement::Equals { value, .. } => values.iter().any(|v| value_matches(value, v)),
            Requirement::NotEquals { value, .. } => !values.iter().any(|v| value_matches(value, v)),
            Requirement::In { values: set, .. } => values
                .iter()
                .any(|v| set.iter().any(|candidate| value_matches(candidate, v))),
            Requirement::NotIn { values: set, .. } => !values
                .iter()
                .any(|v| set.iter().any(|candidate| value_matches(candidate, v))),
            Requirement::Compare { op, value, .. } => values.iter().any(|v| {
                v.parse::<f64>()
                    .ok()
                    .and_then(|actual| actual.partial_cmp(value))
                    .is_some_and(|ordering| op.holds(ordering))
            }),
        }
    }

    fn parse(clause: &str) -> Result<Self, SelectorError> {
        if let Some(caps) = SET_CLAUSE.captures(clause) {
            let key = caps[1].to_string();
            let values = caps[3]
                .split(',')
                .map(|v| v.trim().to_string())
                .collect::<Vec<_>>();
            if values.iter().any(|v| !VALUE.is_match(v)) {
                return Err(SelectorError::invalid(clause, "invalid value in set"));
            }
            return Ok(match &caps[2] {
                "in" => Requirement::In { key, values },
                _ => Requirement::NotIn { key, values },
            });
        }

        if let Some(caps) = BINARY_CLAUSE.captures(clause) {
            let key = caps[1].to_string();
            let raw = caps[3].trim();
            if !VALUE.is_match(raw) {
                return Err(SelectorError::invalid(clause, format!("invalid value '{}'", raw)));
            }
            let value = raw.to_string();
            let op = match &caps[2] {
                "=" | "==" => return Ok(Requirement::Equals { key, value }),
                "!=" => return Ok(Requirement::NotEquals { key, value }),
                ">" => CompareOp::Gt,
                ">=" => CompareOp::Ge,
                "<" => CompareOp::Lt,
                _ => CompareOp::Le,
            };
            let number = raw
                .parse::<f64>()
                .map_err(|_| SelectorError::invalid(clause, "numeric comparison needs a number"))?;
            return Ok(Requirement::Compare { key, op, value: number });
        }

        if let Some(caps) = PRESENCE_CLAUSE.captures(clause) {
            let key = caps[2].to_string();
            return Ok(if caps[1].is_empty() {
                Requirement::Exists(key)
            } else {
                Requirement::NotExists(key)
            });
        }

        Err(SelectorError::invalid(clause, "unrecognized clause"))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Exists(key) => write!(f, "{}", key),
            Requirement::NotExists(key) => write!(f, "!{}", key),
            Requirement::Equals { key, value } => write!(f, "{}={}", key, value),
            Requirement::NotEquals { key, value } => write!(f, "{}!={}", key, value),
            Requirement::In { key, values } => write!(f, "{} in ({})", key, values.join(",")),
            Requirement::NotIn { key, values } => {
                write!(f, "{} notin ({})", key, values.join(","))
            }
            Requirement::Compare { key, op, value } => {
                write!(f, "{}{}{}", key, op.symbol(), value)
            }
        }
    }
}

/// A parsed selector: the conjunction of its requirements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Matches everything.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let requirements = split_clauses(input)?
            .into_iter()
            .map(Requirement::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Splits into the part the store can evaluate and the part the caller
    /// must evaluate on the store's result.
    pub fn split(self) -> (Selector, Selector) {
        let (store, caller): (Vec<_>, Vec<_>) = self
            .requirements
            .into_iter()
            .partition(Requirement::is_store_expressible);
        (
            Selector { requirements: store },
            Selector {
                requirements: caller,
            },
        )
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", clauses.join(","))
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

/// Splits on top-level commas, leaving commas inside `( )` alone.
fn split_clauses(input: &str) -> Result<Vec<&str>, SelectorError> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::Unbalanced(input.to_string()))?;
            }
            ',' if depth == 0 => {
                clauses.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::Unbalanced(input.to_string()));
    }
    clauses.push(&input[start..]);

    // A blank selector selects everything; a blank clause inside one is an error.
    if clauses.len() == 1 && clauses[0].trim().is_empty() {
        return Ok(Vec::new());
    }
    if let Some(blank) = clauses.iter().find(|c| c.trim().is_empty()) {
        return Err(SelectorError::invalid(blank, "empty clause"));
    }
    Ok(clauses)
}

fn is_wildcard(s: &str) -> bool {
    s.contains('*')
}

fn value_matches(expected: &str, actual: &str) -> bool {
    if is_wildcard(expected) {
        Pattern::new(expected).is_ok_and(|p| p.matches(actual))
    } else {
        expected == actual
    }
}

/// Label values whose key matches `key`, which may contain wildcards.
fn values_for_key<'a>(labels: &'a Labels, key: &str) -> Vec<&'a str> {
    if !is_wildcard(key) {
        return labels.get(key).map(String::as_str).into_iter().collect();
    }
    match Pattern::new(key) {
        Ok(pattern) => labels
            .iter()
            .filter(|(k, _)| pattern.matches(k))
            .map(|(_, v)| v.as_str())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn matches(selector: &str, pairs: &[(&str, &str)]) -> bool {
        Selector::parse(selector).unwrap().matches(&labels(pairs))
    }

    #[test]
    fn test_equality() {
        assert!(matches("tier=prod", &[("tier", "prod")]));
        assert!(matches("tier==prod", &[("tier", "prod")]));
        assert!(!matches("tier=prod", &[("tier", "production")]));
        assert!(!matches("tier=prod", &[("env", "prod")]));
    }

    #[test]
    fn test_set_membership_equals_equality() {
        for pairs in [
            vec![("tier", "prod")],
            vec![("tier", "dev")],
            vec![("env", "prod")],
        ] {
            assert_eq!(matches("tier in (prod)", &pairs), matches("tier=prod", &pairs));
        }
        assert!(matches("tier in (dev, prod)", &[("tier", "prod")]));
        assert!(matches("tier notin (dev)", &[("tier", "prod")]));
        assert!(matches("tier notin (dev)", &[]));
    }

    #[test]
    fn test_value_wildcard() {
        assert!(matches("env=stag*", &[("env", "staging")]));
        assert!(!matches("env=stag*", &[("env", "production")]));
    }

    #[test]
    fn test_key_wildcard_matches_any_label() {
        assert!(matches("team.*=core", &[("team.a", "web"), ("team.b", "core")]));
        assert!(!matches("team.*=core", &[("team.a", "web")]));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(matches("rank>2", &[("rank", "3")]));
        assert!(!matches("rank>2", &[("rank", "2")]));
        assert!(matches("rank>=2", &[("rank", "2")]));
        assert!(matches("rank<2.5", &[("rank", "2")]));
        assert!(!matches("rank>2", &[("rank", "high")]));
        assert!(!matches("rank>2", &[]));
    }

    #[test]
    fn test_presence() {
        assert!(matches("tier", &[("tier", "")]));
        assert!(!matches("tier", &[]));
        assert!(matches("!tier", &[]));
        assert!(!matches("!tier", &[("tier", "x")]));
    }

    #[test]
    fn test_not_equals_matches_missing_key() {
        assert!(matches("tier!=prod", &[]));
        assert!(!matches("tier!=prod", &[("tier", "prod")]));
    }

    #[test]
    fn test_conjunction() {
        assert!(matches("tier=prod,env=prod", &[("tier", "prod"), ("env", "prod")]));
        assert!(!matches("tier=prod,env=prod", &[("tier", "prod"), ("env", "staging")]));
    }

    #[test]
    fn test_invalid_selectors() {
        for input in ["tier=+=prod", "tier=", "=prod", "tier in (a", "a,,b", "rank>high", "tier in (a b)"] {
            assert!(Selector::parse(input).is_err(), "{} should not parse", input);
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = Selector::parse("  ").unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn test_split_pushes_down_exact_clauses() {
        let (store, caller) = Selector::parse("tier=prod,env=stag*,rank>2,zone in (a,b),!legacy")
            .unwrap()
            .split();
        assert_eq!(store.to_string(), "tier=prod,zone in (a,b),!legacy");
        assert_eq!(caller.to_string(), "env=stag*,rank>2");
    }
}
