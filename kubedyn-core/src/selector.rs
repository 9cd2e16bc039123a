//! Label and field selectors.
use std::{
    cmp::PartialEq,
    collections::{BTreeMap, BTreeSet},
    fmt,
    iter::FromIterator,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::Error;

// local type aliases
type Map = BTreeMap<String, String>;
type Expressions = Vec<Expression>;

/// A selector expression with existing operations
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Expression {
    /// Key exists and its value is one of the given set
    In(String, BTreeSet<String>),
    /// Key does not exist, or exists with a value outside the given set
    NotIn(String, BTreeSet<String>),
    /// Key exists with exactly the given value
    Equal(String, String),
    /// Key does not exist, or exists with another value
    NotEqual(String, String),
    /// Key exists
    Exists(String),
    /// Key does not exist
    DoesNotExist(String),
}

/// Perform selection on a list of expressions
///
/// Renders to (and parses from) the Kubernetes selector string grammar:
/// `k=v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k`, `!k`, comma-joined.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct Selector(Expressions);

impl Selector {
    /// Create a selector from a vector of expressions
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self(exprs)
    }

    /// Create a selector from a map of key=value label matches
    pub fn from_map(map: Map) -> Self {
        Self(map.into_iter().map(|(k, v)| Expression::Equal(k, v)).collect())
    }

    /// Indicates whether this selector matches everything
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Extend the selector with another expression
    pub fn push(&mut self, expr: Expression) {
        self.0.push(expr);
    }

    /// Evaluate the selector against a concrete label map
    pub fn matches(&self, labels: &Map) -> bool {
        self.0.iter().all(|e| e.matches(labels))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::In(key, values) => {
                write!(
                    f,
                    "{key} in ({})",
                    values.iter().cloned().collect::<Vec<_>>().join(",")
                )
            }
            Expression::NotIn(key, values) => {
                write!(
                    f,
                    "{key} notin ({})",
                    values.iter().cloned().collect::<Vec<_>>().join(",")
                )
            }
            Expression::Equal(key, value) => write!(f, "{key}={value}"),
            Expression::NotEqual(key, value) => write!(f, "{key}!={value}"),
            Expression::Exists(key) => write!(f, "{key}"),
            Expression::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selectors: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        f.write_str(&selectors.join(","))
    }
}

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self {
            Expression::In(key, values) => match labels.get(key) {
                Some(v) => values.contains(v),
                None => false,
            },
            Expression::NotIn(key, values) => match labels.get(key) {
                Some(v) => !values.contains(v),
                None => true,
            },
            Expression::Exists(key) => labels.contains_key(key),
            Expression::DoesNotExist(key) => !labels.contains_key(key),
            Expression::Equal(key, value) => labels.get(key) == Some(value),
            Expression::NotEqual(key, value) => labels.get(key) != Some(value),
        }
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut exprs = Vec::new();
        for part in split_outside_parens(s) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            exprs.push(parse_expression(part)?);
        }
        Ok(Selector(exprs))
    }
}

// Split on commas that are not enclosed in a `(..)` value set.
fn split_outside_parens(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_expression(part: &str) -> Result<Expression, Error> {
    let invalid = || Error::Validation(format!("invalid selector expression: {part:?}"));

    if let Some(key) = part.strip_prefix('!') {
        let key = key.trim();
        if key.is_empty() {
            return Err(invalid());
        }
        return Ok(Expression::DoesNotExist(key.to_string()));
    }
    if let Some((key, values)) = split_set_expression(part, " notin ") {
        return Ok(Expression::NotIn(key, values));
    }
    if let Some((key, values)) = split_set_expression(part, " in ") {
        return Ok(Expression::In(key, values));
    }
    if let Some((key, value)) = part.split_once("!=") {
        return Ok(Expression::NotEqual(key.trim().to_string(), value.trim().to_string()));
    }
    if let Some((key, value)) = part.split_once('=') {
        // tolerate the kubectl `==` spelling
        let value = value.strip_prefix('=').unwrap_or(value);
        return Ok(Expression::Equal(key.trim().to_string(), value.trim().to_string()));
    }
    if part.contains(['(', ')', ' ']) {
        return Err(invalid());
    }
    Ok(Expression::Exists(part.to_string()))
}

fn split_set_expression(part: &str, op: &str) -> Option<(String, BTreeSet<String>)> {
    let (key, rest) = part.split_once(op)?;
    let rest = rest.trim();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    let values = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    Some((key.trim().to_string(), values))
}

// convenience conversions for Selector

impl FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

impl From<Expression> for Selector {
    fn from(value: Expression) -> Self {
        Self(vec![value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Default::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                [("foo".to_string(), "bar".to_string())].into(),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(Expression::In(
                    "foo".into(),
                    Some("bar".to_string()).into_iter().collect(),
                ))),
                [
                    ("foo".to_string(), "bar".to_string()),
                    ("bah".to_string(), "baz".to_string()),
                ]
                .into(),
                true,
                "In expression match",
            ),
            (
                Selector::from_iter(Some(Expression::NotEqual("foo".into(), "bar".into()))),
                [("foo".to_string(), "bar".to_string())].into(),
                false,
                "NotEqual expression non-match",
            ),
            (
                Selector::from_iter(Some(Expression::NotIn(
                    "foo".into(),
                    Some("quux".to_string()).into_iter().collect(),
                ))),
                [("foo".to_string(), "bar".to_string())].into(),
                true,
                "NotIn expression match",
            ),
            (
                Selector(vec![
                    Expression::Equal("foo".to_string(), "bar".to_string()),
                    Expression::In("bah".into(), Some("bar".to_string()).into_iter().collect()),
                ]),
                [
                    ("foo".to_string(), "bar".to_string()),
                    ("bah".to_string(), "baz".to_string()),
                ]
                .into(),
                false,
                "matches labels but not expressions",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn test_to_selector_string() {
        let selector = Selector(vec![
            Expression::In("foo".into(), ["bar".into(), "baz".into()].into()),
            Expression::NotIn("foo".into(), ["bar".into(), "baz".into()].into()),
            Expression::Equal("foo".into(), "bar".into()),
            Expression::NotEqual("foo".into(), "bar".into()),
            Expression::Exists("foo".into()),
            Expression::DoesNotExist("foo".into()),
        ])
        .to_string();

        assert_eq!(
            selector,
            "foo in (bar,baz),foo notin (bar,baz),foo=bar,foo!=bar,foo,!foo"
        )
    }

    #[test]
    fn test_parse_round_trip() {
        let selector = Selector(vec![
            Expression::In("env".into(), ["prod".into(), "staging".into()].into()),
            Expression::NotIn("tier".into(), ["cache".into()].into()),
            Expression::Equal("app".into(), "web".into()),
            Expression::NotEqual("track".into(), "canary".into()),
            Expression::Exists("owner".into()),
            Expression::DoesNotExist("legacy".into()),
        ]);
        let rendered = selector.to_string();
        let parsed: Selector = rendered.parse().unwrap();
        assert_eq!(parsed, selector);
        assert_eq!(parsed.to_string(), rendered);
    }

    #[test]
    fn test_parse_tolerates_spacing_and_double_equals() {
        let parsed: Selector = "app == web, env in ( prod , staging )".parse().unwrap();
        assert_eq!(
            parsed,
            Selector(vec![
                Expression::Equal("app".into(), "web".into()),
                Expression::In("env".into(), ["prod".into(), "staging".into()].into()),
            ])
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("app in prod".parse::<Selector>().is_err());
        assert!("!".parse::<Selector>().is_err());
    }
}
