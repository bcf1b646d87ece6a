//! Regex based rules covering the usual preprocessing needs: rename,
//! retag and drop points.
//!
//! Patterns must match the whole value, the way operators write them
//! (`cpu.*` matches `cpu.load` but not `host.cpu`).

use std::borrow::Cow;

use regex::Regex;

use crate::point::Point;
use crate::preprocessor::{FilterResult, LineFilter, LineTransformer, PointFilter, PointTransformer};

fn full_match(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// Which part of a point a rule looks at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    MetricName,
    SourceName,
    PointTag(String),
}

impl Scope {
    fn get<'a>(&self, point: &'a Point) -> Option<&'a str> {
        match self {
            Scope::MetricName => Some(&point.metric),
            Scope::SourceName => Some(&point.source),
            Scope::PointTag(key) => point.tags.get(key).map(String::as_str),
        }
    }

    fn set(&self, point: &mut Point, value: String) {
        match self {
            Scope::MetricName => point.metric = value,
            Scope::SourceName => point.source = value,
            Scope::PointTag(key) => {
                point.tags.insert(key.clone(), value);
            }
        }
    }
}

/// Regex replace over the whole text line. Unlike the filters this is a
/// substring search.
pub struct LineReplaceRegex {
    pattern: Regex,
    replacement: String,
}

impl LineReplaceRegex {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }
}

impl LineTransformer for LineReplaceRegex {
    fn transform(&self, line: String) -> String {
        let replaced = match self.pattern.replace_all(&line, self.replacement.as_str()) {
            Cow::Borrowed(_) => None,
            Cow::Owned(replaced) => Some(replaced),
        };
        replaced.unwrap_or(line)
    }
}

/// Blocks metric names matching the pattern.
pub struct LineBlockRegex {
    pattern: Regex,
    message: Option<String>,
}

impl LineBlockRegex {
    pub fn new(pattern: &str, message: Option<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: full_match(pattern)?,
            message,
        })
    }
}

impl LineFilter for LineBlockRegex {
    fn filter(&self, metric: &str) -> FilterResult {
        if self.pattern.is_match(metric) {
            FilterResult::block(self.message.clone())
        } else {
            FilterResult::Allow
        }
    }
}

/// Blocks metric names not matching the pattern.
pub struct LineAllowRegex {
    pattern: Regex,
    message: Option<String>,
}

impl LineAllowRegex {
    pub fn new(pattern: &str, message: Option<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: full_match(pattern)?,
            message,
        })
    }
}

impl LineFilter for LineAllowRegex {
    fn filter(&self, metric: &str) -> FilterResult {
        if self.pattern.is_match(metric) {
            FilterResult::Allow
        } else {
            FilterResult::block(self.message.clone())
        }
    }
}

/// Regex replace on one field. Missing tags are left alone.
pub struct PointReplaceRegex {
    scope: Scope,
    pattern: Regex,
    replacement: String,
}

impl PointReplaceRegex {
    pub fn new(
        scope: Scope,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            scope,
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }
}

impl PointTransformer for PointReplaceRegex {
    fn transform(&self, mut point: Point) -> Point {
        let replaced = match self.scope.get(&point) {
            Some(value) => match self.pattern.replace_all(value, self.replacement.as_str()) {
                Cow::Borrowed(_) => None,
                Cow::Owned(replaced) => Some(replaced),
            },
            None => None,
        };
        if let Some(replaced) = replaced {
            self.scope.set(&mut point, replaced);
        }
        point
    }
}

/// Sets a tag, overwriting any previous value.
pub struct AddTag {
    key: String,
    value: String,
}

impl AddTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl PointTransformer for AddTag {
    fn transform(&self, mut point: Point) -> Point {
        point.tags.insert(self.key.clone(), self.value.clone());
        point
    }
}

/// Removes every tag whose key matches the pattern.
pub struct DropTag {
    pattern: Regex,
}

impl DropTag {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: full_match(pattern)?,
        })
    }
}

impl PointTransformer for DropTag {
    fn transform(&self, mut point: Point) -> Point {
        point.tags.retain(|key, _| !self.pattern.is_match(key));
        point
    }
}

/// Blocks points whose scoped value matches. Points without the tag pass.
pub struct PointBlockRegex {
    scope: Scope,
    pattern: Regex,
    message: Option<String>,
}

impl PointBlockRegex {
    pub fn new(scope: Scope, pattern: &str, message: Option<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            scope,
            pattern: full_match(pattern)?,
            message,
        })
    }
}

impl PointFilter for PointBlockRegex {
    fn filter(&self, point: &Point) -> FilterResult {
        match self.scope.get(point) {
            Some(value) if self.pattern.is_match(value) => FilterResult::block(self.message.clone()),
            _ => FilterResult::Allow,
        }
    }
}

/// Only lets through points whose scoped value matches. Points without
/// the tag are blocked.
pub struct PointAllowRegex {
    scope: Scope,
    pattern: Regex,
    message: Option<String>,
}

impl PointAllowRegex {
    pub fn new(scope: Scope, pattern: &str, message: Option<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            scope,
            pattern: full_match(pattern)?,
            message,
        })
    }
}

impl PointFilter for PointAllowRegex {
    fn filter(&self, point: &Point) -> FilterResult {
        match self.scope.get(point) {
            Some(value) if self.pattern.is_match(value) => FilterResult::Allow,
            _ => FilterResult::block(self.message.clone()),
        }
    }
}
