use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write;

/// A single time-series sample, as produced by a decoder.
///
/// Points are owned by exactly one pipeline stage at a time: rules take
/// them by value and hand back the rewritten point.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub metric: String,
    pub value: f64,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub source: String,
    pub tags: BTreeMap<String, String>,
}

impl Point {
    pub fn new(
        metric: impl Into<String>,
        value: f64,
        timestamp: i64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            value,
            timestamp,
            source: source.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Serializes the point to its canonical text line:
    /// `"metric" value timestamp source="source" "k"="v" ...`
    ///
    /// The output is accepted by [`crate::decoder::LineDecoder`], which
    /// decodes it back into an identical point.
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(64 + self.metric.len() + self.tags.len() * 16);
        push_quoted(&mut line, &self.metric);
        // Writing into a String cannot fail
        let _ = write!(line, " {} {} source=", self.value, self.timestamp);
        push_quoted(&mut line, &self.source);
        for (key, value) in &self.tags {
            line.push(' ');
            push_quoted(&mut line, key);
            line.push('=');
            push_quoted(&mut line, value);
        }
        line
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn push_quoted(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::Point;

    #[test]
    fn serializes_without_tags() {
        let point = Point::new("cpu.load", 0.5, 100, "host1");
        assert_eq!(point.to_line(), r#""cpu.load" 0.5 100 source="host1""#);
    }

    #[test]
    fn serializes_tags_in_key_order() {
        let point = Point::new("disk.used", 42.0, 1_700_000_000_000, "db-1")
            .with_tag("mount", "/var")
            .with_tag("dc", "eu-west");
        assert_eq!(
            point.to_line(),
            r#""disk.used" 42 1700000000000 source="db-1" "dc"="eu-west" "mount"="/var""#
        );
    }

    #[test]
    fn escapes_quotes_and_backslashes() {
        let point = Point::new(r#"we"ird"#, -1.25, 7, r"c:\host");
        assert_eq!(
            point.to_line(),
            r#""we\"ird" -1.25 7 source="c:\\host""#
        );
    }

    #[test]
    fn later_tag_overwrites_same_key() {
        let point = Point::new("m", 1.0, 1, "s")
            .with_tag("env", "dev")
            .with_tag("env", "prod");
        assert_eq!(point.tags.len(), 1);
        assert_eq!(point.tags["env"], "prod");
    }
}
