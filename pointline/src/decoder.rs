use std::num::{ParseFloatError, ParseIntError};
use std::str::Utf8Error;

use thiserror::Error;

use crate::point::Point;
use crate::time::{SystemTime, TimeSource};

/// Source used when neither the transport nor the line carries one.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Either the decoded points, in payload order, or the single failure
/// that rejects the whole payload.
pub type DecodeOutcome = Result<Vec<Point>, DecodeError>;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[source] Utf8Error),
    #[error("line {line_number}: {source}")]
    Line {
        line_number: usize,
        #[source]
        source: LineError,
    },
}

#[derive(Error, Debug, PartialEq)]
pub enum LineError {
    #[error("missing metric name")]
    MissingMetric,
    #[error("missing metric value")]
    MissingValue,
    #[error("invalid metric value \"{token}\"")]
    InvalidValue {
        token: String,
        #[source]
        source: ParseFloatError,
    },
    #[error("invalid timestamp \"{token}\"")]
    InvalidTimestamp {
        token: String,
        #[source]
        source: ParseIntError,
    },
    #[error("unexpected token \"{0}\", expected key=value")]
    UnexpectedToken(String),
    #[error("point tag key cannot be empty")]
    EmptyTagKey,
    #[error("unterminated quoted string")]
    UnterminatedQuote,
}

/// Turns a raw payload into points. Implementations must be usable
/// concurrently from every connection.
pub trait Decoder: Send + Sync {
    fn decode(&self, payload: &[u8], source: &str) -> DecodeOutcome;
}

/// Re-parses a single (possibly rewritten) text line into points. Used
/// when line-level rules are configured.
pub trait Recoder: Send + Sync {
    fn recode(&self, line: &str, source: &str) -> DecodeOutcome;
}

/// Decoder for the newline-delimited text protocol:
///
/// `<metric> <value> [<timestamp>] [source=<source>] [<key>=<value> ...]`
///
/// Every token may be double-quoted, with `\` escaping the next
/// character. Timestamps are milliseconds; a point without one is
/// stamped with the current time.
pub struct LineDecoder<T: TimeSource = SystemTime> {
    timesource: T,
}

impl<T: TimeSource> LineDecoder<T> {
    pub fn new(timesource: T) -> Self {
        Self { timesource }
    }

    fn decode_text(&self, text: &str, source: &str) -> DecodeOutcome {
        let mut points = Vec::with_capacity(1);
        for (index, line) in text.split('\n').enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }
            let point = self
                .decode_line(line, source)
                .map_err(|source| DecodeError::Line {
                    line_number: index + 1,
                    source,
                })?;
            points.push(point);
        }
        Ok(points)
    }

    fn decode_line(&self, line: &str, default_source: &str) -> Result<Point, LineError> {
        let mut tokens = tokenize(line)?.into_iter().peekable();

        let metric = match tokens.next() {
            Some(Token { key: None, text }) if !text.is_empty() => text,
            _ => return Err(LineError::MissingMetric),
        };

        let value = match tokens.next() {
            Some(Token { key: None, text }) => {
                text.parse::<f64>()
                    .map_err(|source| LineError::InvalidValue {
                        token: text.clone(),
                        source,
                    })?
            }
            _ => return Err(LineError::MissingValue),
        };

        let timestamp = match tokens.next_if(|t| t.key.is_none()) {
            Some(Token { text, .. }) => {
                text.parse::<i64>()
                    .map_err(|source| LineError::InvalidTimestamp {
                        token: text.clone(),
                        source,
                    })?
            }
            None => self.timesource.current_millis(),
        };

        let mut point = Point::new(metric, value, timestamp, default_source);
        let mut tags = Vec::new();
        for token in tokens {
            let Some(key) = token.key else {
                return Err(LineError::UnexpectedToken(token.text));
            };
            if key.is_empty() {
                return Err(LineError::EmptyTagKey);
            }
            tags.push((key, token.text));
        }

        // The first `source=` names the source, `host=` only stands in when
        // there is none. Any other occurrence stays a plain tag.
        let source_at = tags
            .iter()
            .position(|(key, _)| key == "source")
            .or_else(|| tags.iter().position(|(key, _)| key == "host"));
        if let Some(index) = source_at {
            point.source = tags.remove(index).1;
        }
        point.tags.extend(tags);

        Ok(point)
    }
}

impl<T: TimeSource + Send + Sync> Decoder for LineDecoder<T> {
    fn decode(&self, payload: &[u8], source: &str) -> DecodeOutcome {
        let text = std::str::from_utf8(payload).map_err(DecodeError::InvalidUtf8)?;
        self.decode_text(text, source)
    }
}

impl<T: TimeSource + Send + Sync> Recoder for LineDecoder<T> {
    fn recode(&self, line: &str, source: &str) -> DecodeOutcome {
        self.decode_text(line, source)
    }
}

#[derive(Debug, PartialEq)]
struct Token {
    key: Option<String>,
    text: String,
}

fn tokenize(line: &str) -> Result<Vec<Token>, LineError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_ascii_whitespace()).is_some() {}
        if chars.peek().is_none() {
            return Ok(tokens);
        }

        let mut key = None;
        let mut text = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_ascii_whitespace()) {
            match c {
                '"' => loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => text.push(escaped),
                            None => return Err(LineError::UnterminatedQuote),
                        },
                        Some(other) => text.push(other),
                        None => return Err(LineError::UnterminatedQuote),
                    }
                },
                '=' if key.is_none() => key = Some(std::mem::take(&mut text)),
                other => text.push(other),
            }
        }
        tokens.push(Token { key, text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedTime;

    fn decoder() -> LineDecoder<FixedTime> {
        LineDecoder::new(FixedTime { millis: 5_000 })
    }

    #[test]
    fn decodes_minimal_line() {
        let points = decoder().decode(b"cpu.load 0.5", "dummy").unwrap();
        assert_eq!(points, vec![Point::new("cpu.load", 0.5, 5_000, "dummy")]);
    }

    #[test]
    fn decodes_full_line() {
        let points = decoder()
            .decode(b"cpu.load 0.5 100 source=host1 env=prod \"dc\"=\"eu west\"", "dummy")
            .unwrap();
        assert_eq!(
            points,
            vec![Point::new("cpu.load", 0.5, 100, "host1")
                .with_tag("env", "prod")
                .with_tag("dc", "eu west")]
        );
    }

    #[test]
    fn source_wins_over_host() {
        let points = decoder()
            .decode(b"m 1 host=a source=b", "dummy")
            .unwrap();
        assert_eq!(points[0].source, "b");
        assert_eq!(points[0].tags.get("host").map(String::as_str), Some("a"));

        let points = decoder().decode(b"m 1 host=a", "dummy").unwrap();
        assert_eq!(points[0].source, "a");
    }

    #[test]
    fn decodes_multiple_lines_in_order() {
        let points = decoder()
            .decode(b"a 1 1\r\n\n  \nb 2 2\nc 3 3", "s")
            .unwrap();
        let metrics: Vec<&str> = points.iter().map(|p| p.metric.as_str()).collect();
        assert_eq!(metrics, vec!["a", "b", "c"]);
    }

    #[test]
    fn accepts_canonical_serialization() {
        let point = Point::new("we\"ird name", -3.75, 1_700_000_000_123, "h\\1")
            .with_tag("k k", "v=v");
        let points = decoder().recode(&point.to_line(), "dummy").unwrap();
        assert_eq!(points, vec![point]);
    }

    #[test]
    fn source_and_host_tags_survive_canonical_serialization() {
        let point = Point::new("cpu.load", 1.0, 1, "real")
            .with_tag("host", "h9")
            .with_tag("source", "other");
        let points = decoder().recode(&point.to_line(), "dummy").unwrap();
        assert_eq!(points, vec![point]);
    }

    #[test]
    fn rejects_missing_value() {
        let err = decoder().decode(b"cpu.load", "s").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Line {
                line_number: 1,
                source: LineError::MissingValue
            }
        );
    }

    #[test]
    fn rejects_invalid_value() {
        let err = decoder().decode(b"ok 1\ncpu.load abc", "s").unwrap_err();
        match err {
            DecodeError::Line {
                line_number: 2,
                source: LineError::InvalidValue { token, .. },
            } => assert_eq!(token, "abc"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_timestamp() {
        let err = decoder().decode(b"m 1 12x", "s").unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Line {
                source: LineError::InvalidTimestamp { .. },
                ..
            }
        ));
    }

    #[test]
    fn rejects_bare_token_after_timestamp() {
        let err = decoder().decode(b"m 1 2 stray", "s").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Line {
                line_number: 1,
                source: LineError::UnexpectedToken("stray".to_string())
            }
        );
    }

    #[test]
    fn rejects_unterminated_quote() {
        let err = decoder().decode(b"\"cpu.lo", "s").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Line {
                line_number: 1,
                source: LineError::UnterminatedQuote
            }
        );
    }

    #[test]
    fn rejects_empty_tag_key() {
        let err = decoder().decode(b"m 1 =v", "s").unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Line {
                source: LineError::EmptyTagKey,
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = decoder().decode(&[b'm', b' ', 0xff, 0xfe], "s").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }

    #[test]
    fn blank_payload_decodes_to_nothing() {
        assert_eq!(decoder().decode(b"\n\n", "s").unwrap(), vec![]);
    }
}
