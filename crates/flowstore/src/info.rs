//! `INFO` reply parser using nom
//!
//! Reply format:
//! ```text
//! # Memory
//! used_memory:1032592
//! used_memory_human:1008.39K
//!
//! # Stats
//! ...
//! ```

use std::collections::HashMap;

use nom::{
    bytes::complete::{tag, take_till, take_till1},
    character::complete::{line_ending, not_line_ending},
    combinator::opt,
    sequence::{separated_pair, terminated},
    IResult,
};

/// Fields of an `INFO` reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoReport {
    fields: HashMap<String, String>,
}

impl InfoReport {
    /// Raw value of a field
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Bytes allocated by the remote service (`used_memory`)
    pub fn used_memory(&self) -> Option<u64> {
        self.get("used_memory")?.trim().parse().ok()
    }

    /// Number of parsed fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if no field was parsed
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parse a `key:value` line; the value runs to the end of the line
fn field(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_till1(|c: char| c == ':' || c == '\r' || c == '\n'),
        tag(":"),
        take_till(|c: char| c == '\r' || c == '\n'),
    )(input)
}

/// One line with its terminator; `None` for headers, blanks and junk
fn line(input: &str) -> IResult<&str, Option<(&str, &str)>> {
    let (rest, text) = terminated(not_line_ending, opt(line_ending))(input)?;
    if text.starts_with('#') {
        return Ok((rest, None));
    }
    Ok((rest, field(text).ok().map(|(_, pair)| pair)))
}

/// Parse an `INFO` reply body
pub fn parse_info(text: &str) -> InfoReport {
    let mut fields = HashMap::new();
    let mut rest = text;

    while !rest.is_empty() {
        match line(rest) {
            Ok((remaining, parsed)) => {
                if let Some((key, value)) = parsed {
                    fields.insert(key.trim().to_string(), value.to_string());
                }
                if remaining.len() == rest.len() {
                    break;
                }
                rest = remaining;
            }
            Err(_) => break,
        }
    }

    InfoReport { fields }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_memory() {
        let report = parse_info("# Memory\r\nused_memory:1032592\r\nused_memory_human:1008.39K\r\n");
        assert_eq!(report.used_memory(), Some(1_032_592));
        assert_eq!(report.get("used_memory_human"), Some("1008.39K"));
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn test_skips_headers_and_blank_lines() {
        let report = parse_info("# Server\nredis_version:7.2.4\n\n# Memory\nused_memory:42\n");
        assert_eq!(report.get("redis_version"), Some("7.2.4"));
        assert_eq!(report.used_memory(), Some(42));
    }

    #[test]
    fn test_value_with_colons() {
        let report = parse_info("executable:/usr/bin/redis-server\r\nconfig:a:b\r\n");
        assert_eq!(report.get("config"), Some("a:b"));
    }

    #[test]
    fn test_missing_field() {
        let report = parse_info("# Memory\r\n");
        assert!(report.is_empty());
        assert_eq!(report.used_memory(), None);
    }
}
