//! Test DSL parser.
//!
//! One job-queue payload is one line of the form
//!
//! ```text
//! <target> must run <type> [with <key> <value>]...
//! ```
//!
//! Values may be bare tokens or quoted with `'` or `"`. A handful of
//! reserved options configure the execution engine instead of the probe;
//! everything else is validated against the handler's argument schema.

use crate::probe::registry::ProtocolRegistry;
use crate::probe::spec::TestSpec;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Parser {
    registry: Arc<ProtocolRegistry>,
}

impl Parser {
    pub fn new(registry: Arc<ProtocolRegistry>) -> Self {
        Self { registry }
    }

    /// Parses one queue payload into a [`TestSpec`].
    ///
    /// Lines naming a protocol with no registered handler still parse; the
    /// executor reports the missing handler as a result record so the
    /// failure reaches the result queue rather than dying in a log line.
    pub fn parse_line(&self, line: &str) -> Result<TestSpec> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            bail!("empty or comment line");
        }

        let tokens = tokenize(trimmed)?;
        if tokens.len() < 4 || tokens[1] != "must" || tokens[2] != "run" {
            bail!("expected '<target> must run <type>', got: {trimmed}");
        }

        let mut spec = TestSpec::new(trimmed, tokens[3].clone(), tokens[0].clone(), HashMap::new());

        let mut rest = tokens[4..].iter();
        while let Some(keyword) = rest.next() {
            if keyword != "with" {
                bail!("expected 'with', got '{keyword}'");
            }
            let key = rest
                .next()
                .with_context(|| format!("option name missing after 'with' in: {trimmed}"))?;
            let value = rest
                .next()
                .with_context(|| format!("value missing for option '{key}'"))?;
            apply_option(&mut spec, key, value)?;
        }

        if let Some(handler) = self.registry.create(&spec.test_type) {
            let schema = handler.arguments();
            for (key, value) in &spec.arguments {
                let Some(pattern) = schema.get(key.as_str()) else {
                    bail!(
                        "protocol {} does not understand argument '{key}'",
                        spec.test_type
                    );
                };
                let matcher = Regex::new(pattern)
                    .with_context(|| format!("invalid validation pattern for '{key}'"))?;
                if !matcher.is_match(value) {
                    bail!("invalid value '{value}' for argument '{key}'");
                }
            }
        }

        Ok(spec)
    }
}

fn apply_option(spec: &mut TestSpec, key: &str, value: &str) -> Result<()> {
    match key {
        "timeout" => spec.timeout = Some(parse_duration_option(key, value)?),
        "max-retries" => {
            spec.max_retries = Some(
                value
                    .parse()
                    .with_context(|| format!("invalid max-retries value '{value}'"))?,
            )
        }
        "dedup" => {
            let window = parse_duration_option(key, value)?;
            // A zero window disables deduplication outright.
            spec.dedup_duration = (!window.is_zero()).then_some(window);
        }
        "max-targets" => {
            spec.max_targets = value
                .parse()
                .with_context(|| format!("invalid max-targets value '{value}'"))?
        }
        "pt-duration" | "period-test-duration" => {
            spec.period_duration = Some(parse_duration_option(key, value)?)
        }
        "pt-sleep" | "period-test-sleep" => {
            spec.period_sleep = Some(parse_duration_option(key, value)?)
        }
        "pt-threshold" | "period-test-threshold" => {
            spec.period_threshold = Some(
                parse_percentage(value)
                    .with_context(|| format!("invalid {key} value '{value}'"))?,
            )
        }
        _ => {
            spec.arguments.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

fn parse_duration_option(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("invalid {key} value '{value}'"))
}

/// Parses a failure-rate threshold into a fraction in `0..=1`.
///
/// Accepts `40%`, `40`, and `0.4` as the same value; bare numbers above 1
/// are read as percentages.
pub fn parse_percentage(input: &str) -> Result<f32> {
    let trimmed = input.trim();
    let (number, is_percent) = match trimmed.strip_suffix('%') {
        Some(stripped) => (stripped, true),
        None => (trimmed, false),
    };
    let value: f32 = number
        .parse()
        .with_context(|| format!("invalid percentage '{input}'"))?;
    let fraction = if is_percent || value > 1.0 {
        value / 100.0
    } else {
        value
    };
    if !(0.0..=1.0).contains(&fraction) {
        bail!("percentage '{input}' is out of range");
    }
    Ok(fraction)
}

fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '\'' || ch == '"' {
            chars.next();
            let mut token = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                if inner == ch {
                    closed = true;
                    break;
                }
                token.push(inner);
            }
            if !closed {
                bail!("unterminated quote in input line");
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&inner) = chars.peek() {
                if inner.is_whitespace() {
                    break;
                }
                token.push(inner);
                chars.next();
            }
            tokens.push(token);
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> Parser {
        Parser::new(Arc::new(ProtocolRegistry::with_builtins()))
    }

    #[test]
    fn parses_a_plain_line() {
        let spec = parser()
            .parse_line("mail.example.com must run tcp with port 25")
            .expect("line should parse");
        assert_eq!(spec.target, "mail.example.com");
        assert_eq!(spec.test_type, "tcp");
        assert_eq!(spec.arguments.get("port").map(String::as_str), Some("25"));
        assert_eq!(spec.input, "mail.example.com must run tcp with port 25");
    }

    #[test]
    fn parses_quoted_values() {
        let spec = parser()
            .parse_line("db must run unknown-probe with greeting 'hello world'")
            .expect("line should parse");
        assert_eq!(
            spec.arguments.get("greeting").map(String::as_str),
            Some("hello world")
        );
    }

    #[test]
    fn rejects_lines_without_the_must_run_marker() {
        let err = parser()
            .parse_line("mail.example.com runs tcp")
            .expect_err("line should be rejected");
        assert!(format!("{err}").contains("must run"));
    }

    #[test]
    fn rejects_comments_and_blank_lines() {
        assert!(parser().parse_line("").is_err());
        assert!(parser().parse_line("# a comment").is_err());
    }

    #[test]
    fn rejects_unknown_arguments_for_known_protocols() {
        let err = parser()
            .parse_line("host must run tcp with flavour vanilla")
            .expect_err("unknown argument should be rejected");
        assert!(format!("{err}").contains("flavour"));
    }

    #[test]
    fn rejects_values_failing_the_handler_schema() {
        let err = parser()
            .parse_line("host must run tcp with port eighty")
            .expect_err("non-numeric port should be rejected");
        assert!(format!("{err}").contains("port"));
    }

    #[test]
    fn unknown_protocols_parse_without_schema_validation() {
        let spec = parser()
            .parse_line("host must run gopher with selector /")
            .expect("unknown protocol should still parse");
        assert_eq!(spec.test_type, "gopher");
    }

    #[test]
    fn reserved_options_populate_spec_fields() {
        let spec = parser()
            .parse_line(
                "host must run tcp with port 22 with timeout 3s with max-retries 2 \
                 with dedup 5m with max-targets 4",
            )
            .expect("line should parse");
        assert_eq!(spec.timeout, Some(Duration::from_secs(3)));
        assert_eq!(spec.max_retries, Some(2));
        assert_eq!(spec.dedup_duration, Some(Duration::from_secs(300)));
        assert_eq!(spec.max_targets, 4);
        assert!(!spec.arguments.contains_key("dedup"));
    }

    #[test]
    fn a_zero_dedup_window_disables_deduplication() {
        let spec = parser()
            .parse_line("host must run tcp with port 22 with dedup 0s")
            .expect("line should parse");
        assert_eq!(spec.dedup_duration, None);
    }

    #[test]
    fn short_and_long_period_options_are_equivalent() {
        let short = parser()
            .parse_line(
                "host must run tcp with port 1 with pt-duration 5s \
                 with pt-sleep 1s with pt-threshold 40%",
            )
            .expect("short form should parse");
        let long = parser()
            .parse_line(
                "host must run tcp with port 1 with period-test-duration 5s \
                 with period-test-sleep 1s with period-test-threshold 40%",
            )
            .expect("long form should parse");
        assert_eq!(short.period_duration, long.period_duration);
        assert_eq!(short.period_sleep, long.period_sleep);
        assert_eq!(short.period_threshold, long.period_threshold);
        assert!(short.is_period_test());
    }

    #[test]
    fn percentages_accept_common_spellings() {
        assert_eq!(parse_percentage("40%").expect("percent form"), 0.4);
        assert_eq!(parse_percentage("40").expect("bare form"), 0.4);
        assert_eq!(parse_percentage("0.4").expect("fraction form"), 0.4);
        assert!(parse_percentage("240").is_err());
        assert!(parse_percentage("nope").is_err());
    }
}
