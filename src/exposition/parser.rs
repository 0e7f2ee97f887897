//! Exposition format parser
//!
//! Decodes Prometheus text and OpenMetrics payloads into samples.
//!
//! # Supported Syntax
//!
//! ```text
//! # HELP requests_total Total requests
//! # TYPE requests_total counter
//! requests_total{vhost="a",code="200"} 1027 1395066363000
//! {__name__="requests_total",vhost="b"} 3
//! # EOF
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_while, take_while1},
    character::complete::{char, space0, space1},
    combinator::{cut, opt, recognize, rest, value, verify},
    error::{Error as NomError, ErrorKind},
    multi::separated_list0,
    sequence::{pair, preceded, tuple},
    IResult,
};
use std::collections::HashSet;

use crate::exposition::error::{ParseError, ParseResult};
use crate::exposition::types::{ContentType, ParsedScrape};
use crate::storage::{Labels, Sample, METRIC_NAME};

/// Parse one scrape payload
///
/// `content_type` is the raw `Content-Type` header. Samples without an
/// explicit timestamp get `default_timestamp` (milliseconds). Any malformed
/// line fails the whole call.
pub fn parse(
    payload: &[u8],
    content_type: &str,
    default_timestamp: i64,
) -> ParseResult<ParsedScrape> {
    let format = ContentType::from_header(content_type)?;
    parse_with(payload, format, default_timestamp)
}

/// Parse one scrape payload in an already selected format
pub fn parse_with(
    payload: &[u8],
    format: ContentType,
    default_timestamp: i64,
) -> ParseResult<ParsedScrape> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8)?;

    let mut scrape = ParsedScrape::default();
    let mut seen_eof = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();

        if line.is_empty() {
            continue;
        }
        if seen_eof {
            return Err(ParseError::ContentAfterEof { line: line_no });
        }

        if line.starts_with('#') {
            if line == "# EOF" {
                seen_eof = true;
            } else if let Ok((_, (kind, name, text))) = descriptor_line(line) {
                let entry = scrape.metadata.entry(name.to_string()).or_default();
                match kind {
                    Descriptor::Type => entry.metric_type = Some(text.to_string()),
                    Descriptor::Help => entry.help = Some(unescape_help(text)),
                    Descriptor::Unit => entry.unit = Some(text.to_string()),
                }
            }
            continue;
        }

        let sample = parse_sample_line(line, line_no, format, default_timestamp)?;
        scrape.samples.push(sample);
    }

    tracing::trace!(
        samples = scrape.samples.len(),
        families = scrape.metadata.len(),
        "Parsed scrape payload"
    );
    Ok(scrape)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Descriptor {
    Type,
    Help,
    Unit,
}

/// A metric line split into its raw tokens
struct RawSample<'a> {
    name: Option<&'a str>,
    labels: Vec<(&'a str, String)>,
    value: &'a str,
    timestamp: Option<&'a str>,
}

fn parse_sample_line(
    line: &str,
    line_no: usize,
    format: ContentType,
    default_timestamp: i64,
) -> ParseResult<Sample> {
    let (trailing, raw) = sample_line(line).map_err(|e| ParseError::syntax(line_no, describe(e)))?;

    // OpenMetrics exemplars follow the sample as ` # {...} value [ts]`
    let exemplar = format == ContentType::OpenMetrics && trailing.starts_with('#');
    if !trailing.is_empty() && !exemplar {
        return Err(ParseError::syntax(
            line_no,
            format!("unexpected trailing input '{}'", trailing),
        ));
    }

    let mut labels = Labels::new();
    let mut seen: HashSet<&str> = HashSet::new();

    if let Some(name) = raw.name {
        seen.insert(METRIC_NAME);
        labels.set(METRIC_NAME, name);
    }
    for (name, value) in raw.labels {
        if !seen.insert(name) {
            return Err(ParseError::DuplicateLabel {
                line: line_no,
                name: name.to_string(),
            });
        }
        labels.set(name, value);
    }

    if labels.metric_name().is_none() {
        return Err(ParseError::MissingMetricName { line: line_no });
    }

    let value = parse_value(raw.value)
        .ok_or_else(|| ParseError::syntax(line_no, format!("invalid value '{}'", raw.value)))?;

    let timestamp = match raw.timestamp {
        Some(token) => parse_timestamp(token, format).ok_or_else(|| {
            ParseError::syntax(line_no, format!("invalid timestamp '{}'", token))
        })?,
        None => default_timestamp,
    };

    Ok(Sample::new(labels, timestamp, value))
}

fn describe(err: nom::Err<NomError<&str>>) -> String {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let near: String = e.input.chars().take(20).collect();
            format!("unexpected input near '{}'", near)
        }
        nom::Err::Incomplete(_) => "incomplete input".to_string(),
    }
}

/// Parse `name{labels} value [timestamp]`, returning the unparsed tail
fn sample_line(input: &str) -> IResult<&str, RawSample<'_>> {
    let (input, name) = opt(metric_name)(input)?;
    let (input, labels) = opt(preceded(space0, label_set))(input)?;
    let (input, _) = if labels.is_some() {
        space0(input)?
    } else {
        space1(input)?
    };
    let (input, value) = take_till1(|c: char| c.is_whitespace())(input)?;
    let (input, timestamp) = opt(preceded(
        space1,
        verify(take_till1(|c: char| c.is_whitespace()), |s: &str| {
            !s.starts_with('#')
        }),
    ))(input)?;
    let (input, _) = space0(input)?;

    Ok((
        input,
        RawSample {
            name,
            labels: labels.unwrap_or_default(),
            value,
            timestamp,
        },
    ))
}

/// Parse `# TYPE|HELP|UNIT name text`
fn descriptor_line(input: &str) -> IResult<&str, (Descriptor, &str, &str)> {
    let (input, _) = char('#')(input)?;
    let (input, _) = space1(input)?;
    let (input, kind) = alt((
        value(Descriptor::Type, tag("TYPE")),
        value(Descriptor::Help, tag("HELP")),
        value(Descriptor::Unit, tag("UNIT")),
    ))(input)?;
    let (input, _) = space1(input)?;
    let (input, name) = metric_name(input)?;
    let (input, text) = opt(preceded(space1, rest))(input)?;

    Ok((input, (kind, name, text.unwrap_or("").trim())))
}

/// Metric name: `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
    ))(input)
}

/// Label name: `[a-zA-Z_][a-zA-Z0-9_]*`
fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// `{name="value", ...}` with an optional trailing comma
fn label_set(input: &str) -> IResult<&str, Vec<(&str, String)>> {
    let (input, _) = char('{')(input)?;
    cut(label_list)(input)
}

fn label_list(input: &str) -> IResult<&str, Vec<(&str, String)>> {
    let (input, _) = space0(input)?;
    let (input, labels) =
        separated_list0(tuple((space0, char(','), space0)), label_pair)(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = opt(char(','))(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char('}')(input)?;
    Ok((input, labels))
}

fn label_pair(input: &str) -> IResult<&str, (&str, String)> {
    let (input, name) = label_name(input)?;
    let (input, _) = tuple((space0, char('='), space0))(input)?;
    let (input, value) = label_value(input)?;
    Ok((input, (name, value)))
}

/// Double-quoted label value with `\\`, `\"` and `\n` escapes
fn label_value(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;

    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((&input[idx + 1..], out)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            c => out.push(c),
        }
    }

    // Unterminated string
    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

fn parse_value(token: &str) -> Option<f64> {
    match token {
        "+Inf" | "Inf" | "+inf" | "inf" => Some(f64::INFINITY),
        "-Inf" | "-inf" => Some(f64::NEG_INFINITY),
        "NaN" | "nan" => Some(f64::NAN),
        _ => token.parse::<f64>().ok(),
    }
}

fn parse_timestamp(token: &str, format: ContentType) -> Option<i64> {
    match format {
        ContentType::PrometheusText => token.parse::<i64>().ok(),
        ContentType::OpenMetrics => {
            let seconds = token.parse::<f64>().ok()?;
            if seconds.is_finite() {
                Some((seconds * 1000.0).round() as i64)
            } else {
                None
            }
        }
    }
}

fn unescape_help(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
