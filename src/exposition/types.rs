//! Decoded scrape payload types

use crate::exposition::error::{ParseError, ParseResult};
use crate::storage::Sample;
use serde::Serialize;
use std::collections::BTreeMap;

/// Wire format of a scrape payload, selected by the `Content-Type` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Prometheus text format 0.0.4 (timestamps in integer milliseconds)
    PrometheusText,
    /// OpenMetrics text (timestamps in float seconds)
    OpenMetrics,
}

impl ContentType {
    /// Select the parser for a `Content-Type` header value
    ///
    /// Unknown or empty headers fall back to the Prometheus text format.
    pub fn from_header(header: &str) -> ParseResult<Self> {
        let media_type = header
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match media_type.as_str() {
            "application/openmetrics-text" => Ok(Self::OpenMetrics),
            "application/vnd.google.protobuf" => {
                Err(ParseError::UnsupportedContentType(header.to_string()))
            }
            _ => Ok(Self::PrometheusText),
        }
    }
}

/// `# TYPE`, `# HELP` and `# UNIT` lines seen for one metric family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricMetadata {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Result of decoding one scrape payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedScrape {
    /// Samples in payload order
    pub samples: Vec<Sample>,
    /// Metadata keyed by metric family name
    pub metadata: BTreeMap<String, MetricMetadata>,
}

impl ParsedScrape {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_from_header() {
        assert_eq!(
            ContentType::from_header("text/plain; version=0.0.4").unwrap(),
            ContentType::PrometheusText
        );
        assert_eq!(
            ContentType::from_header("application/openmetrics-text; version=1.0.0; charset=utf-8")
                .unwrap(),
            ContentType::OpenMetrics
        );
        assert_eq!(ContentType::from_header("").unwrap(), ContentType::PrometheusText);
        assert!(matches!(
            ContentType::from_header(
                "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily"
            ),
            Err(ParseError::UnsupportedContentType(_))
        ));
    }
}
