//! Chart definitions

use serde::Serialize;

use crate::query::VectorSelector;
use crate::storage::Matcher;

/// Unit of a plotted series, drives value formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Count,
    PerSecond,
    Bytes,
    Ratio,
}

impl Unit {
    pub fn format(&self, value: f64) -> String {
        match self {
            Unit::Count => format!("{}", value),
            Unit::PerSecond => format!("{:.2}/s", value),
            Unit::Bytes => format_bytes_si(value),
            Unit::Ratio => format!("{:.1}%", value * 100.0),
        }
    }
}

/// How result series are named in the chart data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Legend {
    /// Every result series shares one name
    Fixed(String),
    /// Each result series is named by its label set
    Labels,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSpec {
    pub legend: Legend,
    pub query: String,
    pub unit: Unit,
}

impl SeriesSpec {
    pub fn fixed(legend: impl Into<String>, query: impl Into<String>, unit: Unit) -> Self {
        Self {
            legend: Legend::Fixed(legend.into()),
            query: query.into(),
            unit,
        }
    }

    pub fn by_labels(query: impl Into<String>, unit: Unit) -> Self {
        Self {
            legend: Legend::Labels,
            query: query.into(),
            unit,
        }
    }
}

/// One chart: a file name and the queries plotted in it
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    /// File stem, unique within a report
    pub name: String,
    pub title: String,
    pub series: Vec<SeriesSpec>,
}

pub fn requests_chart() -> ChartSpec {
    ChartSpec {
        name: "requests".to_string(),
        title: "Requests".to_string(),
        series: vec![SeriesSpec::by_labels(
            "sum(rate(galeb_http_requests_total[1m])) by (virtualhost)",
            Unit::PerSecond,
        )],
    }
}

pub fn request_errors_chart() -> ChartSpec {
    ChartSpec {
        name: "requests_errors".to_string(),
        title: "Request errors".to_string(),
        series: vec![SeriesSpec::by_labels(
            "sum(rate(galeb_errors_total[1m])) by (virtualhost, error)",
            Unit::PerSecond,
        )],
    }
}

pub fn open_fds_chart() -> ChartSpec {
    ChartSpec {
        name: "open_fds".to_string(),
        title: "File descriptors".to_string(),
        series: vec![SeriesSpec::fixed(
            "Open File Descriptors",
            "process_open_fds",
            Unit::Count,
        )],
    }
}

/// Label value made safe for a file name
fn file_stem(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `metric{label="value"}` with the value escaped
fn selector(metric: &str, label: &str, value: &str) -> String {
    VectorSelector::new(vec![Matcher::metric_name(metric), Matcher::equal(label, value)])
        .to_string()
}

/// Used, max and usage ratio of one JVM memory area
pub fn memory_area_chart(area: &str) -> ChartSpec {
    let used = selector("jvm_memory_bytes_used", "area", area);
    ChartSpec {
        name: format!("memory_area_{}", file_stem(area)),
        title: format!("Memory area [{}]", area),
        series: vec![
            SeriesSpec::fixed(format!("Used memory [{}]", area), used.clone(), Unit::Bytes),
            SeriesSpec::fixed(
                format!("Max memory [{}]", area),
                selector("jvm_memory_bytes_max", "area", area),
                Unit::Bytes,
            ),
            SeriesSpec::fixed(
                format!("Usage memory [{}]", area),
                format!("{} / jvm_memory_bytes_max >= 0", used),
                Unit::Ratio,
            ),
        ],
    }
}

/// Used, max and committed bytes of one JVM memory pool
pub fn memory_pool_chart(pool: &str) -> ChartSpec {
    ChartSpec {
        name: format!("memory_pool_{}", file_stem(pool)),
        title: format!("Memory pool [{}]", pool),
        series: vec![
            SeriesSpec::fixed(
                format!("Used memory [{}]", pool),
                selector("jvm_memory_pool_bytes_used", "pool", pool),
                Unit::Bytes,
            ),
            SeriesSpec::fixed(
                format!("Max memory [{}]", pool),
                selector("jvm_memory_pool_bytes_max", "pool", pool),
                Unit::Bytes,
            ),
            SeriesSpec::fixed(
                format!("Committed memory [{}]", pool),
                selector("jvm_memory_pool_bytes_committed", "pool", pool),
                Unit::Bytes,
            ),
        ],
    }
}

/// Byte count with SI (power of 1000) prefixes, one decimal
pub fn format_bytes_si(value: f64) -> String {
    const UNIT: i64 = 1000;
    let bytes = value as i64;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < 5 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = ['k', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_query;

    #[test]
    fn test_format_bytes_si() {
        assert_eq!(format_bytes_si(0.0), "0 B");
        assert_eq!(format_bytes_si(999.0), "999 B");
        assert_eq!(format_bytes_si(1000.0), "1.0 kB");
        assert_eq!(format_bytes_si(1_500_000.0), "1.5 MB");
        assert_eq!(format_bytes_si(2_500_000_000.0), "2.5 GB");
    }

    #[test]
    fn test_unit_format() {
        assert_eq!(Unit::Ratio.format(0.25), "25.0%");
        assert_eq!(Unit::PerSecond.format(1.0), "1.00/s");
        assert_eq!(Unit::Count.format(12.0), "12");
    }

    #[test]
    fn test_memory_area_queries() {
        let chart = memory_area_chart("heap");
        assert_eq!(chart.name, "memory_area_heap");
        assert_eq!(chart.series[0].query, r#"jvm_memory_bytes_used{area="heap"}"#);
        assert_eq!(
            chart.series[2].query,
            r#"jvm_memory_bytes_used{area="heap"} / jvm_memory_bytes_max >= 0"#
        );
    }

    #[test]
    fn test_chart_names_are_file_safe() {
        assert_eq!(memory_pool_chart("G1 Old Gen").name, "memory_pool_G1_Old_Gen");
        assert_eq!(memory_area_chart("nonheap").name, "memory_area_nonheap");
    }

    #[test]
    fn test_every_chart_query_parses() {
        let mut charts = vec![requests_chart(), request_errors_chart(), open_fds_chart()];
        charts.push(memory_area_chart("non\"heap"));
        charts.push(memory_pool_chart("G1 Old Gen"));

        for chart in charts {
            for series in chart.series {
                assert!(parse_query(&series.query).is_ok(), "{}", series.query);
            }
        }
    }
}
