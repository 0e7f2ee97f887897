//! Report generation: range queries to chart data files

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::query::{Evaluator, QueryError, QueryValue};
use crate::report::charts::{
    memory_area_chart, memory_pool_chart, open_fds_chart, request_errors_chart, requests_chart,
    ChartSpec, Legend, Unit,
};
use crate::report::error::{ReportError, ReportResult};

/// Name of the chart listing written next to the CSV files
pub const INDEX_FILE: &str = "index.json";

/// Report settings
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Parent of the timestamped report directory
    pub output_dir: PathBuf,
    /// How far back the charts reach
    pub window: Duration,
    /// Range query resolution, the engine default when unset
    pub step: Option<Duration>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            window: Duration::from_secs(3600),
            step: None,
        }
    }
}

impl ReportConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = Some(step);
        self
    }
}

/// Written report, also the content of `index.json`
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    #[serde(skip)]
    pub directory: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub charts: Vec<ChartSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSummary {
    pub name: String,
    pub title: String,
    /// CSV file name relative to the report directory
    pub file: String,
    pub series: Vec<SeriesSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub name: String,
    pub unit: Unit,
    pub points: usize,
    pub peak: Option<f64>,
    /// Peak formatted for the unit, SI bytes for memory series
    pub peak_display: Option<String>,
}

/// Turns the store's contents into chart data files
pub struct ReportGenerator {
    evaluator: Arc<Evaluator>,
    config: ReportConfig,
}

impl ReportGenerator {
    pub fn new(evaluator: Arc<Evaluator>, config: ReportConfig) -> Self {
        Self { evaluator, config }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Generate a report ending now
    pub async fn generate(&self) -> ReportResult<Report> {
        self.generate_at(Utc::now()).await
    }

    /// Generate a report whose window ends at `now`
    pub async fn generate_at(&self, now: DateTime<Utc>) -> ReportResult<Report> {
        let directory = self
            .config
            .output_dir
            .join(format!("report_{}", now.format("%Y_%m_%dT%H_%M_%S")));
        std::fs::create_dir_all(&directory)?;

        let end = now.timestamp_millis();
        let start = end - self.config.window.as_millis() as i64;

        let mut charts = Vec::new();
        for chart in self.charts(end).await? {
            charts.push(self.write_chart(&directory, &chart, start, end).await?);
        }

        let report = Report {
            directory: directory.clone(),
            generated_at: now,
            start: to_datetime(start),
            end: now,
            charts,
        };

        let index = std::fs::File::create(directory.join(INDEX_FILE))?;
        serde_json::to_writer_pretty(index, &report)?;

        tracing::info!(
            directory = %directory.display(),
            charts = report.charts.len(),
            "Report written"
        );
        Ok(report)
    }

    /// Fixed charts plus one per discovered memory area and pool
    pub async fn charts(&self, at: i64) -> ReportResult<Vec<ChartSpec>> {
        let mut charts = vec![requests_chart(), request_errors_chart(), open_fds_chart()];

        let areas = self.label_values("jvm_memory_bytes_used", "area", at).await?;
        tracing::info!(?areas, "Memory areas");
        charts.extend(areas.iter().map(|area| memory_area_chart(area)));

        let pools = self.label_values("jvm_memory_pool_bytes_max", "pool", at).await?;
        tracing::info!(?pools, "Memory pools");
        charts.extend(pools.iter().map(|pool| memory_pool_chart(pool)));

        Ok(charts)
    }

    /// Distinct non-empty values of `label` among the current series of `metric`
    pub async fn label_values(
        &self,
        metric: &str,
        label: &str,
        at: i64,
    ) -> ReportResult<Vec<String>> {
        let value = self
            .evaluator
            .instant_query(metric, at)
            .await
            .map_err(|source| ReportError::Query {
                chart: metric.to_string(),
                source,
            })?;

        let mut values = BTreeSet::new();
        if let QueryValue::Vector(vector) = value {
            for sample in vector.samples {
                if let Some(v) = sample.labels.get(label) {
                    values.insert(v.to_string());
                }
            }
        }
        Ok(values.into_iter().collect())
    }

    async fn write_chart(
        &self,
        directory: &Path,
        chart: &ChartSpec,
        start: i64,
        end: i64,
    ) -> ReportResult<ChartSummary> {
        let step = self
            .config
            .step
            .unwrap_or(self.evaluator.config().default_step);

        let file = format!("{}.csv", chart.name);
        let mut writer = csv::Writer::from_path(directory.join(&file))?;
        writer.write_record(["series", "timestamp", "value"])?;

        let mut summaries: Vec<SeriesSummary> = Vec::new();
        for plot in &chart.series {
            let matrix = self
                .evaluator
                .range_query(&plot.query, start, end, step)
                .await
                .map_err(|source| chart_error(chart, source))?;

            for series in &matrix.series {
                let name = match &plot.legend {
                    Legend::Fixed(name) => name.clone(),
                    Legend::Labels => series.labels.to_string(),
                };

                for point in &series.points {
                    let timestamp = to_datetime(point.timestamp).to_rfc3339();
                    let value = point.value.to_string();
                    writer.write_record([name.as_str(), timestamp.as_str(), value.as_str()])?;
                }

                let peak = series
                    .points
                    .iter()
                    .map(|p| p.value)
                    .filter(|v| v.is_finite())
                    .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

                match summaries.iter_mut().find(|s| s.name == name) {
                    Some(summary) => {
                        summary.points += series.points.len();
                        summary.peak = match (summary.peak, peak) {
                            (Some(a), Some(b)) => Some(a.max(b)),
                            (a, b) => a.or(b),
                        };
                        summary.peak_display = summary.peak.map(|p| plot.unit.format(p));
                    }
                    None => summaries.push(SeriesSummary {
                        name,
                        unit: plot.unit,
                        points: series.points.len(),
                        peak,
                        peak_display: peak.map(|p| plot.unit.format(p)),
                    }),
                }
            }
        }
        writer.flush()?;

        tracing::debug!(chart = %chart.name, series = summaries.len(), "Chart written");
        Ok(ChartSummary {
            name: chart.name.clone(),
            title: chart.title.clone(),
            file,
            series: summaries,
        })
    }
}

fn chart_error(chart: &ChartSpec, source: QueryError) -> ReportError {
    ReportError::Query {
        chart: chart.name.clone(),
        source,
    }
}

fn to_datetime(timestamp_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
