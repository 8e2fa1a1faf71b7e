use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::credentials::{Credentials, DatadogCredentials};
use crate::core::error::Error;
use crate::core::store::types::{FindingType, JobType, MonitoringJob, RunFinding};

const DEFAULT_MAX_ERROR_RATE: f64 = 0.05;
const DEFAULT_MAX_P95_LATENCY_MS: f64 = 1000.0;
const DEFAULT_ERROR_PATTERN_THRESHOLD: i64 = 10;
const DEFAULT_LOG_QUERY: &str = "status:error";

#[derive(Debug, Clone, Default)]
pub struct ServiceHealth {
    pub error_rate: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub requests_per_minute: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LogPattern {
    pub pattern: String,
    pub count: i64,
}

/// What one monitoring run observed.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub summary: String,
    pub findings: Vec<RunFinding>,
}

/// Read-side telemetry boundary for monitoring checks. The concrete Datadog
/// client lives behind this seam so job logic tests never touch the network.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn recent_deployments(
        &self,
        credentials: &DatadogCredentials,
        service: Option<&str>,
        window_minutes: i64,
    ) -> Result<Vec<Value>, Error>;

    async fn service_health(
        &self,
        credentials: &DatadogCredentials,
        service: &str,
        env: &str,
    ) -> Result<ServiceHealth, Error>;

    async fn error_log_patterns(
        &self,
        credentials: &DatadogCredentials,
        query: &str,
        minutes_back: i64,
    ) -> Result<Vec<LogPattern>, Error>;

    async fn metric_snapshot(
        &self,
        credentials: &DatadogCredentials,
        query: &str,
        minutes_back: i64,
    ) -> Result<Option<f64>, Error>;
}

fn finding(finding_type: FindingType, message: impl Into<String>) -> RunFinding {
    RunFinding {
        finding_type,
        message: message.into(),
        metric: None,
        value: None,
    }
}

fn metric_finding(
    finding_type: FindingType,
    message: impl Into<String>,
    metric: &str,
    value: f64,
) -> RunFinding {
    RunFinding {
        finding_type,
        message: message.into(),
        metric: Some(metric.to_string()),
        value: Some(value),
    }
}

fn config_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

fn config_f64(config: &Value, key: &str, default: f64) -> f64 {
    config.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn config_i64(config: &Value, key: &str, default: i64) -> i64 {
    config.get(key).and_then(Value::as_i64).unwrap_or(default)
}

/// Run the job-type-specific check. Datadog credentials are required for
/// every built-in check; their absence fails the run (and grows the job's
/// failure streak) rather than producing an empty success.
pub async fn run_check(
    job: &MonitoringJob,
    credentials: &Credentials,
    telemetry: &dyn TelemetrySource,
) -> Result<CheckOutcome, Error> {
    let Some(datadog) = &credentials.datadog else {
        return Err(Error::UpstreamIntegration {
            provider: "datadog".into(),
            message: "credentials not configured".into(),
        });
    };

    match job.job_type {
        JobType::DeploymentWatcher => watch_deployments(job, datadog, telemetry).await,
        JobType::HealthCheck => check_health(job, datadog, telemetry).await,
        JobType::ErrorScanner => scan_errors(job, datadog, telemetry).await,
        JobType::BaselineBuilder => build_baseline(job, datadog, telemetry).await,
        JobType::Custom => run_custom(job, datadog, telemetry).await,
    }
}

async fn watch_deployments(
    job: &MonitoringJob,
    datadog: &DatadogCredentials,
    telemetry: &dyn TelemetrySource,
) -> Result<CheckOutcome, Error> {
    // Look back two ticks by default so a deploy landing right after a tick
    // is still seen by the next one.
    let window = config_i64(
        &job.config,
        "window_minutes",
        job.schedule_interval_minutes * 2,
    );
    let service = config_str(&job.config, "service");
    let deployments = telemetry
        .recent_deployments(datadog, service, window)
        .await?;

    if deployments.is_empty() {
        return Ok(CheckOutcome {
            summary: format!("no deployments in the last {window}m"),
            findings: vec![finding(FindingType::Success, "no new deployments")],
        });
    }

    let findings = deployments
        .iter()
        .map(|d| {
            let title = d
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("unnamed deployment");
            finding(FindingType::Info, format!("deployment: {title}"))
        })
        .collect::<Vec<_>>();

    Ok(CheckOutcome {
        summary: format!("{} deployment(s) in the last {window}m", deployments.len()),
        findings,
    })
}

async fn check_health(
    job: &MonitoringJob,
    datadog: &DatadogCredentials,
    telemetry: &dyn TelemetrySource,
) -> Result<CheckOutcome, Error> {
    let env = config_str(&job.config, "env").unwrap_or("prod");
    let services: Vec<String> = match job.config.get("services").and_then(Value::as_array) {
        Some(list) => list
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        None => config_str(&job.config, "service")
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
    };
    if services.is_empty() {
        return Err(Error::Validation(
            "health_check job has no service configured".into(),
        ));
    }

    let max_error_rate = config_f64(&job.config, "max_error_rate", DEFAULT_MAX_ERROR_RATE);
    let max_latency = config_f64(
        &job.config,
        "max_p95_latency_ms",
        DEFAULT_MAX_P95_LATENCY_MS,
    );

    let mut findings = Vec::new();
    let mut unhealthy = 0usize;
    for service in &services {
        let health = telemetry.service_health(datadog, service, env).await?;
        let mut issues = false;

        if let Some(rate) = health.error_rate {
            if rate > max_error_rate {
                issues = true;
                findings.push(metric_finding(
                    if rate > max_error_rate * 2.0 {
                        FindingType::Error
                    } else {
                        FindingType::Warning
                    },
                    format!("{service}: error rate {:.2}% exceeds threshold", rate * 100.0),
                    "error_rate",
                    rate,
                ));
            }
        }
        if let Some(latency) = health.p95_latency_ms
            && latency > max_latency
        {
            issues = true;
            findings.push(metric_finding(
                FindingType::Warning,
                format!("{service}: p95 latency {latency:.0}ms exceeds threshold"),
                "p95_latency_ms",
                latency,
            ));
        }

        if issues {
            unhealthy += 1;
        } else {
            findings.push(finding(FindingType::Success, format!("{service}: healthy")));
        }
    }

    Ok(CheckOutcome {
        summary: if unhealthy == 0 {
            format!("{} service(s) healthy", services.len())
        } else {
            format!("{unhealthy} of {} service(s) degraded", services.len())
        },
        findings,
    })
}

async fn scan_errors(
    job: &MonitoringJob,
    datadog: &DatadogCredentials,
    telemetry: &dyn TelemetrySource,
) -> Result<CheckOutcome, Error> {
    let query = config_str(&job.config, "query").unwrap_or(DEFAULT_LOG_QUERY);
    let minutes = config_i64(&job.config, "minutes_back", job.schedule_interval_minutes);
    let threshold = config_i64(&job.config, "min_count", DEFAULT_ERROR_PATTERN_THRESHOLD);

    let patterns = telemetry
        .error_log_patterns(datadog, query, minutes)
        .await?;
    if patterns.is_empty() {
        return Ok(CheckOutcome {
            summary: format!("no matching errors in the last {minutes}m"),
            findings: vec![finding(FindingType::Success, "log scan clean")],
        });
    }

    let total: i64 = patterns.iter().map(|p| p.count).sum();
    let findings = patterns
        .iter()
        .map(|p| {
            metric_finding(
                if p.count >= threshold {
                    FindingType::Warning
                } else {
                    FindingType::Info
                },
                format!("{} ({}x)", p.pattern, p.count),
                "occurrences",
                p.count as f64,
            )
        })
        .collect();

    Ok(CheckOutcome {
        summary: format!(
            "{total} error(s) across {} pattern(s) in the last {minutes}m",
            patterns.len()
        ),
        findings,
    })
}

async fn build_baseline(
    job: &MonitoringJob,
    datadog: &DatadogCredentials,
    telemetry: &dyn TelemetrySource,
) -> Result<CheckOutcome, Error> {
    let minutes = config_i64(&job.config, "minutes_back", 60);
    let metrics: Vec<(String, String)> = job
        .config
        .get("metrics")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|m| {
                    Some((
                        m.get("name").and_then(Value::as_str)?.to_string(),
                        m.get("query").and_then(Value::as_str)?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();
    if metrics.is_empty() {
        return Err(Error::Validation(
            "baseline_builder job has no metrics configured".into(),
        ));
    }

    let mut findings = Vec::new();
    for (name, query) in &metrics {
        match telemetry.metric_snapshot(datadog, query, minutes).await? {
            Some(value) => findings.push(metric_finding(
                FindingType::Info,
                format!("baseline: {name}"),
                name,
                value,
            )),
            None => findings.push(finding(
                FindingType::Info,
                format!("baseline: {name} returned no data"),
            )),
        }
    }

    Ok(CheckOutcome {
        summary: format!("baseline captured ({} metric(s))", metrics.len()),
        findings,
    })
}

/// Custom jobs run whatever the config describes: a log query, a metric
/// snapshot, or both. Nothing configured is a configuration error.
async fn run_custom(
    job: &MonitoringJob,
    datadog: &DatadogCredentials,
    telemetry: &dyn TelemetrySource,
) -> Result<CheckOutcome, Error> {
    let minutes = config_i64(&job.config, "minutes_back", job.schedule_interval_minutes);
    let mut findings = Vec::new();

    if let Some(query) = config_str(&job.config, "log_query") {
        for pattern in telemetry
            .error_log_patterns(datadog, query, minutes)
            .await?
        {
            findings.push(metric_finding(
                FindingType::Warning,
                format!("{} ({}x)", pattern.pattern, pattern.count),
                "occurrences",
                pattern.count as f64,
            ));
        }
    }
    if let Some(query) = config_str(&job.config, "metric_query") {
        if let Some(value) = telemetry.metric_snapshot(datadog, query, minutes).await? {
            findings.push(metric_finding(FindingType::Info, query, "value", value));
        }
    }

    if findings.is_empty()
        && config_str(&job.config, "log_query").is_none()
        && config_str(&job.config, "metric_query").is_none()
    {
        return Err(Error::Validation(
            "custom job has neither log_query nor metric_query configured".into(),
        ));
    }
    if findings.is_empty() {
        findings.push(finding(FindingType::Success, "custom check clean"));
    }

    Ok(CheckOutcome {
        summary: format!("custom check ran ({} finding(s))", findings.len()),
        findings,
    })
}

/// Datadog-backed telemetry reader. Uses the org's resolved keys per call;
/// nothing is cached across orgs.
pub struct DatadogTelemetry {
    client: reqwest::Client,
}

impl DatadogTelemetry {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn upstream(e: impl std::fmt::Display) -> Error {
        Error::UpstreamIntegration {
            provider: "datadog".into(),
            message: e.to_string(),
        }
    }

    async fn get_json(
        &self,
        credentials: &DatadogCredentials,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Value, Error> {
        let response = self
            .client
            .get(url)
            .header("DD-API-KEY", &credentials.api_key)
            .header("DD-APPLICATION-KEY", &credentials.app_key)
            .query(params)
            .send()
            .await
            .map_err(Self::upstream)?;
        if !response.status().is_success() {
            return Err(Self::upstream(format!("{url} returned {}", response.status())));
        }
        response.json().await.map_err(Self::upstream)
    }

    /// Last point of the first series for a metrics query.
    async fn query_scalar(
        &self,
        credentials: &DatadogCredentials,
        query: &str,
        minutes_back: i64,
    ) -> Result<Option<f64>, Error> {
        let now = Utc::now().timestamp();
        let url = format!("https://api.{}/api/v1/query", credentials.site);
        let body = self
            .get_json(
                credentials,
                &url,
                &[
                    ("from", (now - minutes_back * 60).to_string()),
                    ("to", now.to_string()),
                    ("query", query.to_string()),
                ],
            )
            .await?;

        let value = body
            .get("series")
            .and_then(Value::as_array)
            .and_then(|series| series.first())
            .and_then(|s| s.get("pointlist"))
            .and_then(Value::as_array)
            .and_then(|points| points.last())
            .and_then(|point| point.get(1))
            .and_then(Value::as_f64);
        Ok(value)
    }
}

impl Default for DatadogTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse raw log messages into coarse patterns: digits masked, truncated,
/// counted. Mirrors how operators eyeball "the same error, many times".
fn bucket_patterns(messages: &[String]) -> Vec<LogPattern> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for message in messages {
        let masked: String = message
            .chars()
            .map(|c| if c.is_ascii_digit() { '?' } else { c })
            .take(100)
            .collect();
        *counts.entry(masked).or_insert(0) += 1;
    }
    let mut patterns: Vec<LogPattern> = counts
        .into_iter()
        .map(|(pattern, count)| LogPattern { pattern, count })
        .collect();
    patterns.sort_by(|a, b| b.count.cmp(&a.count).then(a.pattern.cmp(&b.pattern)));
    patterns
}

#[async_trait]
impl TelemetrySource for DatadogTelemetry {
    async fn recent_deployments(
        &self,
        credentials: &DatadogCredentials,
        service: Option<&str>,
        window_minutes: i64,
    ) -> Result<Vec<Value>, Error> {
        let now = Utc::now().timestamp();
        let mut tags = vec!["deployment".to_string()];
        if let Some(service) = service {
            tags.push(format!("service:{service}"));
        }
        let url = format!("https://api.{}/api/v1/events", credentials.site);
        let body = self
            .get_json(
                credentials,
                &url,
                &[
                    ("start", (now - window_minutes * 60).to_string()),
                    ("end", now.to_string()),
                    ("tags", tags.join(",")),
                ],
            )
            .await?;
        Ok(body
            .get("events")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn service_health(
        &self,
        credentials: &DatadogCredentials,
        service: &str,
        env: &str,
    ) -> Result<ServiceHealth, Error> {
        let scope = format!("service:{service},env:{env}");
        let hits = self
            .query_scalar(
                credentials,
                &format!("sum:trace.http.request.hits{{{scope}}}.as_rate()"),
                30,
            )
            .await?;
        let errors = self
            .query_scalar(
                credentials,
                &format!("sum:trace.http.request.errors{{{scope}}}.as_rate()"),
                30,
            )
            .await?;
        let latency = self
            .query_scalar(
                credentials,
                &format!("p95:trace.http.request.duration{{{scope}}}"),
                30,
            )
            .await?;

        let error_rate = match (hits, errors) {
            (Some(hits), Some(errors)) if hits > 0.0 => Some(errors / hits),
            _ => None,
        };
        Ok(ServiceHealth {
            error_rate,
            // Datadog reports trace durations in seconds.
            p95_latency_ms: latency.map(|s| s * 1000.0),
            requests_per_minute: hits.map(|h| h * 60.0),
        })
    }

    async fn error_log_patterns(
        &self,
        credentials: &DatadogCredentials,
        query: &str,
        minutes_back: i64,
    ) -> Result<Vec<LogPattern>, Error> {
        let url = format!("https://api.{}/api/v2/logs/events/search", credentials.site);
        let response = self
            .client
            .post(&url)
            .header("DD-API-KEY", &credentials.api_key)
            .header("DD-APPLICATION-KEY", &credentials.app_key)
            .json(&serde_json::json!({
                "filter": {
                    "query": query,
                    "from": format!("now-{minutes_back}m"),
                    "to": "now",
                },
                "page": {"limit": 200},
            }))
            .send()
            .await
            .map_err(Self::upstream)?;
        if !response.status().is_success() {
            return Err(Self::upstream(format!(
                "logs search returned {}",
                response.status()
            )));
        }
        let body: Value = response.json().await.map_err(Self::upstream)?;

        let messages: Vec<String> = body
            .get("data")
            .and_then(Value::as_array)
            .map(|events| {
                events
                    .iter()
                    .filter_map(|e| {
                        e.get("attributes")
                            .and_then(|a| a.get("message"))
                            .and_then(Value::as_str)
                            .map(|m| m.trim().to_string())
                    })
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(bucket_patterns(&messages))
    }

    async fn metric_snapshot(
        &self,
        credentials: &DatadogCredentials,
        query: &str,
        minutes_back: i64,
    ) -> Result<Option<f64>, Error> {
        self.query_scalar(credentials, query, minutes_back).await
    }
}
