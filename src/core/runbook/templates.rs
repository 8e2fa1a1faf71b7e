use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

use crate::core::store::types::{RunbookStep, RunbookTrigger, TriggerConfig};

/// A pre-built runbook usable as a creation seed. Same shape as a stored
/// runbook minus identity and counters.
#[derive(Debug, Clone, Serialize)]
pub struct RunbookTemplate {
    pub template_id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub trigger_type: RunbookTrigger,
    pub trigger_config: TriggerConfig,
    pub investigation_steps: Vec<RunbookStep>,
    pub if_found_actions: BTreeMap<String, String>,
    pub priority: i64,
}

fn step(action: &str, params: serde_json::Value, reason: &str) -> RunbookStep {
    RunbookStep {
        action: action.to_string(),
        params,
        reason: Some(reason.to_string()),
    }
}

fn actions(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The fixed template catalog. Read-only; served as creation seeds.
pub fn catalog() -> Vec<RunbookTemplate> {
    vec![
        RunbookTemplate {
            template_id: "high-latency",
            name: "High Latency",
            description: "Latency regression triage: changes first, then resource pressure.",
            trigger_type: RunbookTrigger::AlertPattern,
            trigger_config: TriggerConfig {
                pattern: Some("latency|p9[59]|response time".to_string()),
                severity: vec!["critical".to_string(), "high".to_string()],
                services: Vec::new(),
            },
            investigation_steps: vec![
                step(
                    "get_monitor_details",
                    json!({}),
                    "confirm the alert is real and read its thresholds",
                ),
                step(
                    "get_recent_deployments",
                    json!({"window_minutes": 240}),
                    "most latency regressions follow a deploy",
                ),
                step(
                    "get_apm_service_summary",
                    json!({}),
                    "check latency against error rate and throughput",
                ),
                step(
                    "query_metrics",
                    json!({"metric": "trace.http.request.duration", "aggregate": "p95"}),
                    "confirm which percentile moved and when",
                ),
            ],
            if_found_actions: actions(&[
                (
                    "recent_deployment",
                    "A deployment landed shortly before the regression. Roll it back and \
                     confirm p95 recovers before digging further.",
                ),
                (
                    "resource_saturation",
                    "CPU or memory is saturated. Scale the service out and file a capacity \
                     follow-up.",
                ),
                (
                    "downstream_dependency",
                    "A downstream call dominates the latency. Page the owning team and add a \
                     timeout/circuit breaker if one is missing.",
                ),
            ]),
            priority: 10,
        },
        RunbookTemplate {
            template_id: "error-rate-spike",
            name: "Error Rate Spike",
            description: "Sudden error-rate increase: correlate with deploys and log clusters.",
            trigger_type: RunbookTrigger::AlertPattern,
            trigger_config: TriggerConfig {
                pattern: Some("error rate|5xx|exception".to_string()),
                severity: Vec::new(),
                services: Vec::new(),
            },
            investigation_steps: vec![
                step(
                    "get_recent_deployments",
                    json!({"window_minutes": 240}),
                    "new errors usually ship with new code",
                ),
                step(
                    "search_logs",
                    json!({"query": "status:error", "window_minutes": 30}),
                    "cluster the actual error messages",
                ),
                step(
                    "get_datadog_events",
                    json!({}),
                    "look for config or infra changes",
                ),
            ],
            if_found_actions: actions(&[
                (
                    "recent_deployment",
                    "Errors started with a deploy. Roll back first, bisect later.",
                ),
                (
                    "high_error_rate",
                    "Errors cluster on one endpoint or exception. Link the log cluster in the \
                     incident channel and assign the owning team.",
                ),
                (
                    "config_change",
                    "A configuration event precedes the spike. Revert the config change and \
                     re-check the rate.",
                ),
            ]),
            priority: 20,
        },
        RunbookTemplate {
            template_id: "memory-pressure",
            name: "Memory Pressure",
            description: "OOM / memory growth triage for a single service.",
            trigger_type: RunbookTrigger::AlertPattern,
            trigger_config: TriggerConfig {
                pattern: Some("memory|oom|rss".to_string()),
                severity: Vec::new(),
                services: Vec::new(),
            },
            investigation_steps: vec![
                step(
                    "query_metrics",
                    json!({"metric": "system.mem.used", "aggregate": "max"}),
                    "distinguish a leak slope from a step change",
                ),
                step(
                    "get_recent_deployments",
                    json!({"window_minutes": 1440}),
                    "a step change points at a deploy; a slope points at a leak",
                ),
                step(
                    "search_logs",
                    json!({"query": "OOMKilled OR OutOfMemory", "window_minutes": 120}),
                    "confirm the kernel or runtime is actually killing processes",
                ),
            ],
            if_found_actions: actions(&[
                (
                    "memory_growth",
                    "Memory grows steadily between restarts: treat as a leak. Capture a heap \
                     profile before the next restart and open a bug against the service.",
                ),
                (
                    "recent_deployment",
                    "Memory stepped up at a deploy. Roll back and compare baselines.",
                ),
            ]),
            priority: 30,
        },
        RunbookTemplate {
            template_id: "database-issues",
            name: "Database Issues",
            description: "Database saturation and connection-pool triage.",
            trigger_type: RunbookTrigger::AlertPattern,
            trigger_config: TriggerConfig {
                pattern: Some("database|postgres|connection pool|deadlock".to_string()),
                severity: Vec::new(),
                services: Vec::new(),
            },
            investigation_steps: vec![
                step(
                    "query_metrics",
                    json!({"metric": "postgresql.connections", "aggregate": "max"}),
                    "pool exhaustion is the most common database alert cause",
                ),
                step(
                    "search_logs",
                    json!({"query": "deadlock OR \"too many connections\"", "window_minutes": 60}),
                    "find the failing statements",
                ),
                step(
                    "get_recent_deployments",
                    json!({"window_minutes": 240}),
                    "query-shape changes arrive with deploys",
                ),
            ],
            if_found_actions: actions(&[
                (
                    "connection_pool_exhausted",
                    "The pool is at its ceiling. Raise the pool cap only if the database has \
                     headroom; otherwise find the connection leak first.",
                ),
                (
                    "slow_queries",
                    "One query dominates. EXPLAIN it, add the missing index, and backfill \
                     off-peak.",
                ),
            ]),
            priority: 40,
        },
        RunbookTemplate {
            template_id: "service-degraded",
            name: "Service Degraded",
            description: "Generic degradation sweep for a named service.",
            trigger_type: RunbookTrigger::ServiceAlert,
            trigger_config: TriggerConfig {
                pattern: None,
                severity: Vec::new(),
                services: Vec::new(),
            },
            investigation_steps: vec![
                step(
                    "get_apm_service_summary",
                    json!({}),
                    "one view of latency, errors and throughput",
                ),
                step(
                    "get_recent_deployments",
                    json!({"window_minutes": 240}),
                    "changes first",
                ),
                step(
                    "get_datadog_events",
                    json!({}),
                    "infra events around the alert window",
                ),
                step(
                    "search_logs",
                    json!({"query": "status:error", "window_minutes": 30}),
                    "whatever the service itself says is wrong",
                ),
            ],
            if_found_actions: actions(&[
                (
                    "recent_deployment",
                    "Degradation follows a deploy. Roll back and re-check the service summary.",
                ),
                (
                    "traffic_spike",
                    "Throughput roughly doubled before the degradation. Scale out and check \
                     upstream callers for retry storms.",
                ),
            ]),
            priority: 50,
        },
    ]
}
