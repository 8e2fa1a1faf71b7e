use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct OrgRecord {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Lenient parse: unknown levels are treated as absent rather than
    /// rejected, so a webhook never bounces on an unrecognized enum.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Webhook,
    Manual,
    Scheduled,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Webhook => "webhook",
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(TriggerType::Webhook),
            "manual" => Some(TriggerType::Manual),
            "scheduled" => Some(TriggerType::Scheduled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestigationStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl InvestigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationStatus::Queued => "queued",
            InvestigationStatus::Running => "running",
            InvestigationStatus::Completed => "completed",
            InvestigationStatus::Failed => "failed",
            InvestigationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(InvestigationStatus::Queued),
            "running" => Some(InvestigationStatus::Running),
            "completed" => Some(InvestigationStatus::Completed),
            "failed" => Some(InvestigationStatus::Failed),
            "cancelled" => Some(InvestigationStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvestigationStatus::Completed
                | InvestigationStatus::Failed
                | InvestigationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackRating {
    Helpful,
    NotHelpful,
}

impl FeedbackRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackRating::Helpful => "helpful",
            FeedbackRating::NotHelpful => "not_helpful",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "helpful" => Some(FeedbackRating::Helpful),
            "not_helpful" => Some(FeedbackRating::NotHelpful),
            _ => None,
        }
    }
}

/// A categorized, confidence-scored observation produced during an
/// investigation, with supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub action: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub automated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Investigation {
    pub id: String,
    pub org_id: String,
    pub trigger_type: TriggerType,
    /// Inbound payload preserved verbatim for audit.
    pub trigger_payload: Value,
    pub alert_id: Option<String>,
    pub alert_name: String,
    pub service: Option<String>,
    pub environment: Option<String>,
    pub severity: Option<Severity>,
    pub status: InvestigationStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub summary: Option<String>,
    pub root_cause: Option<String>,
    pub confidence_score: Option<f64>,
    pub findings: Vec<Finding>,
    pub suggested_actions: Vec<SuggestedAction>,
    pub deployments_found: Vec<Value>,
    pub trace_ref: Option<String>,
    pub tool_call_count: i64,
    pub runbook_id: Option<String>,
    pub feedback_rating: Option<FeedbackRating>,
    pub feedback_comment: Option<String>,
}

/// Result fields written atomically with the terminal `completed` transition.
#[derive(Debug, Clone, Default)]
pub struct InvestigationResult {
    pub summary: Option<String>,
    pub root_cause: Option<String>,
    pub confidence_score: Option<f64>,
    pub findings: Vec<Finding>,
    pub suggested_actions: Vec<SuggestedAction>,
    pub deployments_found: Vec<Value>,
    pub trace_ref: Option<String>,
    pub tool_call_count: i64,
    pub completed_at: String,
    pub duration_ms: i64,
}

pub struct NewInvestigation {
    pub org_id: String,
    pub trigger_type: TriggerType,
    pub trigger_payload: Value,
    pub alert_id: Option<String>,
    pub alert_name: String,
    pub service: Option<String>,
    pub environment: Option<String>,
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunbookTrigger {
    AlertPattern,
    ServiceAlert,
    Manual,
}

impl RunbookTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunbookTrigger::AlertPattern => "alert_pattern",
            RunbookTrigger::ServiceAlert => "service_alert",
            RunbookTrigger::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alert_pattern" => Some(RunbookTrigger::AlertPattern),
            "service_alert" => Some(RunbookTrigger::ServiceAlert),
            "manual" => Some(RunbookTrigger::Manual),
            _ => None,
        }
    }
}

/// Trigger condition for a runbook. `pattern` + `severity` apply to
/// `alert_pattern` triggers, `services` to `service_alert`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub severity: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookStep {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Runbook {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: RunbookTrigger,
    pub trigger_config: TriggerConfig,
    pub investigation_steps: Vec<RunbookStep>,
    /// condition-key -> human-authored recommendation text.
    pub if_found_actions: BTreeMap<String, String>,
    pub enabled: bool,
    pub priority: i64,
    pub times_triggered: i64,
    pub times_matched: i64,
    pub avg_confidence: Option<f64>,
    pub created_at: String,
}

pub struct NewRunbook {
    pub org_id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: RunbookTrigger,
    pub trigger_config: TriggerConfig,
    pub investigation_steps: Vec<RunbookStep>,
    pub if_found_actions: BTreeMap<String, String>,
    pub enabled: bool,
    pub priority: i64,
}

#[derive(Default)]
pub struct RunbookPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub trigger_type: Option<RunbookTrigger>,
    pub trigger_config: Option<TriggerConfig>,
    pub investigation_steps: Option<Vec<RunbookStep>>,
    pub if_found_actions: Option<BTreeMap<String, String>>,
    pub enabled: Option<bool>,
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DeploymentWatcher,
    HealthCheck,
    ErrorScanner,
    BaselineBuilder,
    Custom,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DeploymentWatcher => "deployment_watcher",
            JobType::HealthCheck => "health_check",
            JobType::ErrorScanner => "error_scanner",
            JobType::BaselineBuilder => "baseline_builder",
            JobType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deployment_watcher" => Some(JobType::DeploymentWatcher),
            "health_check" => Some(JobType::HealthCheck),
            "error_scanner" => Some(JobType::ErrorScanner),
            "baseline_builder" => Some(JobType::BaselineBuilder),
            "custom" => Some(JobType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPolicy {
    Always,
    Issues,
    Never,
}

impl NotifyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyPolicy::Always => "always",
            NotifyPolicy::Issues => "issues",
            NotifyPolicy::Never => "never",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(NotifyPolicy::Always),
            "issues" => Some(NotifyPolicy::Issues),
            "never" => Some(NotifyPolicy::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringJob {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub job_type: JobType,
    pub schedule_interval_minutes: i64,
    pub enabled: bool,
    pub config: Value,
    pub notify_on: NotifyPolicy,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub consecutive_failures: i64,
    pub created_at: String,
}

pub struct NewMonitoringJob {
    pub org_id: String,
    pub name: String,
    pub job_type: JobType,
    pub schedule_interval_minutes: i64,
    pub enabled: bool,
    pub config: Value,
    pub notify_on: NotifyPolicy,
}

#[derive(Default)]
pub struct MonitoringJobPatch {
    pub name: Option<String>,
    pub schedule_interval_minutes: Option<i64>,
    pub enabled: Option<bool>,
    pub config: Option<Value>,
    pub notify_on: Option<NotifyPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingType {
    Info,
    Warning,
    Error,
    Success,
}

impl FindingType {
    pub fn is_issue(&self) -> bool {
        matches!(self, FindingType::Warning | FindingType::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFinding {
    pub finding_type: FindingType,
    pub message: String,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringJobRun {
    pub id: String,
    pub job_id: String,
    pub org_id: String,
    pub status: JobRunStatus,
    pub summary: Option<String>,
    pub findings: Vec<RunFinding>,
    pub error_message: Option<String>,
    pub alert_sent: bool,
    pub alert_severity: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Datadog,
    Github,
    Slack,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Datadog => "datadog",
            Provider::Github => "github",
            Provider::Slack => "slack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "datadog" => Some(Provider::Datadog),
            "github" => Some(Provider::Github),
            "slack" => Some(Provider::Slack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Connected,
    Disconnected,
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Connected => "connected",
            IntegrationStatus::Disconnected => "disconnected",
            IntegrationStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(IntegrationStatus::Connected),
            "disconnected" => Some(IntegrationStatus::Disconnected),
            "error" => Some(IntegrationStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Integration {
    pub id: String,
    pub org_id: String,
    pub provider: Provider,
    pub status: IntegrationStatus,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}
