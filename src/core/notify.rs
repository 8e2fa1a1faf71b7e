use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::core::credentials::SlackCredentials;
use crate::core::error::Error;
use crate::core::store::types::{FindingType, RunFinding};

/// Outbound alerting boundary. The monitoring scheduler decides *whether* to
/// notify; implementations only deliver.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, credentials: &SlackCredentials, text: &str) -> Result<(), Error>;
}

/// Posts to the Slack Web API (`chat.postMessage`) with the org's bot token.
pub struct SlackNotifier {
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SlackNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, credentials: &SlackCredentials, text: &str) -> Result<(), Error> {
        let response = self
            .client
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&credentials.bot_token)
            .json(&json!({
                "channel": credentials.channel_id,
                "text": text,
                "unfurl_links": false,
            }))
            .send()
            .await
            .map_err(|e| Error::UpstreamIntegration {
                provider: "slack".into(),
                message: e.to_string(),
            })?;

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| Error::UpstreamIntegration {
                    provider: "slack".into(),
                    message: format!("unreadable response: {e}"),
                })?;

        if body.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
            let reason = body
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::UpstreamIntegration {
                provider: "slack".into(),
                message: format!("chat.postMessage failed: {reason}"),
            });
        }
        debug!("slack notification delivered to {}", credentials.channel_id);
        Ok(())
    }
}

fn finding_icon(finding_type: FindingType) -> &'static str {
    match finding_type {
        FindingType::Error => ":red_circle:",
        FindingType::Warning => ":warning:",
        FindingType::Success => ":white_check_mark:",
        FindingType::Info => ":information_source:",
    }
}

/// Render a monitoring run as a Slack message: headline, then findings worst
/// first, metrics inline where present.
pub fn format_job_alert(job_name: &str, summary: Option<&str>, findings: &[RunFinding]) -> String {
    let mut lines = vec![format!("*Monitoring: {job_name}*")];
    if let Some(summary) = summary {
        lines.push(summary.to_string());
    }

    let mut ordered: Vec<&RunFinding> = findings.iter().collect();
    ordered.sort_by_key(|f| match f.finding_type {
        FindingType::Error => 0,
        FindingType::Warning => 1,
        FindingType::Info => 2,
        FindingType::Success => 3,
    });

    for finding in ordered {
        let mut line = format!("{} {}", finding_icon(finding.finding_type), finding.message);
        if let (Some(metric), Some(value)) = (&finding.metric, finding.value) {
            line.push_str(&format!(" ({metric}={value:.2})"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(finding_type: FindingType, message: &str) -> RunFinding {
        RunFinding {
            finding_type,
            message: message.to_string(),
            metric: None,
            value: None,
        }
    }

    #[test]
    fn alert_orders_findings_worst_first() {
        let text = format_job_alert(
            "checkout health",
            Some("2 issues detected"),
            &[
                finding(FindingType::Info, "checked 3 services"),
                finding(FindingType::Error, "error rate 12%"),
                finding(FindingType::Warning, "p95 latency elevated"),
            ],
        );
        let error_pos = text.find("error rate").unwrap();
        let warning_pos = text.find("p95 latency").unwrap();
        let info_pos = text.find("checked 3").unwrap();
        assert!(error_pos < warning_pos && warning_pos < info_pos);
        assert!(text.starts_with("*Monitoring: checkout health*"));
    }

    #[test]
    fn alert_includes_metric_values() {
        let text = format_job_alert(
            "baseline",
            None,
            &[RunFinding {
                finding_type: FindingType::Info,
                message: "checkout error rate".to_string(),
                metric: Some("error_rate".to_string()),
                value: Some(0.0123),
            }],
        );
        assert!(text.contains("(error_rate=0.01)"));
    }
}
