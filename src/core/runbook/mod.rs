pub mod templates;

use anyhow::Result;
use regex::RegexBuilder;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::store::Store;
use crate::core::store::types::{Runbook, RunbookTrigger, Severity};

/// Normalized alert fields the matcher evaluates trigger configs against.
#[derive(Debug, Clone, Default)]
pub struct AlertContext {
    pub name: String,
    pub service: Option<String>,
    pub severity: Option<Severity>,
    pub tags: Vec<String>,
}

/// Selects the investigation playbook for an inbound alert.
pub struct RunbookMatcher {
    store: Arc<Store>,
}

impl RunbookMatcher {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// First enabled runbook (priority ascending, creation order tie-break)
    /// whose trigger matches the alert. No match is not an error: the
    /// investigation proceeds agent-driven with no playbook.
    pub async fn match_alert(&self, org_id: &str, alert: &AlertContext) -> Result<Option<Runbook>> {
        let runbooks = self.store.list_runbooks(org_id, true).await?;
        for runbook in runbooks {
            if trigger_matches(&runbook, alert) {
                debug!(
                    "runbook '{}' matched alert '{}' for org {}",
                    runbook.name, alert.name, org_id
                );
                let store = self.store.clone();
                let id = runbook.id.clone();
                // Usage counter is best-effort; never blocks the match.
                tokio::spawn(async move {
                    if let Err(e) = store.increment_runbook_matched(&id).await {
                        warn!("failed to bump times_matched for runbook {id}: {e}");
                    }
                });
                return Ok(Some(runbook));
            }
        }
        Ok(None)
    }
}

/// Evaluate one runbook's trigger config against an alert.
pub fn trigger_matches(runbook: &Runbook, alert: &AlertContext) -> bool {
    match runbook.trigger_type {
        RunbookTrigger::AlertPattern => {
            let Some(pattern) = runbook
                .trigger_config
                .pattern
                .as_deref()
                .filter(|p| !p.is_empty())
            else {
                return false;
            };
            let regex = match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => re,
                Err(_) => {
                    // Invalid pattern: skip this runbook rather than failing
                    // the whole match pass.
                    debug!("runbook '{}' has an invalid pattern", runbook.name);
                    return false;
                }
            };
            if !regex.is_match(&alert.name) {
                return false;
            }
            severity_allowed(&runbook.trigger_config.severity, alert.severity)
        }
        RunbookTrigger::ServiceAlert => {
            let Some(service) = alert.service.as_deref() else {
                return false;
            };
            let service = service.to_lowercase();
            runbook
                .trigger_config
                .services
                .iter()
                .any(|allowed| !allowed.is_empty() && service.contains(&allowed.to_lowercase()))
        }
        // Manual runbooks are only ever selected explicitly.
        RunbookTrigger::Manual => false,
    }
}

/// An absent severity list means "match any severity".
fn severity_allowed(allowed: &[String], severity: Option<Severity>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match severity {
        Some(sev) => allowed.iter().any(|s| s.eq_ignore_ascii_case(sev.as_str())),
        None => false,
    }
}

/// Conditional recommendation lookup: direct map access, no fallback or
/// templating. An unmatched key yields no recommendation and the caller
/// degrades gracefully.
pub fn resolve_action<'a>(runbook: &'a Runbook, condition_key: &str) -> Option<&'a str> {
    runbook
        .if_found_actions
        .get(condition_key)
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::types::{NewRunbook, RunbookStep, TriggerConfig};
    use std::collections::BTreeMap;

    fn runbook_with(trigger_type: RunbookTrigger, config: TriggerConfig) -> Runbook {
        Runbook {
            id: "rb1".to_string(),
            org_id: "org1".to_string(),
            name: "test".to_string(),
            description: None,
            trigger_type,
            trigger_config: config,
            investigation_steps: Vec::new(),
            if_found_actions: BTreeMap::from([(
                "recent_deployment".to_string(),
                "Roll back the deploy and verify latency recovers.".to_string(),
            )]),
            enabled: true,
            priority: 100,
            times_triggered: 0,
            times_matched: 0,
            avg_confidence: None,
            created_at: "t0".to_string(),
        }
    }

    fn alert(name: &str, service: Option<&str>, severity: Option<Severity>) -> AlertContext {
        AlertContext {
            name: name.to_string(),
            service: service.map(String::from),
            severity,
            tags: Vec::new(),
        }
    }

    #[test]
    fn pattern_matches_case_insensitively() {
        let rb = runbook_with(
            RunbookTrigger::AlertPattern,
            TriggerConfig {
                pattern: Some("latency|timeout".to_string()),
                ..Default::default()
            },
        );
        assert!(trigger_matches(&rb, &alert("High LATENCY P99", None, None)));
        assert!(!trigger_matches(&rb, &alert("Error rate spike", None, None)));
    }

    #[test]
    fn severity_allowlist_excludes_even_when_pattern_matches() {
        let rb = runbook_with(
            RunbookTrigger::AlertPattern,
            TriggerConfig {
                pattern: Some("latency|timeout".to_string()),
                severity: vec!["critical".to_string(), "high".to_string()],
                ..Default::default()
            },
        );
        assert!(!trigger_matches(
            &rb,
            &alert("High Latency P99", None, Some(Severity::Medium))
        ));
        assert!(trigger_matches(
            &rb,
            &alert("High Latency P99", None, Some(Severity::Critical))
        ));
        // Allow-list set but alert has no severity: excluded.
        assert!(!trigger_matches(&rb, &alert("High Latency P99", None, None)));
    }

    #[test]
    fn absent_severity_list_matches_any() {
        let rb = runbook_with(
            RunbookTrigger::AlertPattern,
            TriggerConfig {
                pattern: Some("latency".to_string()),
                ..Default::default()
            },
        );
        assert!(trigger_matches(&rb, &alert("latency up", None, None)));
        assert!(trigger_matches(
            &rb,
            &alert("latency up", None, Some(Severity::Low))
        ));
    }

    #[test]
    fn invalid_pattern_never_matches() {
        let rb = runbook_with(
            RunbookTrigger::AlertPattern,
            TriggerConfig {
                pattern: Some("latency[".to_string()),
                ..Default::default()
            },
        );
        assert!(!trigger_matches(&rb, &alert("latency[", None, None)));
    }

    #[test]
    fn service_alert_matches_membership() {
        let rb = runbook_with(
            RunbookTrigger::ServiceAlert,
            TriggerConfig {
                services: vec!["checkout".to_string(), "payments".to_string()],
                ..Default::default()
            },
        );
        assert!(trigger_matches(&rb, &alert("any", Some("checkout"), None)));
        assert!(trigger_matches(&rb, &alert("any", Some("Checkout-API"), None)));
        assert!(!trigger_matches(&rb, &alert("any", Some("search"), None)));
        assert!(!trigger_matches(&rb, &alert("any", None, None)));
    }

    #[test]
    fn manual_runbooks_never_auto_match() {
        let rb = runbook_with(
            RunbookTrigger::Manual,
            TriggerConfig {
                pattern: Some(".*".to_string()),
                ..Default::default()
            },
        );
        assert!(!trigger_matches(&rb, &alert("anything", Some("svc"), None)));
    }

    #[test]
    fn resolve_action_is_direct_lookup_only() {
        let rb = runbook_with(RunbookTrigger::Manual, TriggerConfig::default());
        assert_eq!(
            resolve_action(&rb, "recent_deployment"),
            Some("Roll back the deploy and verify latency recovers.")
        );
        assert_eq!(resolve_action(&rb, "recent deployment"), None);
        assert_eq!(resolve_action(&rb, "unknown_condition"), None);
    }

    #[tokio::test]
    async fn match_returns_lowest_priority_then_earliest() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let matcher = RunbookMatcher::new(store.clone());

        let mk = |name: &str, priority: i64| NewRunbook {
            org_id: "org1".to_string(),
            name: name.to_string(),
            description: None,
            trigger_type: RunbookTrigger::AlertPattern,
            trigger_config: TriggerConfig {
                pattern: Some("latency".to_string()),
                ..Default::default()
            },
            investigation_steps: vec![RunbookStep {
                action: "get_recent_deployments".to_string(),
                params: serde_json::json!({}),
                reason: None,
            }],
            if_found_actions: BTreeMap::new(),
            enabled: true,
            priority,
        };

        store.insert_runbook(mk("late", 50), "t0").await.unwrap();
        let winner = store.insert_runbook(mk("early", 10), "t1").await.unwrap();
        store.insert_runbook(mk("tied", 10), "t2").await.unwrap();

        let matched = matcher
            .match_alert("org1", &alert("High Latency", None, None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.id, winner.id);
    }

    #[tokio::test]
    async fn unrelated_priority_change_does_not_affect_match() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let matcher = RunbookMatcher::new(store.clone());

        let latency = store
            .insert_runbook(
                NewRunbook {
                    org_id: "org1".to_string(),
                    name: "latency".to_string(),
                    description: None,
                    trigger_type: RunbookTrigger::AlertPattern,
                    trigger_config: TriggerConfig {
                        pattern: Some("latency".to_string()),
                        ..Default::default()
                    },
                    investigation_steps: vec![RunbookStep {
                        action: "query_metrics".to_string(),
                        params: serde_json::json!({}),
                        reason: None,
                    }],
                    if_found_actions: BTreeMap::new(),
                    enabled: true,
                    priority: 20,
                },
                "t0",
            )
            .await
            .unwrap();
        let errors = store
            .insert_runbook(
                NewRunbook {
                    org_id: "org1".to_string(),
                    name: "errors".to_string(),
                    description: None,
                    trigger_type: RunbookTrigger::AlertPattern,
                    trigger_config: TriggerConfig {
                        pattern: Some("error rate".to_string()),
                        ..Default::default()
                    },
                    investigation_steps: vec![RunbookStep {
                        action: "search_logs".to_string(),
                        params: serde_json::json!({}),
                        reason: None,
                    }],
                    if_found_actions: BTreeMap::new(),
                    enabled: true,
                    priority: 30,
                },
                "t1",
            )
            .await
            .unwrap();

        let before = matcher
            .match_alert("org1", &alert("High Latency", None, None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.id, latency.id);

        // Changing the non-matching runbook's priority is irrelevant.
        store
            .update_runbook(
                &errors.id,
                crate::core::store::types::RunbookPatch {
                    priority: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let after = matcher
            .match_alert("org1", &alert("High Latency", None, None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.id, latency.id);
    }

    #[tokio::test]
    async fn no_match_is_not_an_error() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let matcher = RunbookMatcher::new(store);
        let result = matcher
            .match_alert("org1", &alert("Mystery alert", None, None))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
