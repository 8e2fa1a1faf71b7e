use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::core::agent::{AgentRunRequest, AgentRuntime};
use crate::core::credentials::CredentialResolver;
use crate::core::error::Error;
use crate::core::relay::{ClientEvent, relay};
use crate::core::store::Store;
use crate::core::store::types::{
    FeedbackRating, Investigation, InvestigationResult, NewInvestigation, Runbook,
};

const SIMILAR_WINDOW_DAYS: i64 = 30;
const SIMILAR_LIMIT: i64 = 5;

/// Lifecycle owner for Investigation records: guarded one-directional state
/// transitions, feedback, similarity lookup.
pub struct InvestigationService {
    store: Arc<Store>,
}

impl InvestigationService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Validate and persist a new `queued` record. All-or-nothing: either the
    /// full row exists afterwards or nothing does, and the caller gets a
    /// retryable persistence error.
    pub async fn create(&self, new: NewInvestigation) -> Result<Investigation, Error> {
        if new.org_id.trim().is_empty() {
            return Err(Error::Validation("org_id is required".into()));
        }
        if new.alert_name.trim().is_empty() {
            return Err(Error::Validation("alert_name is required".into()));
        }

        self.store
            .insert_investigation(new, &Utc::now().to_rfc3339())
            .await
            .map_err(Error::persistence)
    }

    pub async fn get(&self, id: &str) -> Result<Investigation, Error> {
        self.store
            .get_investigation(id)
            .await
            .map_err(Error::persistence)?
            .ok_or_else(|| Error::NotFound(format!("investigation {id}")))
    }

    pub async fn list(&self, org_id: &str, limit: i64) -> Result<Vec<Investigation>, Error> {
        self.store
            .list_investigations(org_id, limit)
            .await
            .map_err(Error::persistence)
    }

    /// `queued -> running`. False when the record had already left `queued`.
    pub async fn begin(&self, id: &str) -> Result<bool, Error> {
        self.store
            .mark_investigation_running(id, &Utc::now().to_rfc3339())
            .await
            .map_err(Error::persistence)
    }

    /// Terminal `running -> completed`. All result fields land in one write;
    /// afterwards the matched runbook's usage stats roll up best-effort.
    pub async fn complete(
        &self,
        investigation: &Investigation,
        result: InvestigationResult,
    ) -> Result<bool, Error> {
        let confidence = result.confidence_score;
        let transitioned = self
            .store
            .complete_investigation(&investigation.id, &result)
            .await
            .map_err(Error::persistence)?;

        if transitioned && let Some(runbook_id) = investigation.runbook_id.clone() {
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.record_runbook_outcome(&runbook_id, confidence).await {
                    warn!("failed to roll up stats for runbook {runbook_id}: {e}");
                }
            });
        }
        Ok(transitioned)
    }

    /// Terminal failure. A record that entered `running` must never be left
    /// there when the async run dies; `queued` records that never started are
    /// failed the same way.
    pub async fn fail(&self, id: &str, error_summary: &str, started: DateTime<Utc>) -> Result<bool, Error> {
        let now = Utc::now();
        self.store
            .fail_investigation(
                id,
                error_summary,
                &now.to_rfc3339(),
                (now - started).num_milliseconds().max(0),
            )
            .await
            .map_err(Error::persistence)
    }

    /// No state guard: rating a still-queued or running investigation is
    /// intentionally permitted. Last write wins.
    pub async fn record_feedback(
        &self,
        id: &str,
        rating: FeedbackRating,
        comment: Option<&str>,
    ) -> Result<(), Error> {
        let updated = self
            .store
            .set_investigation_feedback(id, rating, comment)
            .await
            .map_err(Error::persistence)?;
        if !updated {
            return Err(Error::NotFound(format!("investigation {id}")));
        }
        Ok(())
    }

    /// Best-effort similarity lookup: same org, same service or overlapping
    /// alert name, trailing 30 days, newest first, capped at 5. Always an
    /// enrichment; a failing lookup returns empty rather than surfacing.
    pub async fn find_similar(&self, investigation: &Investigation) -> Vec<Investigation> {
        let cutoff = (Utc::now() - Duration::days(SIMILAR_WINDOW_DAYS)).to_rfc3339();
        match self
            .store
            .find_similar_investigations(
                &investigation.org_id,
                &investigation.id,
                investigation.service.as_deref(),
                &investigation.alert_name,
                &cutoff,
                SIMILAR_LIMIT,
            )
            .await
        {
            Ok(similar) => similar,
            Err(e) => {
                warn!(
                    "similarity lookup failed for investigation {}: {e}",
                    investigation.id
                );
                Vec::new()
            }
        }
    }
}

/// Drive one investigation run end to end: resolve credentials, enter
/// `running`, stream the agent runtime through the relay, and land the record
/// in a terminal state. Spawned detached from the trigger path; the webhook
/// response never waits on it.
pub async fn execute(
    service: Arc<InvestigationService>,
    resolver: Arc<CredentialResolver>,
    runtime: Arc<dyn AgentRuntime>,
    mut investigation: Investigation,
    runbook: Option<Runbook>,
    sink: Option<mpsc::Sender<ClientEvent>>,
    request_id: String,
) {
    let started = Utc::now();
    let id = investigation.id.clone();

    if let Some(rb) = &runbook {
        investigation.runbook_id = Some(rb.id.clone());
        if let Err(e) = service.store.set_investigation_runbook(&id, &rb.id).await {
            warn!("failed to attach runbook {} to investigation {id}: {e}", rb.id);
        }
    }

    let credentials = resolver.resolve(&investigation.org_id).await;

    match service.begin(&id).await {
        Ok(true) => {}
        Ok(false) => {
            warn!("investigation {id} was not queued; skipping run");
            return;
        }
        Err(e) => {
            error!("failed to start investigation {id}: {e}");
            return;
        }
    }

    let request = AgentRunRequest::investigation(&investigation, runbook.as_ref(), credentials);
    let rx = match runtime.run(request).await {
        Ok(rx) => rx,
        Err(e) => {
            if let Some(tx) = &sink {
                let _ = tx.send(ClientEvent::Error { error: e.to_string() }).await;
            }
            finalize_failure(&service, &id, &e.to_string(), started).await;
            return;
        }
    };

    let summary = relay(rx, sink, &request_id).await;

    if let Some(stream_error) = summary.error {
        finalize_failure(&service, &id, &stream_error, started).await;
        return;
    }

    let Some(outcome) = summary.outcome else {
        finalize_failure(
            &service,
            &id,
            "agent runtime ended without a result",
            started,
        )
        .await;
        return;
    };

    let now = Utc::now();
    let result = InvestigationResult {
        summary: outcome.summary,
        root_cause: outcome.root_cause,
        confidence_score: outcome.confidence_score,
        findings: outcome.findings,
        suggested_actions: outcome.suggested_actions,
        deployments_found: outcome.deployments_found,
        trace_ref: outcome.trace_ref,
        tool_call_count: summary.tool_call_count,
        completed_at: now.to_rfc3339(),
        duration_ms: (now - started).num_milliseconds().max(0),
    };

    match service.complete(&investigation, result).await {
        Ok(true) => info!(
            "investigation {id} completed ({} tool calls)",
            summary.tool_call_count
        ),
        Ok(false) => warn!("investigation {id} was no longer running at completion"),
        Err(e) => error!("failed to record completion for investigation {id}: {e}"),
    }
}

async fn finalize_failure(
    service: &InvestigationService,
    id: &str,
    reason: &str,
    started: DateTime<Utc>,
) {
    warn!("investigation {id} failed: {reason}");
    if let Err(e) = service.fail(id, reason, started).await {
        error!("failed to record failure for investigation {id}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::types::{Severity, TriggerType};
    use serde_json::json;

    fn service() -> InvestigationService {
        InvestigationService::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    fn new_inv(org: &str, name: &str) -> NewInvestigation {
        NewInvestigation {
            org_id: org.to_string(),
            trigger_type: TriggerType::Webhook,
            trigger_payload: json!({}),
            alert_id: None,
            alert_name: name.to_string(),
            service: Some("checkout".to_string()),
            environment: None,
            severity: Some(Severity::High),
        }
    }

    #[tokio::test]
    async fn create_rejects_blank_fields() {
        let svc = service();
        let err = svc.create(new_inv("org1", "  ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = svc.create(new_inv("", "High Latency")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let svc = service();
        assert!(matches!(
            svc.get("nope").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn feedback_allowed_before_completion() {
        // Intentionally permissive: no state guard on feedback.
        let svc = service();
        let inv = svc.create(new_inv("org1", "High Latency")).await.unwrap();
        svc.record_feedback(&inv.id, FeedbackRating::Helpful, Some("fast"))
            .await
            .unwrap();
        let loaded = svc.get(&inv.id).await.unwrap();
        assert_eq!(loaded.feedback_rating, Some(FeedbackRating::Helpful));
        assert_eq!(
            loaded.status,
            crate::core::store::types::InvestigationStatus::Queued
        );
    }

    #[tokio::test]
    async fn feedback_on_unknown_investigation_is_not_found() {
        let svc = service();
        assert!(matches!(
            svc.record_feedback("ghost", FeedbackRating::Helpful, None)
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn fail_moves_running_record_to_terminal() {
        let svc = service();
        let inv = svc.create(new_inv("org1", "High Latency")).await.unwrap();
        assert!(svc.begin(&inv.id).await.unwrap());
        assert!(svc.fail(&inv.id, "runtime gone", Utc::now()).await.unwrap());
        let loaded = svc.get(&inv.id).await.unwrap();
        assert_eq!(
            loaded.status,
            crate::core::store::types::InvestigationStatus::Failed
        );
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.summary.as_deref(), Some("runtime gone"));
    }

    #[tokio::test]
    async fn find_similar_never_returns_self() {
        let svc = service();
        let inv = svc.create(new_inv("org1", "High Latency")).await.unwrap();
        let similar = svc.find_similar(&inv).await;
        assert!(similar.iter().all(|s| s.id != inv.id));
    }
}
