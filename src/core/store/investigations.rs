use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use super::{Store, bad_column};
use super::types::{
    FeedbackRating, Investigation, InvestigationResult, InvestigationStatus, NewInvestigation,
    Severity, TriggerType,
};

const INVESTIGATION_COLUMNS: &str = "id, org_id, trigger_type, trigger_payload, alert_id, \
     alert_name, service, environment, severity, status, created_at, started_at, completed_at, \
     duration_ms, summary, root_cause, confidence_score, findings, suggested_actions, \
     deployments_found, trace_ref, tool_call_count, runbook_id, feedback_rating, feedback_comment";

fn investigation_from_row(row: &Row<'_>) -> rusqlite::Result<Investigation> {
    let trigger_type: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let severity: Option<String> = row.get(8)?;
    let status: String = row.get(9)?;
    let findings: String = row.get(17)?;
    let actions: String = row.get(18)?;
    let deployments: String = row.get(19)?;
    let rating: Option<String> = row.get(23)?;

    Ok(Investigation {
        id: row.get(0)?,
        org_id: row.get(1)?,
        trigger_type: TriggerType::parse(&trigger_type)
            .ok_or_else(|| bad_column(2, "trigger_type", &trigger_type))?,
        trigger_payload: serde_json::from_str(&payload)
            .map_err(|_| bad_column(3, "trigger_payload", &payload))?,
        alert_id: row.get(4)?,
        alert_name: row.get(5)?,
        service: row.get(6)?,
        environment: row.get(7)?,
        severity: severity.as_deref().and_then(Severity::parse),
        status: InvestigationStatus::parse(&status)
            .ok_or_else(|| bad_column(9, "status", &status))?,
        created_at: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
        duration_ms: row.get(13)?,
        summary: row.get(14)?,
        root_cause: row.get(15)?,
        confidence_score: row.get(16)?,
        findings: serde_json::from_str(&findings).unwrap_or_default(),
        suggested_actions: serde_json::from_str(&actions).unwrap_or_default(),
        deployments_found: serde_json::from_str(&deployments).unwrap_or_default(),
        trace_ref: row.get(20)?,
        tool_call_count: row.get(21)?,
        runbook_id: row.get(22)?,
        feedback_rating: rating.as_deref().and_then(FeedbackRating::parse),
        feedback_comment: row.get(24)?,
    })
}

impl Store {
    /// All-or-nothing create: either the full `queued` row exists afterwards
    /// or nothing does.
    pub async fn insert_investigation(
        &self,
        new: NewInvestigation,
        created_at: &str,
    ) -> Result<Investigation> {
        let id = Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO investigations (id, org_id, trigger_type, trigger_payload, alert_id, \
             alert_name, service, environment, severity, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                new.org_id,
                new.trigger_type.as_str(),
                new.trigger_payload.to_string(),
                new.alert_id,
                new.alert_name,
                new.service,
                new.environment,
                new.severity.map(|s| s.as_str()),
                InvestigationStatus::Queued.as_str(),
                created_at,
            ],
        )?;

        Ok(Investigation {
            id,
            org_id: new.org_id,
            trigger_type: new.trigger_type,
            trigger_payload: new.trigger_payload,
            alert_id: new.alert_id,
            alert_name: new.alert_name,
            service: new.service,
            environment: new.environment,
            severity: new.severity,
            status: InvestigationStatus::Queued,
            created_at: created_at.to_string(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            summary: None,
            root_cause: None,
            confidence_score: None,
            findings: Vec::new(),
            suggested_actions: Vec::new(),
            deployments_found: Vec::new(),
            trace_ref: None,
            tool_call_count: 0,
            runbook_id: None,
            feedback_rating: None,
            feedback_comment: None,
        })
    }

    pub async fn get_investigation(&self, id: &str) -> Result<Option<Investigation>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {INVESTIGATION_COLUMNS} FROM investigations WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id], investigation_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_investigations(&self, org_id: &str, limit: i64) -> Result<Vec<Investigation>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {INVESTIGATION_COLUMNS} FROM investigations \
             WHERE org_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![org_id, limit], investigation_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// `queued -> running`. Returns false if the record was not in `queued`
    /// (transitions are one-directional, so a second start is a no-op).
    pub async fn mark_investigation_running(&self, id: &str, started_at: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE investigations SET status = 'running', started_at = ?2 \
             WHERE id = ?1 AND status = 'queued'",
            params![id, started_at],
        )?;
        Ok(changed > 0)
    }

    pub async fn set_investigation_runbook(&self, id: &str, runbook_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE investigations SET runbook_id = ?2 WHERE id = ?1",
            params![id, runbook_id],
        )?;
        Ok(())
    }

    /// Terminal `running -> completed`: all result fields land in one UPDATE.
    pub async fn complete_investigation(
        &self,
        id: &str,
        result: &InvestigationResult,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE investigations SET status = 'completed', summary = ?2, root_cause = ?3, \
             confidence_score = ?4, findings = ?5, suggested_actions = ?6, \
             deployments_found = ?7, trace_ref = ?8, tool_call_count = ?9, \
             completed_at = ?10, duration_ms = ?11 \
             WHERE id = ?1 AND status = 'running'",
            params![
                id,
                result.summary,
                result.root_cause,
                result.confidence_score,
                serde_json::to_string(&result.findings)?,
                serde_json::to_string(&result.suggested_actions)?,
                serde_json::to_string(&result.deployments_found)?,
                result.trace_ref,
                result.tool_call_count,
                result.completed_at,
                result.duration_ms,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Terminal failure. Reachable from `queued` as well, so a run that dies
    /// before its first runtime call still leaves a terminal record.
    pub async fn fail_investigation(
        &self,
        id: &str,
        error_summary: &str,
        completed_at: &str,
        duration_ms: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE investigations SET status = 'failed', summary = ?2, \
             completed_at = ?3, duration_ms = ?4 \
             WHERE id = ?1 AND status IN ('queued', 'running')",
            params![id, error_summary, completed_at, duration_ms],
        )?;
        Ok(changed > 0)
    }

    /// Feedback has no state guard: rating a still-running investigation is
    /// intentionally permitted. Last write wins.
    pub async fn set_investigation_feedback(
        &self,
        id: &str,
        rating: FeedbackRating,
        comment: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE investigations SET feedback_rating = ?2, feedback_comment = ?3 WHERE id = ?1",
            params![id, rating.as_str(), comment],
        )?;
        Ok(changed > 0)
    }

    /// Recent investigations resembling the given one: same org, same service
    /// or overlapping alert name, newest first, capped.
    pub async fn find_similar_investigations(
        &self,
        org_id: &str,
        exclude_id: &str,
        service: Option<&str>,
        alert_name: &str,
        cutoff: &str,
        limit: i64,
    ) -> Result<Vec<Investigation>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {INVESTIGATION_COLUMNS} FROM investigations \
             WHERE org_id = ?1 AND id != ?2 AND created_at >= ?3 \
               AND ((?4 IS NOT NULL AND service = ?4) \
                    OR instr(lower(alert_name), lower(?5)) > 0 \
                    OR instr(lower(?5), lower(alert_name)) > 0) \
             ORDER BY created_at DESC LIMIT ?6"
        ))?;
        let rows = stmt.query_map(
            params![org_id, exclude_id, cutoff, service, alert_name, limit],
            investigation_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_inv(org: &str, name: &str, service: Option<&str>) -> NewInvestigation {
        NewInvestigation {
            org_id: org.to_string(),
            trigger_type: TriggerType::Webhook,
            trigger_payload: json!({"alert_id": "m1"}),
            alert_id: Some("m1".to_string()),
            alert_name: name.to_string(),
            service: service.map(String::from),
            environment: None,
            severity: Some(Severity::High),
        }
    }

    fn result_fixture() -> InvestigationResult {
        InvestigationResult {
            summary: Some("deploy abc123 regressed checkout".to_string()),
            root_cause: Some("bad deploy".to_string()),
            confidence_score: Some(0.8),
            findings: Vec::new(),
            suggested_actions: Vec::new(),
            deployments_found: Vec::new(),
            trace_ref: None,
            tool_call_count: 4,
            completed_at: "2026-08-07T00:10:00+00:00".to_string(),
            duration_ms: 600_000,
        }
    }

    #[tokio::test]
    async fn create_starts_queued() {
        let store = Store::open_in_memory().unwrap();
        let inv = store
            .insert_investigation(new_inv("org1", "High Latency", Some("checkout")), "t0")
            .await
            .unwrap();
        assert_eq!(inv.status, InvestigationStatus::Queued);
        let loaded = store.get_investigation(&inv.id).await.unwrap().unwrap();
        assert_eq!(loaded.alert_name, "High Latency");
        assert_eq!(loaded.trigger_payload["alert_id"], "m1");
    }

    #[tokio::test]
    async fn transitions_are_one_directional() {
        let store = Store::open_in_memory().unwrap();
        let inv = store
            .insert_investigation(new_inv("org1", "High Latency", None), "t0")
            .await
            .unwrap();

        assert!(store.mark_investigation_running(&inv.id, "t1").await.unwrap());
        // Second start is a no-op.
        assert!(!store.mark_investigation_running(&inv.id, "t2").await.unwrap());

        assert!(store
            .complete_investigation(&inv.id, &result_fixture())
            .await
            .unwrap());
        // Terminal states never move again.
        assert!(!store.mark_investigation_running(&inv.id, "t3").await.unwrap());
        assert!(!store
            .fail_investigation(&inv.id, "late failure", "t4", 1)
            .await
            .unwrap());

        let loaded = store.get_investigation(&inv.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InvestigationStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn running_never_coexists_with_completed_at() {
        let store = Store::open_in_memory().unwrap();
        let inv = store
            .insert_investigation(new_inv("org1", "High Latency", None), "t0")
            .await
            .unwrap();
        store
            .mark_investigation_running(&inv.id, "t1")
            .await
            .unwrap();
        let loaded = store.get_investigation(&inv.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InvestigationStatus::Running);
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn completion_requires_running() {
        let store = Store::open_in_memory().unwrap();
        let inv = store
            .insert_investigation(new_inv("org1", "High Latency", None), "t0")
            .await
            .unwrap();
        assert!(!store
            .complete_investigation(&inv.id, &result_fixture())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn failure_reachable_from_queued() {
        let store = Store::open_in_memory().unwrap();
        let inv = store
            .insert_investigation(new_inv("org1", "High Latency", None), "t0")
            .await
            .unwrap();
        assert!(store
            .fail_investigation(&inv.id, "runtime unreachable", "t1", 42)
            .await
            .unwrap());
        let loaded = store.get_investigation(&inv.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InvestigationStatus::Failed);
    }

    #[tokio::test]
    async fn feedback_is_idempotent_last_write_wins() {
        let store = Store::open_in_memory().unwrap();
        let inv = store
            .insert_investigation(new_inv("org1", "High Latency", None), "t0")
            .await
            .unwrap();

        // Allowed before completion (intentionally permissive).
        assert!(store
            .set_investigation_feedback(&inv.id, FeedbackRating::Helpful, Some("nice"))
            .await
            .unwrap());
        assert!(store
            .set_investigation_feedback(&inv.id, FeedbackRating::Helpful, Some("nice"))
            .await
            .unwrap());
        let loaded = store.get_investigation(&inv.id).await.unwrap().unwrap();
        assert_eq!(loaded.feedback_rating, Some(FeedbackRating::Helpful));
        assert_eq!(loaded.feedback_comment.as_deref(), Some("nice"));

        store
            .set_investigation_feedback(&inv.id, FeedbackRating::NotHelpful, None)
            .await
            .unwrap();
        let loaded = store.get_investigation(&inv.id).await.unwrap().unwrap();
        assert_eq!(loaded.feedback_rating, Some(FeedbackRating::NotHelpful));
        assert!(loaded.feedback_comment.is_none());
    }

    #[tokio::test]
    async fn find_similar_scopes_and_excludes_self() {
        let store = Store::open_in_memory().unwrap();
        let target = store
            .insert_investigation(
                new_inv("org1", "High Latency P95", Some("checkout")),
                "2026-08-01T00:00:00+00:00",
            )
            .await
            .unwrap();
        let same_service = store
            .insert_investigation(
                new_inv("org1", "Error Rate Spike", Some("checkout")),
                "2026-08-02T00:00:00+00:00",
            )
            .await
            .unwrap();
        let name_overlap = store
            .insert_investigation(
                new_inv("org1", "High Latency", Some("payments")),
                "2026-08-03T00:00:00+00:00",
            )
            .await
            .unwrap();
        // Different org never matches.
        store
            .insert_investigation(
                new_inv("org2", "High Latency P95", Some("checkout")),
                "2026-08-03T00:00:00+00:00",
            )
            .await
            .unwrap();
        // Too old.
        store
            .insert_investigation(
                new_inv("org1", "High Latency P95", Some("checkout")),
                "2026-06-01T00:00:00+00:00",
            )
            .await
            .unwrap();

        let similar = store
            .find_similar_investigations(
                "org1",
                &target.id,
                Some("checkout"),
                "High Latency P95",
                "2026-07-08T00:00:00+00:00",
                5,
            )
            .await
            .unwrap();
        let ids: Vec<&str> = similar.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&same_service.id.as_str()));
        assert!(ids.contains(&name_overlap.id.as_str()));
        assert_eq!(similar.len(), 2);
        // Newest first.
        assert_eq!(similar[0].id, name_overlap.id);
    }
}
