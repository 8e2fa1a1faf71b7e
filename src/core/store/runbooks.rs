use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use super::{Store, bad_column};
use super::types::{NewRunbook, Runbook, RunbookPatch, RunbookTrigger};

const RUNBOOK_COLUMNS: &str = "id, org_id, name, description, trigger_type, trigger_config, \
     investigation_steps, if_found_actions, enabled, priority, times_triggered, times_matched, \
     avg_confidence, created_at";

fn runbook_from_row(row: &Row<'_>) -> rusqlite::Result<Runbook> {
    let trigger_type: String = row.get(4)?;
    let trigger_config: String = row.get(5)?;
    let steps: String = row.get(6)?;
    let actions: String = row.get(7)?;

    Ok(Runbook {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        trigger_type: RunbookTrigger::parse(&trigger_type)
            .ok_or_else(|| bad_column(4, "trigger_type", &trigger_type))?,
        trigger_config: serde_json::from_str(&trigger_config).unwrap_or_default(),
        investigation_steps: serde_json::from_str(&steps).unwrap_or_default(),
        if_found_actions: serde_json::from_str(&actions).unwrap_or_default(),
        enabled: row.get(8)?,
        priority: row.get(9)?,
        times_triggered: row.get(10)?,
        times_matched: row.get(11)?,
        avg_confidence: row.get(12)?,
        created_at: row.get(13)?,
    })
}

impl Store {
    pub async fn insert_runbook(&self, new: NewRunbook, created_at: &str) -> Result<Runbook> {
        let id = Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO runbooks (id, org_id, name, description, trigger_type, trigger_config, \
             investigation_steps, if_found_actions, enabled, priority, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                new.org_id,
                new.name,
                new.description,
                new.trigger_type.as_str(),
                serde_json::to_string(&new.trigger_config)?,
                serde_json::to_string(&new.investigation_steps)?,
                serde_json::to_string(&new.if_found_actions)?,
                new.enabled,
                new.priority,
                created_at,
            ],
        )?;
        drop(db);
        Ok(self
            .get_runbook(&id)
            .await?
            .expect("runbook row just inserted"))
    }

    pub async fn get_runbook(&self, id: &str) -> Result<Option<Runbook>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUNBOOK_COLUMNS} FROM runbooks WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id], runbook_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Runbooks for an org in matching order: priority ascending, creation
    /// time ascending, rowid as the final stable tie-break.
    pub async fn list_runbooks(&self, org_id: &str, only_enabled: bool) -> Result<Vec<Runbook>> {
        let db = self.db.lock().await;
        let sql = if only_enabled {
            format!(
                "SELECT {RUNBOOK_COLUMNS} FROM runbooks WHERE org_id = ?1 AND enabled = 1 \
                 ORDER BY priority ASC, created_at ASC, rowid ASC"
            )
        } else {
            format!(
                "SELECT {RUNBOOK_COLUMNS} FROM runbooks WHERE org_id = ?1 \
                 ORDER BY priority ASC, created_at ASC, rowid ASC"
            )
        };
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([org_id], runbook_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn update_runbook(&self, id: &str, patch: RunbookPatch) -> Result<Option<Runbook>> {
        {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(&format!(
                "SELECT {RUNBOOK_COLUMNS} FROM runbooks WHERE id = ?1"
            ))?;
            let mut rows = stmt.query_map([id], runbook_from_row)?;
            let Some(existing) = rows.next() else {
                return Ok(None);
            };
            let existing = existing?;

            let name = patch.name.unwrap_or(existing.name);
            let description = patch.description.unwrap_or(existing.description);
            let trigger_type = patch.trigger_type.unwrap_or(existing.trigger_type);
            let trigger_config = patch.trigger_config.unwrap_or(existing.trigger_config);
            let steps = patch
                .investigation_steps
                .unwrap_or(existing.investigation_steps);
            let actions = patch.if_found_actions.unwrap_or(existing.if_found_actions);
            let enabled = patch.enabled.unwrap_or(existing.enabled);
            let priority = patch.priority.unwrap_or(existing.priority);

            db.execute(
                "UPDATE runbooks SET name = ?2, description = ?3, trigger_type = ?4, \
                 trigger_config = ?5, investigation_steps = ?6, if_found_actions = ?7, \
                 enabled = ?8, priority = ?9 WHERE id = ?1",
                params![
                    id,
                    name,
                    description,
                    trigger_type.as_str(),
                    serde_json::to_string(&trigger_config)?,
                    serde_json::to_string(&steps)?,
                    serde_json::to_string(&actions)?,
                    enabled,
                    priority,
                ],
            )?;
        }
        self.get_runbook(id).await
    }

    pub async fn delete_runbook(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let deleted = db.execute("DELETE FROM runbooks WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub async fn set_runbook_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE runbooks SET enabled = ?2 WHERE id = ?1",
            params![id, enabled],
        )?;
        Ok(changed > 0)
    }

    /// Usage counter bump; callers treat this as best-effort.
    pub async fn increment_runbook_matched(&self, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE runbooks SET times_matched = times_matched + 1 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Record a runbook-guided investigation outcome: bump `times_triggered`
    /// and fold the confidence into the running mean.
    pub async fn record_runbook_outcome(&self, id: &str, confidence: Option<f64>) -> Result<()> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT times_triggered, avg_confidence FROM runbooks WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;
        let Some(row) = rows.next()? else {
            return Ok(());
        };
        let triggered: i64 = row.get(0)?;
        let avg: Option<f64> = row.get(1)?;
        drop(rows);
        drop(stmt);

        let new_avg = match confidence {
            Some(c) => {
                let prior = avg.unwrap_or(0.0) * triggered as f64;
                Some((prior + c) / (triggered + 1) as f64)
            }
            None => avg,
        };
        db.execute(
            "UPDATE runbooks SET times_triggered = times_triggered + 1, avg_confidence = ?2 \
             WHERE id = ?1",
            params![id, new_avg],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::types::TriggerConfig;
    use std::collections::BTreeMap;

    fn new_rb(org: &str, name: &str, priority: i64) -> NewRunbook {
        NewRunbook {
            org_id: org.to_string(),
            name: name.to_string(),
            description: None,
            trigger_type: RunbookTrigger::AlertPattern,
            trigger_config: TriggerConfig {
                pattern: Some("latency".to_string()),
                severity: Vec::new(),
                services: Vec::new(),
            },
            investigation_steps: vec![crate::core::store::types::RunbookStep {
                action: "get_recent_deployments".to_string(),
                params: serde_json::json!({}),
                reason: Some("changes cause most incidents".to_string()),
            }],
            if_found_actions: BTreeMap::new(),
            enabled: true,
            priority,
        }
    }

    #[tokio::test]
    async fn list_orders_by_priority_then_creation() {
        let store = Store::open_in_memory().unwrap();
        let b = store.insert_runbook(new_rb("org1", "b", 20), "t0").await.unwrap();
        let a = store.insert_runbook(new_rb("org1", "a", 10), "t1").await.unwrap();
        // Same priority as `a`, created later: must sort after it.
        let c = store.insert_runbook(new_rb("org1", "c", 10), "t2").await.unwrap();

        let listed = store.list_runbooks("org1", true).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), c.id.as_str(), b.id.as_str()]);
    }

    #[tokio::test]
    async fn disabled_runbooks_are_filtered() {
        let store = Store::open_in_memory().unwrap();
        let rb = store.insert_runbook(new_rb("org1", "rb", 10), "t0").await.unwrap();
        store.set_runbook_enabled(&rb.id, false).await.unwrap();
        assert!(store.list_runbooks("org1", true).await.unwrap().is_empty());
        assert_eq!(store.list_runbooks("org1", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn patch_updates_only_provided_fields() {
        let store = Store::open_in_memory().unwrap();
        let rb = store.insert_runbook(new_rb("org1", "rb", 10), "t0").await.unwrap();
        let updated = store
            .update_runbook(
                &rb.id,
                RunbookPatch {
                    priority: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.priority, 5);
        assert_eq!(updated.name, "rb");
        assert_eq!(updated.trigger_config.pattern.as_deref(), Some("latency"));
    }

    #[tokio::test]
    async fn outcome_updates_running_confidence_mean() {
        let store = Store::open_in_memory().unwrap();
        let rb = store.insert_runbook(new_rb("org1", "rb", 10), "t0").await.unwrap();

        store.record_runbook_outcome(&rb.id, Some(0.8)).await.unwrap();
        store.record_runbook_outcome(&rb.id, Some(0.4)).await.unwrap();
        // A run without a confidence score still counts as triggered.
        store.record_runbook_outcome(&rb.id, None).await.unwrap();

        let loaded = store.get_runbook(&rb.id).await.unwrap().unwrap();
        assert_eq!(loaded.times_triggered, 3);
        let avg = loaded.avg_confidence.unwrap();
        assert!((avg - 0.6).abs() < 1e-9, "avg was {avg}");
    }
}
