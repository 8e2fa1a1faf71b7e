use anyhow::Result;
use rusqlite::{Row, params};
use serde_json::Value;
use uuid::Uuid;

use super::{Store, bad_column};
use super::types::{Integration, IntegrationStatus, Provider};

const INTEGRATION_COLUMNS: &str =
    "id, org_id, provider, status, metadata, created_at, updated_at";

fn integration_from_row(row: &Row<'_>) -> rusqlite::Result<Integration> {
    let provider: String = row.get(2)?;
    let status: String = row.get(3)?;
    let metadata: String = row.get(4)?;

    Ok(Integration {
        id: row.get(0)?,
        org_id: row.get(1)?,
        provider: Provider::parse(&provider).ok_or_else(|| bad_column(2, "provider", &provider))?,
        status: IntegrationStatus::parse(&status).ok_or_else(|| bad_column(3, "status", &status))?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Store {
    /// Connect or reconfigure an integration. One row per (org, provider).
    pub async fn upsert_integration(
        &self,
        org_id: &str,
        provider: Provider,
        status: IntegrationStatus,
        metadata: &Value,
        now: &str,
    ) -> Result<Integration> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO integrations (id, org_id, provider, status, metadata, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(org_id, provider) DO UPDATE SET \
               status=excluded.status, metadata=excluded.metadata, updated_at=excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                org_id,
                provider.as_str(),
                status.as_str(),
                metadata.to_string(),
                now,
            ],
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE org_id = ?1 AND provider = ?2"
        ))?;
        let row = stmt.query_row(params![org_id, provider.as_str()], integration_from_row)?;
        Ok(row)
    }

    pub async fn get_integration(
        &self,
        org_id: &str,
        provider: Provider,
    ) -> Result<Option<Integration>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE org_id = ?1 AND provider = ?2"
        ))?;
        let mut rows = stmt.query_map(params![org_id, provider.as_str()], integration_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_integrations(&self, org_id: &str) -> Result<Vec<Integration>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE org_id = ?1 ORDER BY provider ASC"
        ))?;
        let rows = stmt.query_map([org_id], integration_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn set_integration_status(
        &self,
        org_id: &str,
        provider: Provider,
        status: IntegrationStatus,
        now: &str,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE integrations SET status = ?3, updated_at = ?4 \
             WHERE org_id = ?1 AND provider = ?2",
            params![org_id, provider.as_str(), status.as_str(), now],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .upsert_integration(
                "org1",
                Provider::Datadog,
                IntegrationStatus::Connected,
                &json!({"site": "datadoghq.com"}),
                "t0",
            )
            .await
            .unwrap();
        let second = store
            .upsert_integration(
                "org1",
                Provider::Datadog,
                IntegrationStatus::Connected,
                &json!({"site": "datadoghq.eu"}),
                "t1",
            )
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.metadata["site"], "datadoghq.eu");
        assert_eq!(store.list_integrations("org1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_flips_status_only() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_integration(
                "org1",
                Provider::Slack,
                IntegrationStatus::Connected,
                &json!({"channel": "#incidents"}),
                "t0",
            )
            .await
            .unwrap();
        assert!(store
            .set_integration_status("org1", Provider::Slack, IntegrationStatus::Disconnected, "t1")
            .await
            .unwrap());
        let loaded = store
            .get_integration("org1", Provider::Slack)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, IntegrationStatus::Disconnected);
        assert_eq!(loaded.metadata["channel"], "#incidents");
    }
}
