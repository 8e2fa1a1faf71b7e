use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use super::{Store, bad_column};
use super::types::{
    JobRunStatus, JobType, MonitoringJob, MonitoringJobPatch, MonitoringJobRun, NewMonitoringJob,
    NotifyPolicy, RunFinding,
};

const JOB_COLUMNS: &str = "id, org_id, name, job_type, schedule_interval_minutes, enabled, \
     config, notify_on, last_run_at, next_run_at, consecutive_failures, created_at";

const RUN_COLUMNS: &str = "id, job_id, org_id, status, summary, findings, error_message, \
     alert_sent, alert_severity, started_at, completed_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoringJob> {
    let job_type: String = row.get(3)?;
    let config: String = row.get(6)?;
    let notify_on: String = row.get(7)?;

    Ok(MonitoringJob {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        job_type: JobType::parse(&job_type).ok_or_else(|| bad_column(3, "job_type", &job_type))?,
        schedule_interval_minutes: row.get(4)?,
        enabled: row.get(5)?,
        config: serde_json::from_str(&config).unwrap_or_default(),
        notify_on: NotifyPolicy::parse(&notify_on)
            .ok_or_else(|| bad_column(7, "notify_on", &notify_on))?,
        last_run_at: row.get(8)?,
        next_run_at: row.get(9)?,
        consecutive_failures: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoringJobRun> {
    let status: String = row.get(3)?;
    let findings: String = row.get(5)?;

    Ok(MonitoringJobRun {
        id: row.get(0)?,
        job_id: row.get(1)?,
        org_id: row.get(2)?,
        status: JobRunStatus::parse(&status).ok_or_else(|| bad_column(3, "status", &status))?,
        summary: row.get(4)?,
        findings: serde_json::from_str(&findings).unwrap_or_default(),
        error_message: row.get(6)?,
        alert_sent: row.get(7)?,
        alert_severity: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

impl Store {
    pub async fn insert_monitoring_job(
        &self,
        new: NewMonitoringJob,
        created_at: &str,
    ) -> Result<MonitoringJob> {
        let id = Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO monitoring_jobs (id, org_id, name, job_type, \
             schedule_interval_minutes, enabled, config, notify_on, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new.org_id,
                new.name,
                new.job_type.as_str(),
                new.schedule_interval_minutes,
                new.enabled,
                new.config.to_string(),
                new.notify_on.as_str(),
                created_at,
            ],
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM monitoring_jobs WHERE id = ?1"
        ))?;
        let job = stmt.query_row([&id], job_from_row)?;
        Ok(job)
    }

    pub async fn get_monitoring_job(&self, id: &str) -> Result<Option<MonitoringJob>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM monitoring_jobs WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id], job_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_monitoring_jobs(&self, org_id: &str) -> Result<Vec<MonitoringJob>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM monitoring_jobs WHERE org_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([org_id], job_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Enabled jobs due at `now`. A job that has never run is due
    /// immediately.
    pub async fn due_monitoring_jobs(&self, now: &str) -> Result<Vec<MonitoringJob>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM monitoring_jobs \
             WHERE enabled = 1 AND (next_run_at IS NULL OR next_run_at <= ?1)"
        ))?;
        let rows = stmt.query_map([now], job_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn update_monitoring_job(
        &self,
        id: &str,
        patch: MonitoringJobPatch,
    ) -> Result<Option<MonitoringJob>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM monitoring_jobs WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id], job_from_row)?;
        let Some(existing) = rows.next() else {
            return Ok(None);
        };
        let existing = existing?;
        drop(rows);
        drop(stmt);

        let name = patch.name.unwrap_or(existing.name);
        let interval = patch
            .schedule_interval_minutes
            .unwrap_or(existing.schedule_interval_minutes);
        let enabled = patch.enabled.unwrap_or(existing.enabled);
        let config = patch.config.unwrap_or(existing.config);
        let notify_on = patch.notify_on.unwrap_or(existing.notify_on);

        db.execute(
            "UPDATE monitoring_jobs SET name = ?2, schedule_interval_minutes = ?3, \
             enabled = ?4, config = ?5, notify_on = ?6 WHERE id = ?1",
            params![
                id,
                name,
                interval,
                enabled,
                config.to_string(),
                notify_on.as_str()
            ],
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM monitoring_jobs WHERE id = ?1"
        ))?;
        let job = stmt.query_row([id], job_from_row)?;
        Ok(Some(job))
    }

    pub async fn delete_monitoring_job(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let deleted = db.execute("DELETE FROM monitoring_jobs WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    /// Successful run: schedule the next tick and clear the failure streak.
    pub async fn record_job_success(&self, id: &str, ran_at: &str, next_run: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE monitoring_jobs SET last_run_at = ?2, next_run_at = ?3, \
             consecutive_failures = 0 WHERE id = ?1",
            params![id, ran_at, next_run],
        )?;
        Ok(())
    }

    /// Failed run: schedule the next tick anyway; the job is never
    /// auto-disabled, only the failure streak grows.
    pub async fn record_job_failure(&self, id: &str, ran_at: &str, next_run: &str) -> Result<i64> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE monitoring_jobs SET last_run_at = ?2, next_run_at = ?3, \
             consecutive_failures = consecutive_failures + 1 WHERE id = ?1",
            params![id, ran_at, next_run],
        )?;
        let failures = db.query_row(
            "SELECT consecutive_failures FROM monitoring_jobs WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(failures)
    }

    pub async fn insert_job_run(
        &self,
        job_id: &str,
        org_id: &str,
        started_at: &str,
    ) -> Result<MonitoringJobRun> {
        let id = Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO monitoring_job_runs (id, job_id, org_id, status, started_at) \
             VALUES (?1, ?2, ?3, 'running', ?4)",
            params![id, job_id, org_id, started_at],
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM monitoring_job_runs WHERE id = ?1"
        ))?;
        let run = stmt.query_row([&id], run_from_row)?;
        Ok(run)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn finish_job_run(
        &self,
        id: &str,
        status: JobRunStatus,
        summary: Option<&str>,
        findings: &[RunFinding],
        error_message: Option<&str>,
        alert_sent: bool,
        alert_severity: Option<&str>,
        completed_at: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE monitoring_job_runs SET status = ?2, summary = ?3, findings = ?4, \
             error_message = ?5, alert_sent = ?6, alert_severity = ?7, completed_at = ?8 \
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                summary,
                serde_json::to_string(findings)?,
                error_message,
                alert_sent,
                alert_severity,
                completed_at,
            ],
        )?;
        Ok(())
    }

    pub async fn list_job_runs(&self, job_id: &str, limit: i64) -> Result<Vec<MonitoringJobRun>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM monitoring_job_runs \
             WHERE job_id = ?1 ORDER BY started_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![job_id, limit], run_from_row)?;
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

    fn new_job(org: &str, name: &str) -> NewMonitoringJob {
        NewMonitoringJob {
            org_id: org.to_string(),
            name: name.to_string(),
            job_type: JobType::HealthCheck,
            schedule_interval_minutes: 15,
            enabled: true,
            config: json!({"service": "checkout"}),
            notify_on: NotifyPolicy::Issues,
        }
    }

    #[tokio::test]
    async fn never_run_job_is_due_immediately() {
        let store = Store::open_in_memory().unwrap();
        let job = store
            .insert_monitoring_job(new_job("org1", "hc"), "t0")
            .await
            .unwrap();
        let due = store
            .due_monitoring_jobs("2026-08-07T00:00:00+00:00")
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, job.id);
    }

    #[tokio::test]
    async fn job_due_follows_next_run_at() {
        let store = Store::open_in_memory().unwrap();
        let job = store
            .insert_monitoring_job(new_job("org1", "hc"), "t0")
            .await
            .unwrap();
        store
            .record_job_success(
                &job.id,
                "2026-08-07T00:00:00+00:00",
                "2026-08-07T00:15:00+00:00",
            )
            .await
            .unwrap();

        assert!(store
            .due_monitoring_jobs("2026-08-07T00:10:00+00:00")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .due_monitoring_jobs("2026-08-07T00:15:00+00:00")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn disabled_jobs_are_never_due() {
        let store = Store::open_in_memory().unwrap();
        let job = store
            .insert_monitoring_job(new_job("org1", "hc"), "t0")
            .await
            .unwrap();
        store
            .update_monitoring_job(
                &job.id,
                MonitoringJobPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store
            .due_monitoring_jobs("2026-08-07T00:00:00+00:00")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failure_streak_grows_and_resets() {
        let store = Store::open_in_memory().unwrap();
        let job = store
            .insert_monitoring_job(new_job("org1", "hc"), "t0")
            .await
            .unwrap();

        assert_eq!(store.record_job_failure(&job.id, "t1", "t2").await.unwrap(), 1);
        assert_eq!(store.record_job_failure(&job.id, "t2", "t3").await.unwrap(), 2);
        store.record_job_success(&job.id, "t3", "t4").await.unwrap();
        let loaded = store.get_monitoring_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.consecutive_failures, 0);
        // Failure never disables the job.
        assert!(loaded.enabled);
    }

    #[tokio::test]
    async fn job_runs_round_trip_findings() {
        let store = Store::open_in_memory().unwrap();
        let job = store
            .insert_monitoring_job(new_job("org1", "hc"), "t0")
            .await
            .unwrap();
        let run = store.insert_job_run(&job.id, "org1", "t1").await.unwrap();
        assert_eq!(run.status, JobRunStatus::Running);

        let findings = vec![RunFinding {
            finding_type: crate::core::store::types::FindingType::Warning,
            message: "error rate 7.2% over threshold".to_string(),
            metric: Some("error_rate".to_string()),
            value: Some(0.072),
        }];
        store
            .finish_job_run(
                &run.id,
                JobRunStatus::Completed,
                Some("1 warning"),
                &findings,
                None,
                true,
                Some("warning"),
                "t2",
            )
            .await
            .unwrap();

        let runs = store.list_job_runs(&job.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, JobRunStatus::Completed);
        assert!(runs[0].alert_sent);
        assert_eq!(runs[0].findings.len(), 1);
        assert_eq!(runs[0].findings[0].metric.as_deref(), Some("error_rate"));
    }
}
