pub mod checks;

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::core::credentials::CredentialResolver;
use crate::core::error::Error;
use crate::core::notify::{Notifier, format_job_alert};
use crate::core::store::Store;
use crate::core::store::types::{
    FindingType, JobRunStatus, MonitoringJob, MonitoringJobRun, NotifyPolicy,
};
use checks::{TelemetrySource, run_check};

/// Failure streak length after which a job is surfaced to operators. The job
/// itself is never auto-disabled.
const FAILURE_STREAK_ALERT: i64 = 2;

/// Poll-model scheduler for recurring monitoring jobs. Each tick scans
/// enabled jobs whose `next_run_at` has passed and runs the due ones
/// concurrently, with an in-process single-flight guard so a slow run is
/// never overlapped by the next tick. Clones share the guard.
#[derive(Clone)]
pub struct MonitorScheduler {
    store: Arc<Store>,
    resolver: Arc<CredentialResolver>,
    telemetry: Arc<dyn TelemetrySource>,
    notifier: Arc<dyn Notifier>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl MonitorScheduler {
    pub fn new(
        store: Arc<Store>,
        resolver: Arc<CredentialResolver>,
        telemetry: Arc<dyn TelemetrySource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            resolver,
            telemetry,
            notifier,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Attach the recurring tick to the process scheduler.
    pub async fn register(
        &self,
        scheduler: &JobScheduler,
        every_minutes: u32,
    ) -> anyhow::Result<()> {
        let every_minutes = every_minutes.clamp(1, 59);
        let cron = format!("0 0/{every_minutes} * * * *");
        let this = self.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, mut _l| {
            let this = this.clone();
            Box::pin(async move {
                this.tick().await;
            })
        })?;
        scheduler.add(job).await?;
        Ok(())
    }

    /// One scan: every due job is dispatched as its own task.
    pub async fn tick(&self) {
        let now = Utc::now().to_rfc3339();
        let due = match self.store.due_monitoring_jobs(&now).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("monitoring tick could not list due jobs: {e}");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        debug!("monitoring tick: {} job(s) due", due.len());

        for job in due {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.run_job(job).await {
                    error!("monitoring job run errored: {e}");
                }
            });
        }
    }

    /// Manual run-now path. NotFound for unknown jobs; None when the job is
    /// already in flight.
    pub async fn run_now(&self, job_id: &str) -> Result<Option<MonitoringJobRun>, Error> {
        let job = self
            .store
            .get_monitoring_job(job_id)
            .await
            .map_err(Error::persistence)?
            .ok_or_else(|| Error::NotFound(format!("monitoring job {job_id}")))?;
        self.run_job(job).await
    }

    /// Execute one job run under the single-flight guard. Returns the
    /// finished run record, or None when a previous run still holds the
    /// claim.
    pub async fn run_job(&self, job: MonitoringJob) -> Result<Option<MonitoringJobRun>, Error> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(job.id.clone()) {
                debug!("monitoring job {} still in flight; skipping", job.id);
                return Ok(None);
            }
        }
        let outcome = self.run_job_inner(&job).await;
        self.in_flight.lock().await.remove(&job.id);
        outcome.map(Some)
    }

    async fn run_job_inner(&self, job: &MonitoringJob) -> Result<MonitoringJobRun, Error> {
        let started = Utc::now();
        let run = self
            .store
            .insert_job_run(&job.id, &job.org_id, &started.to_rfc3339())
            .await
            .map_err(Error::persistence)?;

        let credentials = self.resolver.resolve(&job.org_id).await;
        let next_run =
            (Utc::now() + Duration::minutes(job.schedule_interval_minutes)).to_rfc3339();

        match run_check(job, &credentials, self.telemetry.as_ref()).await {
            Ok(outcome) => {
                let severity = alert_severity(&outcome.findings);
                let should_notify = match job.notify_on {
                    NotifyPolicy::Always => true,
                    NotifyPolicy::Issues => severity.is_some(),
                    NotifyPolicy::Never => false,
                };

                let mut alert_sent = false;
                if should_notify {
                    if let Some(slack) = &credentials.slack {
                        let text =
                            format_job_alert(&job.name, Some(&outcome.summary), &outcome.findings);
                        match self.notifier.notify(slack, &text).await {
                            Ok(()) => alert_sent = true,
                            Err(e) => warn!("notification for job {} failed: {e}", job.id),
                        }
                    } else {
                        debug!("job {} wants to notify but slack is not connected", job.id);
                    }
                }

                let now = Utc::now().to_rfc3339();
                self.store
                    .finish_job_run(
                        &run.id,
                        JobRunStatus::Completed,
                        Some(&outcome.summary),
                        &outcome.findings,
                        None,
                        alert_sent,
                        severity.or(if alert_sent { Some("info") } else { None }),
                        &now,
                    )
                    .await
                    .map_err(Error::persistence)?;
                self.store
                    .record_job_success(&job.id, &now, &next_run)
                    .await
                    .map_err(Error::persistence)?;
                info!("monitoring job {} completed: {}", job.name, outcome.summary);
            }
            Err(check_error) => {
                let now = Utc::now().to_rfc3339();
                self.store
                    .finish_job_run(
                        &run.id,
                        JobRunStatus::Failed,
                        None,
                        &[],
                        Some(&check_error.to_string()),
                        false,
                        None,
                        &now,
                    )
                    .await
                    .map_err(Error::persistence)?;
                let streak = self
                    .store
                    .record_job_failure(&job.id, &now, &next_run)
                    .await
                    .map_err(Error::persistence)?;
                if streak > FAILURE_STREAK_ALERT {
                    warn!(
                        "monitoring job {} has failed {streak} times in a row: {check_error}",
                        job.name
                    );
                } else {
                    debug!("monitoring job {} failed: {check_error}", job.name);
                }
            }
        }

        let finished = self
            .store
            .list_job_runs(&job.id, 10)
            .await
            .map_err(Error::persistence)?
            .into_iter()
            .find(|r| r.id == run.id)
            .ok_or_else(|| Error::Persistence("job run vanished mid-write".into()))?;
        Ok(finished)
    }
}

/// Worst issue type across the findings, as the stored alert severity.
fn alert_severity(findings: &[crate::core::store::types::RunFinding]) -> Option<&'static str> {
    if findings
        .iter()
        .any(|f| f.finding_type == FindingType::Error)
    {
        Some("error")
    } else if findings
        .iter()
        .any(|f| f.finding_type == FindingType::Warning)
    {
        Some("warning")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::{DatadogCredentials, SlackCredentials};
    use crate::core::store::types::{JobType, NewMonitoringJob, RunFinding};
    use crate::core::vault::{SecretsVault, secret_key};
    use async_trait::async_trait;
    use checks::{LogPattern, ServiceHealth};
    use serde_json::{Value, json};

    struct ScriptedTelemetry {
        health: ServiceHealth,
        patterns: Vec<LogPattern>,
    }

    #[async_trait]
    impl TelemetrySource for ScriptedTelemetry {
        async fn recent_deployments(
            &self,
            _credentials: &DatadogCredentials,
            _service: Option<&str>,
            _window_minutes: i64,
        ) -> Result<Vec<Value>, Error> {
            Ok(vec![json!({"title": "deploy checkout v42"})])
        }

        async fn service_health(
            &self,
            _credentials: &DatadogCredentials,
            _service: &str,
            _env: &str,
        ) -> Result<ServiceHealth, Error> {
            Ok(self.health.clone())
        }

        async fn error_log_patterns(
            &self,
            _credentials: &DatadogCredentials,
            _query: &str,
            _minutes_back: i64,
        ) -> Result<Vec<LogPattern>, Error> {
            Ok(self.patterns.clone())
        }

        async fn metric_snapshot(
            &self,
            _credentials: &DatadogCredentials,
            _query: &str,
            _minutes_back: i64,
        ) -> Result<Option<f64>, Error> {
            Ok(Some(42.0))
        }
    }

    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            _credentials: &SlackCredentials,
            text: &str,
        ) -> Result<(), Error> {
            self.sent.lock().await.push(text.to_string());
            Ok(())
        }
    }

    struct Fixture {
        scheduler: Arc<MonitorScheduler>,
        store: Arc<Store>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture(health: ServiceHealth, patterns: Vec<LogPattern>) -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vault = Arc::new(SecretsVault::new(store.db()));
        vault.initialize().await.unwrap();
        for (field, value) in [("api_key", "dd-api"), ("app_key", "dd-app")] {
            vault
                .set_secret(&secret_key("org1", "datadog", field), value)
                .await
                .unwrap();
        }
        for (field, value) in [("bot_token", "xoxb-1"), ("channel_id", "C123")] {
            vault
                .set_secret(&secret_key("org1", "slack", field), value)
                .await
                .unwrap();
        }
        let resolver = Arc::new(CredentialResolver::new(vault, None));
        let notifier = Arc::new(RecordingNotifier {
            sent: Mutex::new(Vec::new()),
        });
        let telemetry = Arc::new(ScriptedTelemetry { health, patterns });
        let scheduler = Arc::new(MonitorScheduler::new(
            store.clone(),
            resolver,
            telemetry,
            notifier.clone(),
        ));
        Fixture {
            scheduler,
            store,
            notifier,
        }
    }

    async fn insert_job(
        store: &Store,
        job_type: JobType,
        notify_on: NotifyPolicy,
        config: Value,
    ) -> MonitoringJob {
        store
            .insert_monitoring_job(
                NewMonitoringJob {
                    org_id: "org1".to_string(),
                    name: "checkout watch".to_string(),
                    job_type,
                    schedule_interval_minutes: 5,
                    enabled: true,
                    config,
                    notify_on,
                },
                &Utc::now().to_rfc3339(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn healthy_check_with_issues_policy_stays_quiet() {
        let fx = fixture(ServiceHealth::default(), Vec::new()).await;
        let job = insert_job(
            &fx.store,
            JobType::HealthCheck,
            NotifyPolicy::Issues,
            json!({"service": "checkout"}),
        )
        .await;

        let run = fx.scheduler.run_job(job).await.unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Completed);
        assert!(!run.alert_sent);
        assert!(fx.notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn degraded_check_with_issues_policy_notifies() {
        let fx = fixture(
            ServiceHealth {
                error_rate: Some(0.2),
                p95_latency_ms: Some(250.0),
                requests_per_minute: Some(100.0),
            },
            Vec::new(),
        )
        .await;
        let job = insert_job(
            &fx.store,
            JobType::HealthCheck,
            NotifyPolicy::Issues,
            json!({"service": "checkout"}),
        )
        .await;

        let run = fx.scheduler.run_job(job).await.unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Completed);
        assert!(run.alert_sent);
        assert_eq!(run.alert_severity.as_deref(), Some("error"));
        let sent = fx.notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("error rate"));
    }

    #[tokio::test]
    async fn always_policy_notifies_on_clean_runs() {
        let fx = fixture(ServiceHealth::default(), Vec::new()).await;
        let job = insert_job(
            &fx.store,
            JobType::DeploymentWatcher,
            NotifyPolicy::Always,
            json!({}),
        )
        .await;

        let run = fx.scheduler.run_job(job).await.unwrap().unwrap();
        assert!(run.alert_sent);
        assert_eq!(fx.notifier.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn never_policy_suppresses_even_errors() {
        let fx = fixture(
            ServiceHealth {
                error_rate: Some(0.5),
                ..Default::default()
            },
            Vec::new(),
        )
        .await;
        let job = insert_job(
            &fx.store,
            JobType::HealthCheck,
            NotifyPolicy::Never,
            json!({"service": "checkout"}),
        )
        .await;

        let run = fx.scheduler.run_job(job).await.unwrap().unwrap();
        assert!(!run.alert_sent);
        // Severity is still recorded for the run history.
        assert_eq!(run.alert_severity.as_deref(), Some("error"));
        assert!(fx.notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn success_schedules_next_run_and_clears_streak() {
        let fx = fixture(ServiceHealth::default(), Vec::new()).await;
        let job = insert_job(
            &fx.store,
            JobType::ErrorScanner,
            NotifyPolicy::Never,
            json!({}),
        )
        .await;
        fx.scheduler.run_job(job.clone()).await.unwrap();

        let reloaded = fx
            .store
            .get_monitoring_job(&job.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.consecutive_failures, 0);
        assert!(reloaded.last_run_at.is_some());
        assert!(reloaded.next_run_at.unwrap() > reloaded.last_run_at.unwrap());
    }

    #[tokio::test]
    async fn misconfigured_job_fails_without_auto_disable() {
        let fx = fixture(ServiceHealth::default(), Vec::new()).await;
        // health_check with no service is a check error, not a crash.
        let job = insert_job(
            &fx.store,
            JobType::HealthCheck,
            NotifyPolicy::Issues,
            json!({}),
        )
        .await;

        for _ in 0..3 {
            let run = fx.scheduler.run_job(job.clone()).await.unwrap().unwrap();
            assert_eq!(run.status, JobRunStatus::Failed);
            assert!(run.error_message.is_some());
        }
        let reloaded = fx
            .store
            .get_monitoring_job(&job.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.consecutive_failures, 3);
        assert!(reloaded.enabled);
    }

    #[tokio::test]
    async fn single_flight_guard_skips_overlapping_runs() {
        let fx = fixture(ServiceHealth::default(), Vec::new()).await;
        let job = insert_job(
            &fx.store,
            JobType::DeploymentWatcher,
            NotifyPolicy::Never,
            json!({}),
        )
        .await;

        fx.scheduler
            .in_flight
            .lock()
            .await
            .insert(job.id.clone());
        assert!(fx.scheduler.run_job(job.clone()).await.unwrap().is_none());

        fx.scheduler.in_flight.lock().await.remove(&job.id);
        assert!(fx.scheduler.run_job(job).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_now_unknown_job_is_not_found() {
        let fx = fixture(ServiceHealth::default(), Vec::new()).await;
        assert!(matches!(
            fx.scheduler.run_now("ghost").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
