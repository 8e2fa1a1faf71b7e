use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::JobScheduler;
use tracing::info;

use sleuth::config::Config;
use sleuth::core::agent::HttpAgentRuntime;
use sleuth::core::credentials::CredentialResolver;
use sleuth::core::investigation::InvestigationService;
use sleuth::core::monitor::MonitorScheduler;
use sleuth::core::monitor::checks::DatadogTelemetry;
use sleuth::core::notify::SlackNotifier;
use sleuth::core::runbook::RunbookMatcher;
use sleuth::core::store::Store;
use sleuth::core::vault::SecretsVault;
use sleuth::interfaces::web::{ApiServer, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    sleuth::logging::init();

    let config = Config::from_env();

    let store = Arc::new(Store::open(&config.db_path)?);
    info!("store opened at {}", config.db_path);

    let vault = Arc::new(SecretsVault::new(store.db()));
    vault.initialize().await?;

    if let Some(slug) = &config.default_org_slug {
        let org = store.upsert_org(slug, &config.default_org_name).await?;
        info!("default org ready: {} ({})", org.slug, org.id);
    }

    let resolver = Arc::new(CredentialResolver::new(
        vault.clone(),
        config.github_app.clone(),
    ));
    let matcher = Arc::new(RunbookMatcher::new(store.clone()));
    let investigations = Arc::new(InvestigationService::new(store.clone()));
    let runtime = Arc::new(HttpAgentRuntime::new(&config.agent_runtime_url));
    let monitor = Arc::new(MonitorScheduler::new(
        store.clone(),
        resolver.clone(),
        Arc::new(DatadogTelemetry::new()),
        Arc::new(SlackNotifier::new()),
    ));

    let scheduler = JobScheduler::new().await?;
    monitor
        .register(&scheduler, config.poll_interval_minutes)
        .await?;
    scheduler.start().await?;
    info!(
        "monitoring scheduler started (tick every {}m)",
        config.poll_interval_minutes
    );

    let state = AppState {
        store,
        vault,
        resolver,
        matcher,
        investigations,
        runtime,
        monitor,
        webhook_secret: config.webhook_secret.clone(),
    };

    ApiServer::new(state, &config.api_host, config.api_port)
        .serve()
        .await
}
