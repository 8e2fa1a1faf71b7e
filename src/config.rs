use crate::core::credentials::GithubAppConfig;

/// Process configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub db_path: String,
    /// Base URL of the external agent runtime (LangGraph-style server).
    pub agent_runtime_url: String,
    /// Monitoring scheduler tick cadence.
    pub poll_interval_minutes: u32,
    /// Org seeded at startup so webhook resolution has a row to find.
    pub default_org_slug: Option<String>,
    pub default_org_name: String,
    /// GitHub App credentials are shared across orgs and come from the
    /// environment; only the installation id lives in the vault.
    pub github_app: Option<GithubAppConfig>,
    /// Optional HMAC secret for inbound webhook signature verification.
    pub webhook_secret: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let github_app = match (
            std::env::var("GITHUB_APP_ID").ok(),
            std::env::var("GITHUB_APP_PRIVATE_KEY").ok(),
        ) {
            (Some(app_id), Some(private_key))
                if !app_id.trim().is_empty() && !private_key.trim().is_empty() =>
            {
                Some(GithubAppConfig {
                    app_id,
                    private_key,
                })
            }
            _ => None,
        };

        Self {
            api_host: env_or("SLEUTH_API_HOST", "127.0.0.1"),
            api_port: env_or("SLEUTH_API_PORT", "8787").parse().unwrap_or(8787),
            db_path: env_or("SLEUTH_DB", "./sleuth.db"),
            agent_runtime_url: env_or("SLEUTH_AGENT_RUNTIME_URL", "http://127.0.0.1:2024"),
            poll_interval_minutes: env_or("SLEUTH_POLL_INTERVAL_MINUTES", "5")
                .parse()
                .unwrap_or(5),
            default_org_slug: std::env::var("SLEUTH_DEFAULT_ORG")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            default_org_name: env_or("SLEUTH_DEFAULT_ORG_NAME", "Default Organization"),
            github_app,
            webhook_secret: std::env::var("SLEUTH_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}
