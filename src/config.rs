use std::time::Duration;

use crate::client::{ApiClient, HttpActionExecutor};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres store when set, in-memory store otherwise.
    pub database_url: Option<String>,
    /// JSON file of users (with their bearer tokens) loaded at startup.
    pub users_file: Option<String>,
    /// Extra CORS origin allowed besides localhost.
    pub dashboard_origin: Option<String>,
    /// Base URL the CLI talks to, including `/api/v1`.
    pub api_url: String,
    pub api_token: Option<String>,
    pub http_timeout: Duration,
    /// Lifetime of a pending request.
    pub request_ttl: chrono::Duration,
    /// Sweep interval; `None` disables the sweep.
    pub expiry_sweep: Option<Duration>,
    /// Minimum trimmed length of a creation reason, checked client-side.
    /// 0 = only the non-empty rule.
    pub min_reason_len: usize,
    /// Comma-separated list of webhook URLs to notify on workflow events.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let api_url = env_opt("TONTINE_API_URL")
        .unwrap_or_else(|| "http://127.0.0.1:8080/api/v1".into());
    url::Url::parse(&api_url)
        .map_err(|e| anyhow::anyhow!("TONTINE_API_URL is not a valid URL ({}): {}", api_url, e))?;

    let ttl_hours: i64 = env_or("TONTINE_REQUEST_TTL_HOURS", 72);
    if ttl_hours <= 0 {
        anyhow::bail!("TONTINE_REQUEST_TTL_HOURS must be positive, got {}", ttl_hours);
    }

    let sweep_secs: u64 = env_or("TONTINE_EXPIRY_SWEEP_SECS", 300);

    Ok(Config {
        port: env_or("TONTINE_PORT", 8080),
        database_url: env_opt("DATABASE_URL"),
        users_file: env_opt("TONTINE_USERS_FILE"),
        dashboard_origin: env_opt("TONTINE_DASHBOARD_ORIGIN"),
        api_url,
        api_token: env_opt("TONTINE_API_TOKEN"),
        http_timeout: Duration::from_secs(env_or::<u64>("TONTINE_HTTP_TIMEOUT_SECS", 15).max(1)),
        request_ttl: chrono::Duration::hours(ttl_hours),
        expiry_sweep: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        min_reason_len: env_or("TONTINE_MIN_REASON_LEN", 10),
        webhook_urls: std::env::var("TONTINE_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_secret: env_opt("TONTINE_WEBHOOK_SECRET"),
    })
}

/// The authority a client command talks to, with CLI flags already applied
/// over the environment. Every outbound call of the command uses the same
/// credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub api_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Config {
    pub fn remote(&self, api_url: Option<String>, token: Option<String>) -> Remote {
        Remote {
            api_url: api_url.unwrap_or_else(|| self.api_url.clone()),
            token: token.or_else(|| self.api_token.clone()),
            timeout: self.http_timeout,
        }
    }
}

impl Remote {
    pub fn client(&self) -> anyhow::Result<ApiClient> {
        ApiClient::new(&self.api_url, self.token.clone(), self.timeout)
    }

    /// Executor for approved actions; `target_url` overrides the API URL.
    pub fn action_executor(&self, target_url: Option<&str>) -> anyhow::Result<HttpActionExecutor> {
        HttpActionExecutor::new(
            target_url.unwrap_or(&self.api_url),
            self.token.clone(),
            self.timeout,
        )
    }
}
