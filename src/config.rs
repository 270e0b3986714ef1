use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub ttl_days: i64,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    pub token_secret: String,
    pub activation_ttl_minutes: i64,
    pub unsubscribe_ttl_days: i64,
}

/// OAuth client settings for the GitHub-style provider.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
    pub scope: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Scheme + host used to build links sent by mail, without trailing slash.
    pub site_domain: String,
    pub signup_enabled: bool,
    pub session: SessionConfig,
    pub subscription: SubscriptionConfig,
    pub github: GithubConfig,
    pub smtp: SmtpConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let session = SessionConfig {
            secret: std::env::var("SESSION_SECRET")?,
            ttl_days: env_parse("SESSION_TTL_DAYS", 7),
            cookie_secure: env_parse("SESSION_COOKIE_SECURE", false),
        };
        let subscription = SubscriptionConfig {
            token_secret: std::env::var("TOKEN_SECRET")?,
            activation_ttl_minutes: env_parse("SUBSCRIBE_TOKEN_MINUTES", 30),
            unsubscribe_ttl_days: env_parse("UNSUBSCRIBE_TOKEN_DAYS", 30),
        };
        let github = GithubConfig {
            client_id: env_or("GITHUB_CLIENT_ID", ""),
            client_secret: env_or("GITHUB_CLIENT_SECRET", ""),
            redirect_url: env_or("GITHUB_REDIRECT_URL", ""),
            auth_url: env_or("GITHUB_AUTH_URL", "https://github.com/login/oauth/authorize"),
            token_url: env_or(
                "GITHUB_TOKEN_URL",
                "https://github.com/login/oauth/access_token",
            ),
            api_url: env_or("GITHUB_API_URL", "https://api.github.com/user"),
            scope: env_or("GITHUB_SCOPE", "read:user"),
            timeout_secs: env_parse("OAUTH_TIMEOUT_SECS", 10),
        };
        let smtp = SmtpConfig {
            host: env_or("SMTP_HOST", "localhost"),
            port: env_parse("SMTP_PORT", 587),
            username: env_or("SMTP_USERNAME", ""),
            password: env_or("SMTP_PASSWORD", ""),
            from: env_or("SMTP_FROM", "quillpost <noreply@localhost>"),
        };
        Ok(Self {
            database_url,
            site_domain: env_or("SITE_DOMAIN", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),
            signup_enabled: env_parse("SIGNUP_ENABLED", false),
            session,
            subscription,
            github,
            smtp,
        })
    }
}
