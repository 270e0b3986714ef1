use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;

use super::repo_types::ExternalProfile;
use crate::config::GithubConfig;

/// Providers reachable through `GET /auth/{provider}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Github,
    Weibo,
    Qq,
    Wechat,
}

impl Provider {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "github" => Some(Self::Github),
            "weibo" => Some(Self::Weibo),
            "qq" => Some(Self::Qq),
            "wechat" => Some(Self::Wechat),
            _ => None,
        }
    }

    pub fn is_wired(self) -> bool {
        matches!(self, Self::Github)
    }
}

pub fn authorize_url(cfg: &GithubConfig, state: &str) -> anyhow::Result<String> {
    let params = [
        ("client_id", cfg.client_id.as_str()),
        ("redirect_uri", cfg.redirect_url.as_str()),
        ("scope", cfg.scope.as_str()),
        ("state", state),
    ];
    let query = serde_urlencoded::to_string(params).context("encode authorize query")?;
    Ok(format!("{}?{}", cfg.auth_url, query))
}

/// Authorization-code exchange and profile lookup. Holds no per-login state.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_code(&self, cfg: &GithubConfig, code: &str) -> anyhow::Result<String>;

    async fn fetch_profile(
        &self,
        cfg: &GithubConfig,
        access_token: &str,
    ) -> anyhow::Result<ExternalProfile>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Clone)]
pub struct GithubProvider {
    http: Client,
}

impl GithubProvider {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("quillpost/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl IdentityProvider for GithubProvider {
    async fn exchange_code(&self, cfg: &GithubConfig, code: &str) -> anyhow::Result<String> {
        let params = [
            ("client_id", cfg.client_id.as_str()),
            ("client_secret", cfg.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", cfg.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let response = self
            .http
            .post(&cfg.token_url)
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .context("token endpoint request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token endpoint returned {status}: {body}");
        }

        let token: TokenResponse = response.json().await.context("decode token response")?;
        match (token.access_token, token.error) {
            (Some(access), None) if !access.is_empty() => Ok(access),
            (_, error) => anyhow::bail!(
                "token endpoint refused code: {} {}",
                error.unwrap_or_default(),
                token.error_description.unwrap_or_default()
            ),
        }
    }

    async fn fetch_profile(
        &self,
        cfg: &GithubConfig,
        access_token: &str,
    ) -> anyhow::Result<ExternalProfile> {
        let response = self
            .http
            .get(&cfg.api_url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await
            .context("profile request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("profile endpoint returned {status}");
        }

        let profile: ExternalProfile = response.json().await.context("decode profile")?;
        anyhow::ensure!(!profile.login.is_empty(), "profile without login");
        Ok(profile)
    }
}
