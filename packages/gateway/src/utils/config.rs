// packages/gateway/src/utils/config.rs
//! Layered gateway configuration
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults (every section is `#[serde(default)]`)
//! 2. TOML file named by `GATEWAY_CONFIG_FILE` (default `config/gateway.toml`),
//!    skipped when absent
//! 3. Environment variables, e.g. `GATEWAY__API__API_URL=https://elo.example`

use crate::interception::exemptions::MatchMode;
use crate::utils::errors::{GatewayError, Result};
use config::{Config, Environment as EnvSource, File};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

const CONFIG_FILE_VAR: &str = "GATEWAY_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "config/gateway.toml";

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub interception: InterceptionConfig,
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from defaults, optional file and environment
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var(CONFIG_FILE_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut builder = Config::builder();

        if Path::new(&config_file).exists() {
            builder = builder.add_source(File::from(Path::new(&config_file)));
        }

        builder = builder.add_source(
            EnvSource::with_prefix("GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatewayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file, ignoring the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: GatewayConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject configurations the gateway cannot operate with
    pub fn validate(&self) -> Result<()> {
        let uri: Uri = self.api.api_url.parse().map_err(|e| {
            GatewayError::ConfigError(format!("api_url {:?} is not a URL: {}", self.api.api_url, e))
        })?;

        match uri.scheme_str() {
            Some("http") | Some("https") if uri.authority().is_some() => {}
            _ => {
                return Err(GatewayError::ConfigError(format!(
                    "api_url must be an absolute http(s) URL, got {:?}",
                    self.api.api_url
                )))
            }
        }

        let routes = [
            ("interception.refresh_path", &self.interception.refresh_path),
            ("interception.auth_status_path", &self.interception.auth_status_path),
            ("session.sign_in_route", &self.session.sign_in_route),
        ];
        for (key, value) in routes {
            if !value.starts_with('/') {
                return Err(GatewayError::ConfigError(format!(
                    "{} must start with '/', got {:?}",
                    key, value
                )));
            }
        }

        Ok(())
    }

    /// Log the resolved environment, only when debug is enabled
    pub fn log_summary(&self) {
        if self.api.debug {
            info!(
                api_url = %self.api.api_url,
                api_base_path = %self.api.api_base_path,
                auth_endpoint = %self.api.auth_endpoint_url(),
                environment = ?self.api.environment,
                "Environment configuration"
            );
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployEnvironment {
    #[default]
    Development,
    Production,
    Test,
}

/// Backend API location
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Backend origin (e.g., "http://localhost:8000")
    pub api_url: String,

    /// Prefix prepended to every API path
    pub api_base_path: String,

    /// Authentication endpoint relative to the API root
    pub auth_endpoint: String,

    pub environment: DeployEnvironment,

    /// Log resolved configuration at startup
    pub debug: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            api_base_path: String::new(),
            auth_endpoint: "/auth".to_string(),
            environment: DeployEnvironment::Development,
            debug: false,
        }
    }
}

impl ApiConfig {
    pub fn full_api_url(&self) -> String {
        format!("{}{}", self.api_url, self.api_base_path)
    }

    pub fn auth_endpoint_url(&self) -> String {
        format!("{}{}{}", self.api_url, self.api_base_path, self.auth_endpoint)
    }

    pub fn is_development(&self) -> bool {
        self.environment == DeployEnvironment::Development
    }

    pub fn is_production(&self) -> bool {
        self.environment == DeployEnvironment::Production
    }
}

/// Session cookie names and the sign-in route
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub access_cookie: String,
    pub refresh_cookie: String,
    pub cookie_path: String,
    pub sign_in_route: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_cookie: "access".to_string(),
            refresh_cookie: "refresh".to_string(),
            cookie_path: "/".to_string(),
            sign_in_route: "/auth/signin".to_string(),
        }
    }
}

/// Interception rules
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InterceptionConfig {
    /// Session refresh endpoint (POST)
    pub refresh_path: String,

    /// Endpoint probed by `check_auth_status` (POST)
    pub auth_status_path: String,

    /// How exempt patterns are matched against targets
    pub match_mode: MatchMode,

    /// Targets forwarded without 401 handling
    pub exempt_patterns: Vec<String>,

    /// Targets identified as the refresh endpoint itself
    pub refresh_patterns: Vec<String>,

    /// Per-request transport timeout (milliseconds)
    pub request_timeout_ms: u64,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        let exempt_patterns = [
            // Auth endpoints
            "/auth/",
            "/register/",
            "/login/",
            "/signin/",
            "/signup/",
            "/users/register/",
            "/api/auth/",
            "/api/users/register/",
            // Static assets
            "/static/",
            "/favicon.ico",
            ".js",
            ".css",
            ".png",
            ".jpg",
            ".ico",
            // Frontend dev server
            "localhost:3000",
            "127.0.0.1:3000",
        ];

        Self {
            refresh_path: "/api/auth/refresh/".to_string(),
            auth_status_path: "/api/auth/me/".to_string(),
            match_mode: MatchMode::Substring,
            exempt_patterns: exempt_patterns.iter().map(|p| p.to_string()).collect(),
            refresh_patterns: vec!["/refresh/".to_string(), "/api/auth/refresh/".to_string()],
            request_timeout_ms: 30_000,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging and metrics
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub log_filter: String,

    pub log_format: LogFormat,

    /// Prometheus scrape listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}
