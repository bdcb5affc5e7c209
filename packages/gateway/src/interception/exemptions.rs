// packages/gateway/src/interception/exemptions.rs
//! Exemption table for deciding which requests get 401 handling
//!
//! Two matching strategies are supported:
//!
//! - **Substring**: a target is exempt if it contains any pattern anywhere.
//!   Cheap and permissive; `/api/decks/node.js-aggro/` is exempt because it
//!   contains `.js`.
//! - **Route**: patterns are interpreted by shape. `/path/` patterns match as
//!   path prefixes, `.ext` patterns as path suffixes, and anything else as an
//!   exact `host:port` authority.

use crate::utils::config::InterceptionConfig;
use crate::utils::errors::{GatewayError, Result};
use hyper::{Method, Uri};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Pattern matching strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Substring,
    Route,
}

/// How a pattern is interpreted in [`MatchMode::Route`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// `/static/` - path prefix
    Path,
    /// `.css` - path suffix
    Extension,
    /// `localhost:3000` - request authority
    Host,
}

/// Exempt pattern definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExemptPattern {
    pub pattern: String,
    pub kind: PatternKind,
}

impl ExemptPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let kind = if pattern.starts_with('/') {
            PatternKind::Path
        } else if pattern.starts_with('.') {
            PatternKind::Extension
        } else {
            PatternKind::Host
        };

        Self { pattern, kind }
    }

    fn matches_route(&self, authority: Option<&str>, path: &str) -> bool {
        match self.kind {
            PatternKind::Path => path.starts_with(&self.pattern),
            PatternKind::Extension => path.ends_with(&self.pattern),
            PatternKind::Host => {
                authority.map_or(false, |a| a.eq_ignore_ascii_case(&self.pattern))
            }
        }
    }
}

/// How the gateway treats a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// OPTIONS: forwarded untouched
    Preflight,
    /// Credentials attached, no refresh on 401
    Exempt,
    /// Credentials attached, refresh-then-retry on 401
    Guarded,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Preflight => "preflight",
            RequestClass::Exempt => "exempt",
            RequestClass::Guarded => "guarded",
        }
    }
}

/// Split a target into its authority and path, ignoring the query
fn split_target(target: &str) -> (Option<String>, String) {
    match target.parse::<Uri>() {
        Ok(uri) => (
            uri.authority().map(|a| a.as_str().to_string()),
            uri.path().to_string(),
        ),
        Err(_) => {
            let path = target.split(['?', '#']).next().unwrap_or(target);
            (None, path.to_string())
        }
    }
}

/// Exemption table
pub struct ExemptionTable {
    mode: MatchMode,

    /// Targets forwarded without refresh handling
    patterns: RwLock<Vec<ExemptPattern>>,

    /// Targets identified as the refresh endpoint
    refresh_patterns: Vec<String>,
}

impl ExemptionTable {
    /// Create an empty exemption table
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            patterns: RwLock::new(Vec::new()),
            refresh_patterns: Vec::new(),
        }
    }

    /// Create exemption table with default patterns
    pub fn with_defaults() -> Self {
        Self::from_config(&InterceptionConfig::default())
    }

    pub fn from_config(config: &InterceptionConfig) -> Self {
        let mut refresh_patterns = config.refresh_patterns.clone();
        if !refresh_patterns.contains(&config.refresh_path) {
            refresh_patterns.push(config.refresh_path.clone());
        }

        let table = Self {
            mode: config.match_mode,
            patterns: RwLock::new(Vec::with_capacity(config.exempt_patterns.len())),
            refresh_patterns,
        };

        for pattern in &config.exempt_patterns {
            table.add_pattern(pattern.clone());
        }

        table
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Add an exempt pattern (duplicates are ignored)
    pub fn add_pattern(&self, pattern: impl Into<String>) {
        let pattern = ExemptPattern::new(pattern);
        let mut patterns = self.patterns.write();

        if patterns.iter().any(|p| p.pattern == pattern.pattern) {
            debug!("Exempt pattern {} already present", pattern.pattern);
            return;
        }

        debug!("Adding exempt pattern: {} ({:?})", pattern.pattern, pattern.kind);
        patterns.push(pattern);
    }

    /// Remove an exempt pattern
    pub fn remove_pattern(&self, pattern: &str) -> Result<()> {
        let mut patterns = self.patterns.write();
        let before = patterns.len();
        patterns.retain(|p| p.pattern != pattern);

        if patterns.len() < before {
            info!("Removed exempt pattern {}", pattern);
            Ok(())
        } else {
            Err(GatewayError::ConfigError(format!(
                "No exempt pattern found: {}",
                pattern
            )))
        }
    }

    /// Get all exempt patterns
    pub fn patterns(&self) -> Vec<ExemptPattern> {
        self.patterns.read().clone()
    }

    /// Whether `target` skips 401 handling
    pub fn is_exempt(&self, target: &str) -> bool {
        let patterns = self.patterns.read();

        let hit = match self.mode {
            MatchMode::Substring => patterns.iter().find(|p| target.contains(&p.pattern)),
            MatchMode::Route => {
                let (authority, path) = split_target(target);
                patterns
                    .iter()
                    .find(|p| p.matches_route(authority.as_deref(), &path))
            }
        };

        if let Some(pattern) = hit {
            debug!("{} exempted by {}", target, pattern.pattern);
        }
        hit.is_some()
    }

    /// Whether `target` is the session refresh endpoint
    ///
    /// In route mode the path must equal a refresh pattern or the configured
    /// `refresh_path`.
    pub fn is_refresh_endpoint(&self, target: &str) -> bool {
        match self.mode {
            MatchMode::Substring => self.refresh_patterns.iter().any(|p| target.contains(p)),
            MatchMode::Route => {
                let (_, path) = split_target(target);
                self.refresh_patterns.iter().any(|p| *p == path)
            }
        }
    }

    pub fn classify(&self, method: &Method, target: &str) -> RequestClass {
        if *method == Method::OPTIONS {
            RequestClass::Preflight
        } else if self.is_exempt(target) {
            RequestClass::Exempt
        } else {
            RequestClass::Guarded
        }
    }

    /// Export patterns as configuration text
    pub fn export_config(&self) -> String {
        let patterns = self.patterns.read();

        let mut output = format!("# Exemption table ({:?} matching)\n\n", self.mode);

        for pattern in patterns.iter() {
            output.push_str(&format!("{} ({:?})\n", pattern.pattern, pattern.kind));
        }
        for pattern in &self.refresh_patterns {
            output.push_str(&format!("{} (refresh)\n", pattern));
        }

        output
    }
}

impl Default for ExemptionTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
