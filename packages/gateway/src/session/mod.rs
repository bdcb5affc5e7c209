// packages/gateway/src/session/mod.rs
//! Browser-side session state
//!
//! - **Cookies**: the credential store attached to guarded requests
//! - **Navigation**: where the user is, and the redirect to sign-in
//!
//! A [`Session`] ties both together and owns teardown: when a refresh fails
//! the session cookies are expired and the user is sent to the sign-in route.

pub mod cookies;
pub mod navigation;

pub use cookies::{CookieJar, SessionCookie};
pub use navigation::{LocationState, Navigator};

use crate::observability::names;
use crate::utils::config::SessionConfig;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cookie jar, navigator and the rules for tearing them down
pub struct Session {
    cookies: Arc<CookieJar>,
    navigator: Arc<dyn Navigator>,
    config: SessionConfig,
}

impl Session {
    pub fn new(cookies: Arc<CookieJar>, navigator: Arc<dyn Navigator>, config: SessionConfig) -> Self {
        Self {
            cookies,
            navigator,
            config,
        }
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn navigator(&self) -> &dyn Navigator {
        self.navigator.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Expire the session cookies and redirect to sign-in
    ///
    /// Returns `true` if a navigation happened. No redirect is issued when the
    /// current location already is the sign-in route.
    pub fn teardown(&self) -> bool {
        warn!("Tearing down session");
        metrics::counter!(names::SESSION_TEARDOWNS_TOTAL).increment(1);

        self.cookies
            .expire(&self.config.access_cookie, &self.config.cookie_path);
        self.cookies
            .expire(&self.config.refresh_cookie, &self.config.cookie_path);

        if self.navigator.current_path() == self.config.sign_in_route {
            debug!("Already on sign-in route, not redirecting");
            return false;
        }

        self.navigator.navigate(&self.config.sign_in_route);
        true
    }
}
