// packages/gateway/src/session/cookies.rs
//! Session cookie jar
//!
//! Holds the cookies the backend hands out (`access`, `refresh`, ...) and
//! turns them into a `Cookie` header for credentialed requests. `Set-Cookie`
//! headers on responses are absorbed back into the jar, which is how a
//! successful refresh rotates the access token.

use chrono::{DateTime, Duration, TimeZone, Utc};
use hyper::header::{HeaderValue, COOKIE, SET_COOKIE};
use hyper::HeaderMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A single cookie entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub path: String,

    /// `None` means a session cookie (never expires while the process lives)
    pub expires: Option<DateTime<Utc>>,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            expires: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(false, |at| at <= now)
    }
}

/// Parse a `Set-Cookie` header value
///
/// Understands `Path`, `Expires` and `Max-Age`; other attributes are ignored.
/// `Max-Age` wins over `Expires` when both are present.
pub fn parse_set_cookie(raw: &str) -> Option<SessionCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = SessionCookie::new(name, value.trim());
    let mut max_age = None;

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };

        if key.eq_ignore_ascii_case("path") && !val.is_empty() {
            cookie.path = val.to_string();
        } else if key.eq_ignore_ascii_case("expires") {
            match DateTime::parse_from_rfc2822(val) {
                Ok(at) => cookie.expires = Some(at.with_timezone(&Utc)),
                Err(_) => debug!("Ignoring unparseable cookie expiry {:?}", val),
            }
        } else if key.eq_ignore_ascii_case("max-age") {
            max_age = val.parse::<i64>().ok();
        }
    }

    if let Some(seconds) = max_age {
        cookie.expires = Some(if seconds <= 0 {
            unix_epoch_expiry()
        } else {
            Duration::try_seconds(seconds)
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
    }

    Some(cookie)
}

/// `Thu, 01 Jan 1970 00:00:01 GMT`
fn unix_epoch_expiry() -> DateTime<Utc> {
    Utc.timestamp_opt(1, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// In-memory cookie storage shared by all requests of one session
#[derive(Default)]
pub struct CookieJar {
    cookies: RwLock<BTreeMap<String, SessionCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cookie
    pub fn set(&self, cookie: SessionCookie) {
        self.cookies.write().insert(cookie.name.clone(), cookie);
    }

    /// Get a cookie if it is present and not expired
    pub fn get(&self, name: &str) -> Option<SessionCookie> {
        let now = Utc::now();
        self.cookies
            .read()
            .get(name)
            .filter(|c| !c.is_expired(now))
            .cloned()
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Overwrite a cookie with an empty, already-expired entry
    pub fn expire(&self, name: &str, path: &str) {
        debug!("Expiring cookie {}", name);
        self.set(
            SessionCookie::new(name, "")
                .with_path(path)
                .with_expires(unix_epoch_expiry()),
        );
    }

    /// `Cookie` header value for all live cookies, ordered by name
    pub fn header_value(&self) -> Option<String> {
        let now = Utc::now();
        let cookies = self.cookies.read();

        let pairs: Vec<String> = cookies
            .values()
            .filter(|c| !c.is_expired(now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Write the `Cookie` header onto an outgoing request
    pub fn attach(&self, headers: &mut HeaderMap) {
        let Some(value) = self.header_value() else {
            return;
        };

        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(COOKIE, value);
            }
            Err(e) => warn!("Dropping invalid cookie header: {}", e),
        }
    }

    /// Store every `Set-Cookie` carried by a response
    pub fn absorb(&self, headers: &HeaderMap) {
        for raw in headers.get_all(SET_COOKIE) {
            let Ok(raw) = raw.to_str() else {
                continue;
            };

            match parse_set_cookie(raw) {
                Some(cookie) => {
                    debug!("Storing cookie {}", cookie.name);
                    self.set(cookie);
                }
                None => warn!("Ignoring malformed Set-Cookie header"),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cookies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }
}
