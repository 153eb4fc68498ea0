use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Credential material needed to call the platform's export endpoints.
///
/// Sessions are immutable once built; a refresh produces a new value with a higher
/// generation rather than mutating the one jobs are holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Origin the credentials belong to, e.g. `https://tenant.example.com`
    pub base_url: String,
    /// Cookie name -> value
    pub cookies: BTreeMap<String, String>,
    /// Extra request headers captured at login (CSRF token and friends)
    pub headers: BTreeMap<String, String>,
    /// `None` when validity can only be learned by using the session
    pub expires_at: Option<DateTime<Utc>>,
    /// Assigned by the session manager; identifies which refresh produced this value
    #[serde(default)]
    pub generation: u64,
}

impl Session {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            cookies: BTreeMap::new(),
            headers: BTreeMap::new(),
            expires_at: None,
            generation: 0,
        }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the session is known to be expired at `now`.
    ///
    /// Sessions with unknown expiry are treated as valid until a fetch says otherwise.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if expires <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// `Cookie` header value, or `None` when there are no cookies.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unknown_expiry_is_not_expired() {
        let session = Session::new("https://tenant.example.com");
        assert!(!session.is_expired());
    }

    #[test]
    fn past_expiry_is_expired() {
        let now = Utc::now();
        let session =
            Session::new("https://tenant.example.com").with_expiry(now - Duration::seconds(1));
        assert!(session.is_expired_at(now));
        let fresh =
            Session::new("https://tenant.example.com").with_expiry(now + Duration::hours(1));
        assert!(!fresh.is_expired_at(now));
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let session = Session::new("https://tenant.example.com")
            .with_cookie("laravel_session", "abc")
            .with_cookie("XSRF-TOKEN", "xyz");
        assert_eq!(
            session.cookie_header().as_deref(),
            Some("XSRF-TOKEN=xyz; laravel_session=abc")
        );
        assert!(Session::new("https://x").cookie_header().is_none());
    }
}
