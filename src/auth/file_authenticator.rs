use super::{Authenticator, Session};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// Captured request headers that must not be replayed on export downloads.
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "cookie",
    "connection",
    "accept-encoding",
];

#[derive(Debug, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    /// Unix seconds; `-1` marks a browser-session cookie
    #[serde(default)]
    expires: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredCookies {
    List(Vec<StoredCookie>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Default, Deserialize)]
struct StoredOrigin {
    #[serde(default)]
    cookies: Option<StoredCookies>,
    #[serde(default)]
    api_headers: BTreeMap<String, String>,
}

/// Authenticator backed by the JSON credential store the login bot writes.
///
/// The store is keyed by origin (`scheme://host`). When it holds no usable session, or a
/// refresh is forced, the configured login command is run and the store is read again.
/// The command receives `BASE_URL` and `AUTH_FILE` in its environment.
pub struct FileAuthenticator {
    base_url: String,
    credentials_file: PathBuf,
    login_command: Vec<String>,
    login_timeout: Duration,
}

impl FileAuthenticator {
    pub fn new(
        base_url: impl Into<String>,
        credentials_file: impl Into<PathBuf>,
        login_command: Vec<String>,
        login_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            credentials_file: credentials_file.into(),
            login_command,
            login_timeout,
        }
    }

    fn origin(&self) -> AppResult<String> {
        Ok(Url::parse(&self.base_url)?.origin().ascii_serialization())
    }

    /// Reads the stored session for this origin, if any.
    async fn load(&self) -> AppResult<Option<Session>> {
        let contents = match fs::read_to_string(&self.credentials_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    path = %self.credentials_file.display(),
                    "Credential store does not exist yet"
                );
                return Ok(None);
            }
            Err(e) => {
                return Err(AppError::IoError(format!(
                    "Failed to read credential store {}: {e}",
                    self.credentials_file.display()
                )))
            }
        };

        let origin = self.origin()?;
        let mut store: HashMap<String, StoredOrigin> = match serde_json::from_str(&contents) {
            Ok(store) => store,
            Err(e) => {
                warn!(
                    path = %self.credentials_file.display(),
                    error = %e,
                    "Credential store is not valid JSON, treating it as empty"
                );
                return Ok(None);
            }
        };
        let Some(entry) = store.remove(&origin) else {
            debug!(origin = %origin, "No stored credentials for origin");
            return Ok(None);
        };

        Ok(session_from_entry(origin, entry))
    }

    async fn login(&self) -> AppResult<()> {
        let Some((program, args)) = self.login_command.split_first() else {
            return Err(AppError::AuthenticationError(
                "No valid stored session and no login_command configured".to_string(),
            ));
        };

        info!(program = %program, "Running login command");
        let status = tokio::time::timeout(
            self.login_timeout,
            Command::new(program)
                .args(args)
                .env("BASE_URL", &self.base_url)
                .env("AUTH_FILE", &self.credentials_file)
                .kill_on_drop(true)
                .status(),
        )
        .await
        .map_err(|_| {
            AppError::AuthenticationError(format!(
                "Login command timed out after {}s",
                self.login_timeout.as_secs()
            ))
        })?
        .map_err(|e| AppError::AuthenticationError(format!("Failed to start login command: {e}")))?;

        if !status.success() {
            return Err(AppError::AuthenticationError(format!(
                "Login command exited with {status}"
            )));
        }
        Ok(())
    }
}

/// Every failure of [`Authenticator::ensure_session`] surfaces as an authentication error.
fn authentication_error(e: AppError) -> AppError {
    match e {
        AppError::AuthenticationError(_) => e,
        other => AppError::AuthenticationError(other.to_string()),
    }
}

fn session_from_entry(origin: String, entry: StoredOrigin) -> Option<Session> {
    let mut session = Session::new(origin);
    let mut earliest_expiry: Option<DateTime<Utc>> = None;

    match entry.cookies? {
        StoredCookies::List(cookies) => {
            for cookie in cookies {
                if let Some(expires) = cookie
                    .expires
                    .filter(|secs| *secs > 0.0)
                    .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
                {
                    earliest_expiry = Some(match earliest_expiry {
                        Some(current) => current.min(expires),
                        None => expires,
                    });
                }
                session.cookies.insert(cookie.name, cookie.value);
            }
        }
        StoredCookies::Map(cookies) => session.cookies = cookies,
    }
    if session.cookies.is_empty() {
        return None;
    }

    for (name, value) in entry.api_headers {
        if !SKIPPED_HEADERS.contains(&name.to_lowercase().as_str()) {
            session.headers.insert(name, value);
        }
    }
    session.expires_at = earliest_expiry;
    Some(session)
}

#[async_trait]
impl Authenticator for FileAuthenticator {
    async fn ensure_session(&self, force: bool) -> AppResult<Session> {
        if !force {
            match self.load().await.map_err(authentication_error)? {
                Some(session) if !session.is_expired() => {
                    debug!("Using stored session");
                    return Ok(session);
                }
                Some(_) => info!("Stored session has expired"),
                None => info!("No stored session found"),
            }
        }

        self.login().await?;

        match self.load().await.map_err(authentication_error)? {
            Some(session) if !session.is_expired() => Ok(session),
            Some(_) => {
                warn!("Login command stored an already expired session");
                Err(AppError::AuthenticationError(
                    "Stored session is expired after login".to_string(),
                ))
            }
            None => Err(AppError::AuthenticationError(format!(
                "Login finished but no credentials were stored in {}",
                self.credentials_file.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BASE: &str = "https://tenant.example.com";

    fn authenticator(dir: &TempDir, login_command: Vec<String>) -> FileAuthenticator {
        FileAuthenticator::new(
            format!("{BASE}/settings/apiusers"),
            dir.path().join("auth_details.json"),
            login_command,
            Duration::from_secs(5),
        )
    }

    fn future_expiry() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn loads_playwright_cookie_list() {
        let dir = TempDir::new().unwrap();
        let expiry = future_expiry();
        let store = format!(
            r#"{{
                "{BASE}": {{
                    "cookies": [
                        {{"name": "laravel_session", "value": "abc", "domain": "tenant.example.com", "expires": {expiry}}},
                        {{"name": "XSRF-TOKEN", "value": "xyz", "expires": -1}}
                    ],
                    "api_headers": {{"x-csrf-token": "tok", "content-length": "42", "Cookie": "dup"}}
                }}
            }}"#
        );
        std::fs::write(dir.path().join("auth_details.json"), store).unwrap();

        let session = authenticator(&dir, Vec::new())
            .ensure_session(false)
            .await
            .unwrap();
        assert_eq!(session.base_url, BASE);
        assert_eq!(session.cookies.len(), 2);
        assert_eq!(
            session.headers.get("x-csrf-token").map(String::as_str),
            Some("tok")
        );
        assert!(!session.headers.contains_key("content-length"));
        assert!(!session.headers.contains_key("Cookie"));
        assert_eq!(session.expires_at.map(|e| e.timestamp()), Some(expiry));
    }

    #[tokio::test]
    async fn loads_cookie_map() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("auth_details.json"),
            format!(r#"{{"{BASE}": {{"cookies": {{"sid": "1"}}}}}}"#),
        )
        .unwrap();

        let session = authenticator(&dir, Vec::new())
            .ensure_session(false)
            .await
            .unwrap();
        assert_eq!(session.cookies.get("sid").map(String::as_str), Some("1"));
        assert!(session.expires_at.is_none());
    }

    #[tokio::test]
    async fn missing_store_without_login_command_fails() {
        let dir = TempDir::new().unwrap();
        let err = authenticator(&dir, Vec::new())
            .ensure_session(false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthenticationError(_)));
    }

    #[tokio::test]
    async fn expired_store_triggers_login() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("auth_details.json"),
            format!(r#"{{"{BASE}": {{"cookies": [{{"name": "sid", "value": "old", "expires": 1000}}]}}}}"#),
        )
        .unwrap();

        let err = authenticator(&dir, Vec::new())
            .ensure_session(false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("login_command"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forced_refresh_runs_login_command() {
        let dir = TempDir::new().unwrap();
        let fresh = dir.path().join("fresh.json");
        std::fs::write(
            &fresh,
            format!(r#"{{"{BASE}": {{"cookies": {{"sid": "new"}}}}}}"#),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("auth_details.json"),
            format!(r#"{{"{BASE}": {{"cookies": {{"sid": "old"}}}}}}"#),
        )
        .unwrap();

        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cp '{}' \"$AUTH_FILE\"", fresh.display()),
        ];
        let session = authenticator(&dir, command)
            .ensure_session(true)
            .await
            .unwrap();
        assert_eq!(session.cookies.get("sid").map(String::as_str), Some("new"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn corrupt_store_runs_login_command() {
        let dir = TempDir::new().unwrap();
        let fresh = dir.path().join("fresh.json");
        std::fs::write(
            &fresh,
            format!(r#"{{"{BASE}": {{"cookies": {{"sid": "new"}}}}}}"#),
        )
        .unwrap();
        // Truncated mid-write
        std::fs::write(
            dir.path().join("auth_details.json"),
            format!(r#"{{"{BASE}": {{"cookies": {{"sid"#),
        )
        .unwrap();

        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cp '{}' \"$AUTH_FILE\"", fresh.display()),
        ];
        let session = authenticator(&dir, command)
            .ensure_session(false)
            .await
            .unwrap();
        assert_eq!(session.cookies.get("sid").map(String::as_str), Some("new"));
    }

    #[tokio::test]
    async fn corrupt_store_without_login_command_is_authentication_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("auth_details.json"), "{not json").unwrap();
        let err = authenticator(&dir, Vec::new())
            .ensure_session(false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthenticationError(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_login_command_is_authentication_error() {
        let dir = TempDir::new().unwrap();
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let err = authenticator(&dir, command)
            .ensure_session(true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthenticationError(_)));
    }
}
