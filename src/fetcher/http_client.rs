use super::{ErrorKind, ExportTarget, FetchClient, FetchError};
use crate::auth::Session;
use crate::constants::{
    ACCEPT_HEADER, CONNECT_TIMEOUT_SECS, CSRF_MISMATCH_STATUS, CSV_CONTENT_TYPES, USER_AGENT,
};
use crate::errors::AppResult;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, LOCATION};
use reqwest::redirect::Policy;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Maps an HTTP response head to a failure kind, or `None` when the body is the export.
///
/// The platform answers an expired session in several ways: 401, 419 (CSRF token
/// mismatch), a redirect to the login page, or a 200 that renders the login page as
/// HTML. All of them are reported as `SessionExpired`.
pub fn classify_response(
    status: u16,
    content_type: &str,
    location: Option<&str>,
) -> Option<ErrorKind> {
    let content_type = content_type.to_ascii_lowercase();
    match status {
        200 => {
            if CSV_CONTENT_TYPES.iter().any(|t| content_type.contains(t)) {
                None
            } else if content_type.contains("text/html") {
                Some(ErrorKind::SessionExpired)
            } else {
                Some(ErrorKind::Other)
            }
        }
        301 | 302 | 303 | 307 | 308 => match location {
            Some(target) if target.to_ascii_lowercase().contains("login") => {
                Some(ErrorKind::SessionExpired)
            }
            _ => Some(ErrorKind::Other),
        },
        401 => Some(ErrorKind::SessionExpired),
        s if s == CSRF_MISMATCH_STATUS => Some(ErrorKind::SessionExpired),
        403 => Some(ErrorKind::AuthenticationError),
        404 => Some(ErrorKind::NotFound),
        400 | 422 => Some(ErrorKind::InvalidRequest),
        408 => Some(ErrorKind::Timeout),
        429 => Some(ErrorKind::ServerError),
        s if s >= 500 => Some(ErrorKind::ServerError),
        _ => Some(ErrorKind::Other),
    }
}

fn classify_transport_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_builder() {
        ErrorKind::InvalidRequest
    } else {
        ErrorKind::NetworkError
    }
}

/// Production [`FetchClient`] talking to the platform over HTTPS.
///
/// Redirects are not followed so a bounce to the login page is visible as such.
#[derive(Clone)]
pub struct ReqwestFetchClient {
    client: reqwest::Client,
}

impl ReqwestFetchClient {
    pub fn new() -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(Policy::none())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchClient for ReqwestFetchClient {
    async fn fetch(&self, session: &Session, target: &ExportTarget) -> Result<Vec<u8>, FetchError> {
        let url = Url::parse(&session.base_url)
            .and_then(|base| base.join(&target.path()))
            .map_err(|e| {
                FetchError::new(
                    ErrorKind::InvalidRequest,
                    format!("Invalid export URL for {}: {e}", session.base_url),
                )
            })?;

        let mut request = self.client.get(url.clone()).header(ACCEPT, ACCEPT_HEADER);
        for (name, value) in &session.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(cookies) = session.cookie_header() {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send().await.map_err(|e| {
            FetchError::new(
                classify_transport_error(&e),
                format!("Failed to request {url}: {e}"),
            )
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!(
            customer_id = target.customer_id,
            export_type = %target.export_type,
            status = status,
            content_type = %content_type,
            "Export response received"
        );

        if let Some(kind) = classify_response(status, &content_type, location.as_deref()) {
            return Err(FetchError::new(
                kind,
                format!("HTTP {status} ({content_type}) for {url}"),
            ));
        }

        let body = response.bytes().await.map_err(|e| {
            FetchError::new(
                classify_transport_error(&e),
                format!("Failed to read body of {url}: {e}"),
            )
        })?;
        Ok(body.to_vec())
    }
}
