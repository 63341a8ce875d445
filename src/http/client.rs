use std::time::Duration;

use crate::error::TomatoError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn user_agent() -> String {
    format!(
        "tomato-client/{} ({} {} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        sys_release(),
        std::env::consts::ARCH,
    )
}

fn sys_release() -> String {
    // No portable release-string API in std; the teacher's stack doesn't
    // pull one in either, so this stays a stub segment of the UA string.
    "unknown".to_string()
}

/// Thin wrapper over `reqwest::Client` carrying the fixed timeout, User-Agent,
/// and auth header construction shared by every endpoint in §6's table.
/// Kept deliberately dumb: response decoding and error classification live
/// in the caller (Sync Engine / Auth / Log Shipper), matching how the
/// taxonomy mapping happens at component boundaries (§7, §10.2).
#[derive(Clone)]
pub struct ApiClient {
    inner: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let inner = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent())
            .build()
            .expect("reqwest client config is always valid");
        Self {
            inner,
            base_url: base_url.into(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint.trim_start_matches('/'))
    }

    pub fn get(&self, endpoint: &str, auth_token: Option<&str>) -> reqwest::RequestBuilder {
        self.with_auth(self.inner.get(self.url(endpoint)), auth_token)
    }

    pub fn post(&self, endpoint: &str, auth_token: Option<&str>) -> reqwest::RequestBuilder {
        self.with_auth(self.inner.post(self.url(endpoint)), auth_token)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder, auth_token: Option<&str>) -> reqwest::RequestBuilder {
        match auth_token {
            Some(token) => req.header("X-Auth-Token", token),
            None => req,
        }
    }

    /// Raw GET for media downloads — the caller streams the body directly
    /// rather than decoding JSON (`sync::media`).
    pub fn raw_client(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Maps a 200-but-error-field response body into the closed taxonomy,
    /// mirroring `make_request`'s `data['error']` convention from the
    /// original client: the server can return HTTP 200 with an embedded
    /// error string for application-level failures.
    pub fn classify_status(status: reqwest::StatusCode) -> Option<TomatoError> {
        if status.is_success() {
            None
        } else if status.as_u16() == 403 {
            Some(TomatoError::AccessDenied)
        } else {
            Some(TomatoError::InvalidHttpStatus { status: status.as_u16() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_endpoint_regardless_of_slashes() {
        let client = ApiClient::new("https://station.example/");
        assert_eq!(client.url("/export"), "https://station.example/export");
        assert_eq!(client.url("export"), "https://station.example/export");
    }

    #[test]
    fn classify_status_maps_403_to_access_denied() {
        assert!(matches!(
            ApiClient::classify_status(reqwest::StatusCode::FORBIDDEN),
            Some(TomatoError::AccessDenied)
        ));
    }
}
