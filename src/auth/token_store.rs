use serde::Deserialize;

use crate::config::ClientSettings;
use crate::error::{TomatoError, TomatoResult};
use crate::http::ApiClient;
use crate::paths::DataPaths;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    auth_token: String,
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    valid_token: bool,
    #[allow(dead_code)]
    version: String,
    latest_migration: String,
}

/// Migration labels this client understands, matching the migration file
/// names the server ships (`common/migrations/0001_initial.py` and
/// following). A `/ping` response naming anything outside this set means
/// the server's schema has moved on without a matching client release —
/// surfaced as `DbMigrationMismatch` (§7) rather than silently treated as
/// authorized.
const KNOWN_MIGRATIONS: &[&str] = &["0001_initial"];

/// Three-way status returned by `check_authorization` (§4.6): whether we
/// consider the user logged in at all, whether the server was actually
/// reachable, and whether there's a prior successful sync to fall back on
/// for offline playout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthStatus {
    pub logged_in: bool,
    pub connected: bool,
    pub has_sync: bool,
}

#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Success,
    InvalidCredentials,
    Unreachable,
}

/// Login / logout / authorization-check component (§4.6). Holds no state of
/// its own beyond what's passed in — the opaque token itself lives in
/// `ClientSettings`, owned by `AppContext`, per Design Note §9.
pub struct TokenStore;

impl TokenStore {
    /// `POST /auth` with form credentials; stores the returned token into
    /// `settings` and persists it on success.
    pub async fn login(
        settings: &mut ClientSettings,
        paths: &DataPaths,
        protocol: &str,
        hostname: &str,
        username: &str,
        password: &str,
    ) -> TomatoResult<AuthOutcome> {
        if hostname.trim().is_empty() {
            return Err(TomatoError::NoHostname);
        }
        if username.trim().is_empty() || password.is_empty() {
            return Err(TomatoError::NoCredentials);
        }

        let base_url = format!("{protocol}://{hostname}");
        let client = ApiClient::new(&base_url);
        let form = [("username", username), ("password", password)];

        let response = match client.post("auth", None).form(&form).send().await {
            Ok(resp) => resp,
            Err(_) => return Ok(AuthOutcome::Unreachable),
        };

        if response.status().as_u16() == 403 {
            return Ok(AuthOutcome::InvalidCredentials);
        }
        if let Some(err) = ApiClient::classify_status(response.status()) {
            return Err(err);
        }

        let body: AuthResponse = response.json().await.map_err(|_| TomatoError::JsonDecodeError)?;

        settings.protocol = protocol.to_string();
        settings.hostname = Some(hostname.to_string());
        settings.auth_token = Some(body.auth_token);
        settings.save(paths).map_err(TomatoError::from)?;

        Ok(AuthOutcome::Success)
    }

    /// `GET /ping`. Per §4.6: if the network is unreachable but a token
    /// exists on disk, report `logged_in=true, connected=false` so offline
    /// playout can continue from the local cache. `has_sync` reflects
    /// whether a previous sync has ever committed locally, independent of
    /// whatever `/ping` says. A recognized-but-unmatched `latest_migration`
    /// aborts with `DbMigrationMismatch` instead of returning a status —
    /// this client has no schema translation layer for a server that has
    /// migrated past what it understands.
    pub async fn check_authorization(settings: &ClientSettings) -> TomatoResult<AuthStatus> {
        let has_sync = settings.last_sync.is_some();

        let (Some(base_url), Some(token)) = (settings.base_url(), settings.auth_token.as_ref()) else {
            return Ok(AuthStatus { logged_in: false, connected: false, has_sync });
        };

        let client = ApiClient::new(&base_url);
        let response = match client.get("ping", Some(token)).send().await {
            Ok(resp) => resp,
            Err(_) => {
                return Ok(AuthStatus { logged_in: true, connected: false, has_sync });
            }
        };

        if !response.status().is_success() {
            return Ok(AuthStatus { logged_in: false, connected: true, has_sync });
        }

        match response.json::<PingResponse>().await {
            Ok(ping) => {
                if !KNOWN_MIGRATIONS.contains(&ping.latest_migration.as_str()) {
                    return Err(TomatoError::DbMigrationMismatch { latest: ping.latest_migration });
                }
                Ok(AuthStatus { logged_in: ping.valid_token, connected: true, has_sync })
            }
            // A response was genuinely received (status already checked
            // above) — a garbage body just means no `valid_token` to trust,
            // matching the original's `connected = status != -1` computed
            // before the body is ever parsed.
            Err(_) => Ok(AuthStatus { logged_in: false, connected: true, has_sync }),
        }
    }

    /// Clears the token and hostname, then — per §4.6's explicit hook —
    /// the caller (AppContext) is responsible for invoking the Catalog
    /// Store's orphan-file cleanup right after this returns.
    pub fn logout(settings: &mut ClientSettings, paths: &DataPaths) -> TomatoResult<()> {
        settings.auth_token = None;
        settings.hostname = None;
        settings.save(paths).map_err(TomatoError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_authorization_with_no_token_is_logged_out() {
        let settings = ClientSettings::default();
        let status = TokenStore::check_authorization(&settings).await.unwrap();
        assert_eq!(status, AuthStatus { logged_in: false, connected: false, has_sync: false });
    }

    #[tokio::test]
    async fn check_authorization_with_unreachable_host_stays_logged_in() {
        let settings = ClientSettings {
            hostname: Some("unreachable.invalid.example".to_string()),
            auth_token: Some("tok".to_string()),
            ..ClientSettings::default()
        };
        let status = TokenStore::check_authorization(&settings).await.unwrap();
        assert!(status.logged_in);
        assert!(!status.connected);
    }

    #[tokio::test]
    async fn check_authorization_with_no_token_but_prior_sync_reports_has_sync() {
        let settings = ClientSettings {
            last_sync: Some(chrono::Utc::now()),
            ..ClientSettings::default()
        };
        let status = TokenStore::check_authorization(&settings).await.unwrap();
        assert!(!status.logged_in);
        assert!(status.has_sync);
    }
}
