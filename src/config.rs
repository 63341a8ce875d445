use serde::{Deserialize, Serialize};

use crate::paths::DataPaths;

/// Client-local settings, persisted as `config.json` under the data dir.
/// Modeled after `client/tomato/config.py`'s `Config` singleton, but owned
/// by `AppContext` and passed explicitly rather than imported as a global
/// (Design Note §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    pub hostname: Option<String>,
    pub protocol: String,
    pub auth_token: Option<String>,
    pub debug: bool,
    pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            hostname: None,
            protocol: "https".to_string(),
            auth_token: None,
            debug: false,
            last_sync: None,
        }
    }
}

impl ClientSettings {
    pub fn load(paths: &DataPaths) -> Self {
        let path = paths.config_file();
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                log::warn!("config.json is unreadable ({err}), starting from defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, paths: &DataPaths) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(self).expect("ClientSettings always serializes");
        std::fs::write(paths.config_file(), raw)
    }

    pub fn base_url(&self) -> Option<String> {
        self.hostname
            .as_ref()
            .map(|host| format!("{}://{}", self.protocol, host))
    }
}
