use crate::catalog::CatalogStore;
use crate::config::ClientSettings;
use crate::error::TomatoResult;
use crate::http::ApiClient;
use crate::log_shipper::LogShipper;
use crate::paths::DataPaths;

/// Everything a command needs, built once at startup and passed by
/// reference from then on. Replaces the teacher's process-wide
/// `AppState` singleton with a single explicit value (Design Note §9) —
/// there is no global mutable state anywhere in this crate.
pub struct AppContext {
    pub paths: DataPaths,
    pub settings: ClientSettings,
    pub catalog: CatalogStore,
    pub log_shipper: LogShipper,
}

impl AppContext {
    pub async fn bootstrap(debug: bool) -> TomatoResult<Self> {
        let paths = DataPaths::resolve()?;
        let mut settings = ClientSettings::load(&paths);
        if debug {
            settings.debug = true;
        }

        let catalog = CatalogStore::open(&paths.catalog_db().to_string_lossy()).await?;
        let log_shipper = LogShipper::open(&paths.log_queue_db().to_string_lossy()).await?;

        Ok(Self { paths, settings, catalog, log_shipper })
    }

    /// `None` until a hostname has been configured via `login`.
    pub fn api_client(&self) -> Option<ApiClient> {
        self.settings.base_url().map(ApiClient::new)
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.settings.auth_token.as_deref()
    }

    pub fn save_settings(&self) -> TomatoResult<()> {
        self.settings.save(&self.paths).map_err(Into::into)
    }

    /// §4.6's explicit logout hook: clears on-disk asset files that no
    /// longer correspond to any row in the Catalog Store. Deferred to
    /// logout rather than sync, since playout may still hold a file handle
    /// open on an asset the server just removed.
    pub async fn cleanup_orphan_media(&self) -> TomatoResult<usize> {
        let known: std::collections::HashSet<String> =
            self.catalog.all_audio_relative_paths().await?.into_iter().collect();

        let media_dir = self.paths.media_assets_dir();
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&media_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let relative = format!("assets/{}", file_name.to_string_lossy());
            if !known.contains(&relative) && !relative.ends_with(".tmp") {
                let _ = tokio::fs::remove_file(entry.path()).await;
                removed += 1;
            }
        }

        log::info!("logout: removed {removed} orphaned media file(s)");
        Ok(removed)
    }
}
