use std::sync::atomic::{AtomicBool, Ordering};

use crate::catalog::{CatalogStore, ExportResponse, ExportSnapshot};
use crate::error::{TomatoError, TomatoResult};
use crate::http::ApiClient;
use crate::paths::DataPaths;

use super::media;

/// Progress percentage reported after the metadata call but before any
/// files have been downloaded, per §4.2 step 4's formula baseline.
const METADATA_PHASE_PERCENT: f64 = 3.0;
const DOWNLOAD_PHASE_SPAN: f64 = 96.0;

/// Runs the sync protocol end to end (§4.2): `GET /export`, partition,
/// download-before-commit, single-transaction commit. Owns no state across
/// calls — a fresh `SyncEngine` is cheap, the cost lives in `CatalogStore`
/// and `ApiClient`.
pub struct SyncEngine<'a> {
    client: &'a ApiClient,
    store: &'a CatalogStore,
    paths: &'a DataPaths,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncProgress {
    pub percent: f64,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub assets_downloaded: usize,
    pub assets_already_present: usize,
    pub assets_total: usize,
}

impl<'a> SyncEngine<'a> {
    pub fn new(client: &'a ApiClient, store: &'a CatalogStore, paths: &'a DataPaths) -> Self {
        Self { client, store, paths }
    }

    /// Runs one full sync. `auth_token` is required — `/export` always
    /// requires authentication. `on_progress` is called with a monotonic
    /// percentage; `cancel` is polled between downloads and before commit —
    /// if set, the sync aborts with no commit performed (§4.2, §5).
    pub async fn run(
        &self,
        auth_token: &str,
        cancel: &AtomicBool,
        mut on_progress: impl FnMut(SyncProgress),
    ) -> TomatoResult<SyncReport> {
        log::info!("sync: requesting /export");
        let response = self.client.get("export", Some(auth_token)).send().await?;
        if let Some(err) = ApiClient::classify_status(response.status()) {
            log::error!("sync: export request failed: {err}");
            return Err(err);
        }
        let export: ExportResponse = response.json().await.map_err(|_| TomatoError::JsonDecodeError)?;
        let snapshot: ExportSnapshot = export.into_snapshot();
        on_progress(SyncProgress { percent: METADATA_PHASE_PERCENT });

        if cancel.load(Ordering::SeqCst) {
            log::info!("sync: cancelled before downloads began");
            return Err(TomatoError::Unexpected("sync cancelled".to_string()));
        }

        let mut report = SyncReport { assets_total: snapshot.assets.len(), ..Default::default() };
        let media_url = snapshot.media_url.trim_end_matches('/').to_string();

        for (i, asset) in snapshot.assets.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                log::info!("sync: cancelled mid-download, no commit performed");
                return Err(TomatoError::Unexpected("sync cancelled".to_string()));
            }

            let dest = self.paths.media_file(&asset.audio.relative_path);
            if media::needs_download(&dest, asset.audio.audio_size) {
                let url = format!("{media_url}/{}", asset.audio.relative_path.trim_start_matches('/'));
                media::download_to(self.client, &url, &dest).await?;
                report.assets_downloaded += 1;
            } else {
                report.assets_already_present += 1;
            }

            let done = (i + 1) as f64;
            let percent = METADATA_PHASE_PERCENT + DOWNLOAD_PHASE_SPAN * (done / report.assets_total.max(1) as f64);
            on_progress(SyncProgress { percent });
        }

        if cancel.load(Ordering::SeqCst) {
            log::info!("sync: cancelled before commit, no commit performed");
            return Err(TomatoError::Unexpected("sync cancelled".to_string()));
        }

        self.store.apply_snapshot(&snapshot).await?;
        on_progress(SyncProgress { percent: 100.0 });
        log::info!(
            "sync: committed {} assets ({} downloaded, {} already present)",
            report.assets_total, report.assets_downloaded, report.assets_already_present
        );

        Ok(report)
    }
}
