use std::path::{Path, PathBuf};

use crate::error::{TomatoError, TomatoResult};

/// Resolves and owns every on-disk location the client touches (§6
/// "Persisted state"). Mirrors `client/tomato/constants.py`'s `USER_DIR` /
/// `MEDIA_DIR` split: one directory for client-owned bookkeeping (config,
/// sqlite catalog, auth token, log queue) and one for the media cache.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// `dirs::data_dir()/tomato`, created if missing. Falls back to the
    /// process's current directory only in the degenerate case where the
    /// platform has no data dir at all (headless containers, some CI images).
    pub fn resolve() -> TomatoResult<Self> {
        let root = dirs::data_dir()
            .map(|d| d.join("tomato"))
            .unwrap_or_else(|| PathBuf::from(".tomato"));
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join("media/assets"))?;
        Ok(Self { root })
    }

    #[cfg(test)]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let _ = std::fs::create_dir_all(&root);
        let _ = std::fs::create_dir_all(root.join("media/assets"));
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn catalog_db(&self) -> PathBuf {
        self.root.join("db.sqlite3")
    }

    pub fn log_queue_db(&self) -> PathBuf {
        self.root.join("log_queue.sqlite3")
    }

    /// `<data dir>/media` — asset relative paths (e.g. `assets/1.mp3`) are
    /// joined onto this, matching the `media/assets/<filename>` layout
    /// from §6's persisted-state note.
    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    pub fn media_assets_dir(&self) -> PathBuf {
        self.media_dir().join("assets")
    }

    pub fn media_file(&self, relative_path: &str) -> PathBuf {
        self.media_dir().join(relative_path)
    }

    /// Single-instance lockfile (§5 "at-most-one" invariants): held for the
    /// process lifetime unless `--allow-multiple` was passed.
    pub fn lockfile(&self) -> PathBuf {
        self.root.join("tomato.run")
    }

    /// Best-effort advisory lock: fails closed if a lockfile already exists,
    /// since this client has no cross-platform flock primitive in its
    /// dependency stack. The caller decides whether that's fatal.
    pub fn acquire_single_instance_lock(&self) -> TomatoResult<()> {
        let lockfile = self.lockfile();
        if lockfile.exists() {
            return Err(TomatoError::Unexpected(
                "another instance appears to be running (remove tomato.lock if this is stale)"
                    .to_string(),
            ));
        }
        std::fs::write(&lockfile, std::process::id().to_string())?;
        Ok(())
    }

    pub fn release_single_instance_lock(&self) {
        let _ = std::fs::remove_file(self.lockfile());
    }
}
