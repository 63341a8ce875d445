use std::time::Duration;

use rand::Rng;

use crate::catalog::{CatalogStore, LogAction, LogEntry, StationConfig};
use crate::error::{TomatoError, TomatoResult};
use crate::paths::DataPaths;
use crate::scheduler::{generate_next_block, GeneratedBlock};

use super::audio_sink::{AudioSink, SinkHandle};

const SYSTEM_USER_ID: i64 = 0;

#[derive(Debug, Clone)]
pub enum PlayoutState {
    Idle,
    WaitingBetweenBlocks { remaining: Duration, total: Duration },
    Playing { block: GeneratedBlock, index: usize, paused: bool },
    Finished,
}

/// Converts a block plan into audible output and LogEntries (§4.4). Does not
/// decode audio itself — that's delegated to an `AudioSink`. Emits no
/// LogEntry to the network directly; callers drain `take_pending_logs()`
/// into the Log Shipper's queue.
pub struct PlayoutController<S: AudioSink> {
    store: CatalogStore,
    paths: DataPaths,
    config: StationConfig,
    sink: S,
    state: PlayoutState,
    pending_logs: Vec<LogEntry>,
    current_handle: Option<SinkHandle>,
    any_asset_skipped_or_stopset_skipped: bool,
    played_total: Duration,
}

impl<S: AudioSink> PlayoutController<S> {
    pub fn new(store: CatalogStore, paths: DataPaths, config: StationConfig, sink: S) -> Self {
        Self {
            store,
            paths,
            config,
            sink,
            state: PlayoutState::Idle,
            pending_logs: Vec::new(),
            current_handle: None,
            any_asset_skipped_or_stopset_skipped: false,
            played_total: Duration::ZERO,
        }
    }

    pub fn state(&self) -> &PlayoutState {
        &self.state
    }

    pub fn take_pending_logs(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.pending_logs)
    }

    fn log(&mut self, action: LogAction, duration_ms: Option<i64>, description: impl Into<String>) {
        let entry = LogEntry::new(SYSTEM_USER_ID, action, duration_ms, description);
        log::info!("playout: {} ({:?})", action.as_str(), duration_ms);
        self.pending_logs.push(entry);
    }

    fn wait_duration(&self, played_total: Duration) -> Duration {
        let configured = Duration::from_secs(60 * self.config.wait_interval_minutes.max(0) as u64);
        if self.config.wait_interval_subtracts_stopset_playtime {
            configured.saturating_sub(played_total)
        } else {
            configured
        }
    }

    /// §4.4: only valid while `Idle`. Runs the Block Generator; on an empty
    /// or all-dry plan, logs `ACTION_WAITED` for the full configured
    /// interval and enters `WaitingBetweenBlocks`. Otherwise begins playing
    /// slot 0.
    pub async fn generate_next_block_action(&mut self, rng: &mut impl Rng) -> TomatoResult<()> {
        if !matches!(self.state, PlayoutState::Idle) {
            return Err(TomatoError::Unexpected(
                "generate_next_block is only valid while Idle".to_string(),
            ));
        }

        let now = chrono::Utc::now();
        let plan = generate_next_block(&self.store, now, rng).await?;

        match plan {
            Some(block) if !block.is_dry() => {
                self.any_asset_skipped_or_stopset_skipped = false;
                self.played_total = Duration::ZERO;
                self.enter_slot(block, 0)?;
            }
            _ => {
                // No immediate log here: §4.4 names ACTION_WAITED for both this
                // transition and WaitingBetweenBlocks expiry, but logging it twice
                // for one wait would double-count it server-side. `tick_wait`
                // logs it once, uniformly, when the wait actually elapses.
                let w = self.wait_duration(Duration::ZERO);
                self.state = PlayoutState::WaitingBetweenBlocks { remaining: w, total: w };
            }
        }
        Ok(())
    }

    fn enter_slot(&mut self, block: GeneratedBlock, index: usize) -> TomatoResult<()> {
        if index >= block.slots.len() {
            return self.finish_block(block);
        }

        let slot = &block.slots[index];
        match &slot.asset {
            Some(asset) => {
                let path = self.paths.media_file(&asset.audio.relative_path);
                let handle = self.sink.load(&path, self.config.fade_assets_ms as u32)?;
                self.sink.play(handle)?;
                self.current_handle = Some(handle);
                self.state = PlayoutState::Playing { block, index, paused: false };
                Ok(())
            }
            None => {
                // §4.4: slot with a null asset is skipped silently.
                self.enter_slot(block, index + 1)
            }
        }
    }

    fn finish_block(&mut self, block: GeneratedBlock) -> TomatoResult<()> {
        let action = if !self.any_asset_skipped_or_stopset_skipped {
            LogAction::PlayedStopset
        } else {
            LogAction::PlayedPartialStopset
        };
        self.log(action, None, format!("stopset {} finished", block.stopset.id));

        let w = self.wait_duration(self.played_total);
        self.state = PlayoutState::WaitingBetweenBlocks { remaining: w, total: w };
        Ok(())
    }

    /// Natural end-of-asset (driven by the sink's `on_ended` callback having
    /// fired). Logs `ACTION_PLAYED_ASSET` with the actually-played duration.
    pub fn on_asset_ended(&mut self) -> TomatoResult<()> {
        let PlayoutState::Playing { block, index, .. } = &self.state else {
            return Err(TomatoError::Unexpected("on_asset_ended outside Playing".to_string()));
        };
        let asset_id = block.slots[*index].asset.as_ref().map(|a| a.id);
        let played = self.sink.stop()?;
        self.current_handle = None;

        if let Some(id) = asset_id {
            self.played_total += played;
            self.log(LogAction::PlayedAsset, Some(played.as_millis() as i64), format!("asset {id}"));
        }

        self.advance()
    }

    /// Operator action: cuts the current asset short. Logs
    /// `ACTION_SKIPPED_ASSET` with the position reached at skip time.
    pub fn skip_current_asset(&mut self) -> TomatoResult<()> {
        let PlayoutState::Playing { block, index, .. } = &self.state else {
            return Err(TomatoError::Unexpected("skip_current_asset outside Playing".to_string()));
        };
        let asset_id = block.slots[*index].asset.as_ref().map(|a| a.id);
        let played = self.sink.stop()?;
        self.current_handle = None;
        self.any_asset_skipped_or_stopset_skipped = true;

        if let Some(id) = asset_id {
            self.played_total += played;
            self.log(LogAction::SkippedAsset, Some(played.as_millis() as i64), format!("asset {id}"));
        }

        self.advance()
    }

    fn advance(&mut self) -> TomatoResult<()> {
        let PlayoutState::Playing { block, index, .. } = std::mem::replace(&mut self.state, PlayoutState::Idle) else {
            return Err(TomatoError::Unexpected("advance outside Playing".to_string()));
        };
        self.enter_slot(block, index + 1)
    }

    /// Operator action: abandons the rest of the current block entirely.
    /// Logs `ACTION_SKIPPED_STOPSET`.
    pub fn skip_rest_of_stopset(&mut self) -> TomatoResult<()> {
        let PlayoutState::Playing { block, .. } = std::mem::replace(&mut self.state, PlayoutState::Idle) else {
            return Err(TomatoError::Unexpected("skip_rest_of_stopset outside Playing".to_string()));
        };
        if self.current_handle.is_some() {
            let cut_short = self.sink.stop()?;
            self.played_total += cut_short;
            self.current_handle = None;
        }
        self.log(LogAction::SkippedStopset, None, format!("stopset {} skipped", block.stopset.id));

        let w = self.wait_duration(self.played_total);
        self.state = PlayoutState::WaitingBetweenBlocks { remaining: w, total: w };
        Ok(())
    }

    pub fn pause(&mut self) -> TomatoResult<()> {
        if let PlayoutState::Playing { paused, .. } = &mut self.state {
            if !*paused {
                self.sink.pause()?;
                *paused = true;
            }
        }
        Ok(())
    }

    pub fn resume(&mut self) -> TomatoResult<()> {
        if let PlayoutState::Playing { paused, .. } = &mut self.state {
            if *paused {
                self.sink.resume()?;
                *paused = false;
            }
        }
        Ok(())
    }

    /// Advances a `WaitingBetweenBlocks` countdown by `elapsed`. On expiry,
    /// logs `ACTION_WAITED` with the configured interval and returns to
    /// `Idle`. The caller (CLI main loop) is responsible for the actual
    /// timer tick cadence (§5).
    pub fn tick_wait(&mut self, elapsed: Duration) -> TomatoResult<()> {
        let PlayoutState::WaitingBetweenBlocks { remaining, total } = &mut self.state else {
            return Ok(());
        };
        if elapsed >= *remaining {
            let total = *total;
            self.log(LogAction::Waited, Some(total.as_millis() as i64), "wait interval elapsed");
            self.state = PlayoutState::Idle;
        } else {
            *remaining -= elapsed;
        }
        Ok(())
    }

    /// Terminal from any state (§4.4); in-flight logs are left in
    /// `pending_logs` for the caller to flush before exit.
    pub fn shutdown(&mut self) -> TomatoResult<()> {
        if self.current_handle.is_some() {
            let _ = self.sink.stop();
            self.current_handle = None;
        }
        self.state = PlayoutState::Finished;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::{AudioFile, Eligibility};
    use crate::catalog::{ExportSnapshot, Rotator, RotatorColor, RotatorSlot, StopSet};
    use crate::playout::audio_sink::NullAudioSink;
    use rand::SeedableRng;

    async fn store_with_one_stopset_one_asset() -> CatalogStore {
        let store = CatalogStore::open_in_memory().await.unwrap();
        let snapshot = ExportSnapshot {
            conf: StationConfig::default(),
            media_url: "https://station.example/media/".to_string(),
            assets: vec![crate::catalog::Asset {
                id: 1,
                name: "id1".to_string(),
                duration_ms: 10_000,
                audio: AudioFile { relative_path: "assets/1.mp3".to_string(), audio_size: 10 },
                eligibility: Eligibility { enabled: true, begin: None, end: None },
                weight: 1.0,
                rotator_ids: vec![10],
            }],
            rotators: vec![Rotator { id: 10, name: "IDs".to_string(), color: RotatorColor::Red }],
            stopsets: vec![StopSet {
                id: 100,
                name: "S1".to_string(),
                eligibility: Eligibility { enabled: true, begin: None, end: None },
                weight: 1.0,
            }],
            slots: vec![RotatorSlot { id: 1, stopset_id: 100, rotator_id: 10, position: 0 }],
        };
        store.apply_snapshot(&snapshot).await.unwrap();
        store
    }

    #[tokio::test]
    async fn full_block_then_wait_emits_played_stopset_and_waited() {
        let store = store_with_one_stopset_one_asset().await;
        let paths = DataPaths::at(std::env::temp_dir().join("tomato-controller-test-1"));
        let config = StationConfig { wait_interval_minutes: 1, ..StationConfig::default() };
        let mut controller = PlayoutController::new(store, paths, config, NullAudioSink::new());

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        controller.generate_next_block_action(&mut rng).await.unwrap();
        assert!(matches!(controller.state(), PlayoutState::Playing { .. }));

        controller.on_asset_ended().unwrap();
        assert!(matches!(controller.state(), PlayoutState::WaitingBetweenBlocks { .. }));

        controller.tick_wait(Duration::from_secs(61)).unwrap();
        assert!(matches!(controller.state(), PlayoutState::Idle));

        let logs: Vec<_> = controller.take_pending_logs();
        assert!(logs.iter().any(|l| l.action == LogAction::PlayedAsset));
        assert!(logs.iter().any(|l| l.action == LogAction::PlayedStopset));
        assert!(logs.iter().any(|l| l.action == LogAction::Waited));
    }

    #[tokio::test]
    async fn empty_plan_logs_waited_once_at_expiry_not_on_entry() {
        let store = CatalogStore::open_in_memory().await.unwrap();
        let paths = DataPaths::at(std::env::temp_dir().join("tomato-controller-test-3"));
        let config = StationConfig { wait_interval_minutes: 1, ..StationConfig::default() };
        let mut controller = PlayoutController::new(store, paths, config, NullAudioSink::new());

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        controller.generate_next_block_action(&mut rng).await.unwrap();
        assert!(matches!(controller.state(), PlayoutState::WaitingBetweenBlocks { .. }));
        assert!(controller.take_pending_logs().is_empty());

        controller.tick_wait(Duration::from_secs(61)).unwrap();
        assert!(matches!(controller.state(), PlayoutState::Idle));

        let logs = controller.take_pending_logs();
        assert_eq!(logs.iter().filter(|l| l.action == LogAction::Waited).count(), 1);
    }

    #[tokio::test]
    async fn skip_current_asset_marks_block_as_partial() {
        let store = store_with_one_stopset_one_asset().await;
        let paths = DataPaths::at(std::env::temp_dir().join("tomato-controller-test-2"));
        let config = StationConfig::default();
        let mut controller = PlayoutController::new(store, paths, config, NullAudioSink::new());

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        controller.generate_next_block_action(&mut rng).await.unwrap();
        controller.skip_current_asset().unwrap();

        let logs = controller.take_pending_logs();
        assert!(logs.iter().any(|l| l.action == LogAction::SkippedAsset));
        assert!(logs.iter().any(|l| l.action == LogAction::PlayedPartialStopset));
    }

    #[tokio::test]
    async fn wait_interval_subtracts_actual_played_duration() {
        let store = store_with_one_stopset_one_asset().await;
        let paths = DataPaths::at(std::env::temp_dir().join("tomato-controller-test-4"));
        let config = StationConfig {
            wait_interval_minutes: 1,
            wait_interval_subtracts_stopset_playtime: true,
            ..StationConfig::default()
        };
        let mut sink = NullAudioSink::new();
        sink.set_next_loaded_duration(Duration::from_secs(50));
        let mut controller = PlayoutController::new(store, paths, config, sink);

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        controller.generate_next_block_action(&mut rng).await.unwrap();
        controller.on_asset_ended().unwrap();

        let PlayoutState::WaitingBetweenBlocks { remaining, .. } = controller.state() else {
            panic!("expected WaitingBetweenBlocks");
        };
        // 60s configured minus 50s actually played = 10s remaining.
        assert_eq!(*remaining, Duration::from_secs(10));
    }
}
