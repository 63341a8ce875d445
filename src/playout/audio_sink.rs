use std::path::Path;
use std::time::Duration;

use crate::error::TomatoResult;

/// Opaque handle to a loaded-but-not-yet-finished playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkHandle(pub u64);

/// The Playout Controller's external collaborator (§4.4): real audio decode
/// and device output live behind this trait, out of scope for this crate.
/// `NullAudioSink` below is the only implementation shipped here.
pub trait AudioSink: Send {
    fn load(&mut self, path: &Path, fade_ms: u32) -> TomatoResult<SinkHandle>;
    fn play(&mut self, handle: SinkHandle) -> TomatoResult<()>;
    fn pause(&mut self) -> TomatoResult<()>;
    fn resume(&mut self) -> TomatoResult<()>;
    /// Stops playback and returns how much of the asset actually played.
    fn stop(&mut self) -> TomatoResult<Duration>;
    /// Registers a callback fired when the loaded asset reaches its natural
    /// end. The controller uses this to distinguish `ACTION_PLAYED_ASSET`
    /// from `ACTION_SKIPPED_ASSET`.
    fn on_ended(&mut self, callback: Box<dyn FnOnce() + Send>);
}

/// Test double: "plays" instantly and reports the full nominal duration as
/// played. Used by controller tests and anywhere real decode isn't wired up.
pub struct NullAudioSink {
    next_handle: u64,
    loaded_duration: Duration,
    ended_callback: Option<Box<dyn FnOnce() + Send>>,
}

impl Default for NullAudioSink {
    fn default() -> Self {
        Self { next_handle: 0, loaded_duration: Duration::ZERO, ended_callback: None }
    }
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: fires whatever `on_ended` callback is currently registered,
    /// simulating natural end-of-asset.
    pub fn simulate_natural_end(&mut self) {
        if let Some(cb) = self.ended_callback.take() {
            cb();
        }
    }

    pub fn set_next_loaded_duration(&mut self, duration: Duration) {
        self.loaded_duration = duration;
    }
}

impl AudioSink for NullAudioSink {
    fn load(&mut self, _path: &Path, _fade_ms: u32) -> TomatoResult<SinkHandle> {
        self.next_handle += 1;
        Ok(SinkHandle(self.next_handle))
    }

    fn play(&mut self, _handle: SinkHandle) -> TomatoResult<()> {
        Ok(())
    }

    fn pause(&mut self) -> TomatoResult<()> {
        Ok(())
    }

    fn resume(&mut self) -> TomatoResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> TomatoResult<Duration> {
        Ok(self.loaded_duration)
    }

    fn on_ended(&mut self, callback: Box<dyn FnOnce() + Send>) {
        self.ended_callback = Some(callback);
    }
}
