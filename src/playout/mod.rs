pub mod audio_sink;
pub mod controller;

pub use audio_sink::{AudioSink, NullAudioSink, SinkHandle};
pub use controller::{PlayoutController, PlayoutState};
