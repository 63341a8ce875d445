pub mod engine;
pub mod media;

pub use engine::{SyncEngine, SyncProgress, SyncReport};
