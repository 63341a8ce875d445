pub mod models;
pub mod store;

pub use models::{
    Asset, Eligibility, ExportResponse, ExportSnapshot, LogAction, LogEntry, Rotator,
    RotatorColor, RotatorSlot, StationConfig, StopSet,
};
pub use store::CatalogStore;
