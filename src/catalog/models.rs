use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_NAME_LEN: usize = 75;
pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Closed palette of rotator color tags, snarfed from the server admin's
/// Materialize color list (`COLORS` in the original implementation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotatorColor {
    Red,
    Pink,
    Purple,
    DeepPurple,
    Indigo,
    Blue,
    LightBlue,
    Cyan,
    Teal,
    Green,
    LightGreen,
    Lime,
    Yellow,
    Amber,
    Orange,
    DeepOrange,
}

impl RotatorColor {
    pub const ALL: [RotatorColor; 16] = [
        RotatorColor::Red,
        RotatorColor::Pink,
        RotatorColor::Purple,
        RotatorColor::DeepPurple,
        RotatorColor::Indigo,
        RotatorColor::Blue,
        RotatorColor::LightBlue,
        RotatorColor::Cyan,
        RotatorColor::Teal,
        RotatorColor::Green,
        RotatorColor::LightGreen,
        RotatorColor::Lime,
        RotatorColor::Yellow,
        RotatorColor::Amber,
        RotatorColor::Orange,
        RotatorColor::DeepOrange,
    ];

    pub fn from_str_lenient(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .unwrap_or(RotatorColor::Red)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RotatorColor::Red => "red",
            RotatorColor::Pink => "pink",
            RotatorColor::Purple => "purple",
            RotatorColor::DeepPurple => "deep-purple",
            RotatorColor::Indigo => "indigo",
            RotatorColor::Blue => "blue",
            RotatorColor::LightBlue => "light-blue",
            RotatorColor::Cyan => "cyan",
            RotatorColor::Teal => "teal",
            RotatorColor::Green => "green",
            RotatorColor::LightGreen => "light-green",
            RotatorColor::Lime => "lime",
            RotatorColor::Yellow => "yellow",
            RotatorColor::Amber => "amber",
            RotatorColor::Orange => "orange",
            RotatorColor::DeepOrange => "deep-orange",
        }
    }
}

/// Eligibility triple shared by Asset and StopSet: `enabled` gates random
/// selection outright; `begin`/`end` bound the airing window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Eligibility {
    pub enabled: bool,
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Eligibility {
    /// §3-inv-4: `(begin is None or begin <= T) and (end is None or end >= T)`.
    pub fn currently_airing(&self, at: DateTime<Utc>) -> bool {
        self.begin.map_or(true, |b| b <= at) && self.end.map_or(true, |e| e >= at)
    }

    /// `enabled AND currently-airing`.
    pub fn currently_enabled(&self, at: DateTime<Utc>) -> bool {
        self.enabled && self.currently_airing(at)
    }
}

/// Coerce a non-positive weight to 1, per §3-inv-1. Called on every ingest
/// path (both local create/update and snapshot apply) so stored weights are
/// always `> 0` and downstream code never special-cases zero/negative.
pub fn normalize_weight(weight: f64) -> f64 {
    if weight > 0.0 {
        weight
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFile {
    /// Path relative to `media_url`, e.g. `assets/1234.mp3`.
    pub relative_path: String,
    pub audio_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub name: String,
    pub duration_ms: i64,
    pub audio: AudioFile,
    pub eligibility: Eligibility,
    pub weight: f64,
    pub rotator_ids: Vec<i64>,
}

impl Asset {
    pub fn currently_enabled(&self, at: DateTime<Utc>) -> bool {
        self.eligibility.currently_enabled(at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rotator {
    pub id: i64,
    pub name: String,
    pub color: RotatorColor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSet {
    pub id: i64,
    pub name: String,
    pub eligibility: Eligibility,
    pub weight: f64,
}

impl StopSet {
    pub fn currently_enabled(&self, at: DateTime<Utc>) -> bool {
        self.eligibility.currently_enabled(at)
    }
}

/// One ordered position in a StopSet's rotator sequence (a.k.a.
/// `StopSetRotator` on the server). Order is meaningful: slot 0 plays first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotatorSlot {
    pub id: i64,
    pub stopset_id: i64,
    pub rotator_id: i64,
    /// Stable ordering key — the server's row id, ascending.
    pub position: i64,
}

/// Closed log-action vocabulary (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    PlayedAsset,
    SkippedAsset,
    PlayedStopset,
    PlayedPartialStopset,
    SkippedStopset,
    Waited,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::PlayedAsset => "played_asset",
            LogAction::SkippedAsset => "skipped_asset",
            LogAction::PlayedStopset => "played_stopset",
            LogAction::PlayedPartialStopset => "partial_stopset",
            LogAction::SkippedStopset => "skipped_stopset",
            LogAction::Waited => "waited",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub uuid: uuid::Uuid,
    pub created: DateTime<Utc>,
    pub user_id: i64,
    pub action: LogAction,
    pub duration_ms: Option<i64>,
    pub description: String,
}

impl LogEntry {
    pub fn new(user_id: i64, action: LogAction, duration_ms: Option<i64>, description: impl Into<String>) -> Self {
        let mut description = description.into();
        description.truncate(MAX_DESCRIPTION_LEN);
        Self {
            uuid: uuid::Uuid::new_v4(),
            created: Utc::now(),
            user_id,
            action,
            duration_ms,
            description,
        }
    }
}

/// Server-authoritative Config, recognized keys only (§3, §6). Unrecognized
/// keys from the server are dropped at parse time; missing keys fall back
/// to the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub timezone: String,
    pub wait_interval_minutes: i64,
    pub wait_interval_subtracts_stopset_playtime: bool,
    pub fade_assets_ms: i64,
    pub clickable_waveform: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            timezone: "US/Pacific".to_string(),
            wait_interval_minutes: 20,
            wait_interval_subtracts_stopset_playtime: false,
            fade_assets_ms: 0,
            clickable_waveform: false,
        }
    }
}

impl StationConfig {
    /// Validate and clamp raw server values per §3/§6/Open Question 2:
    /// `wait_interval_minutes` is clamped to `[0, 600]` regardless of what
    /// the server sent (older server builds did not clamp on their end),
    /// `fade_assets_ms` to `[0, 10000]`, and `timezone` falls back to the
    /// default unless it parses as a valid IANA name.
    pub fn sanitize(mut self) -> Self {
        self.wait_interval_minutes = self.wait_interval_minutes.clamp(0, 600);
        self.fade_assets_ms = self.fade_assets_ms.clamp(0, 10_000);
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            self.timezone = Self::default().timezone;
        }
        self
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone
            .parse()
            .unwrap_or(chrono_tz::US::Pacific)
    }
}

/// A full server snapshot as returned by `GET /export` (§4.2, §6).
#[derive(Debug, Clone)]
pub struct ExportSnapshot {
    pub conf: StationConfig,
    pub media_url: String,
    pub assets: Vec<Asset>,
    pub rotators: Vec<Rotator>,
    pub stopsets: Vec<StopSet>,
    pub slots: Vec<RotatorSlot>,
}

/// Wire shape of `/export`: a heterogeneous tagged list. Deserialized first
/// into this, then partitioned by kind (§4.2 step 3) into `ExportSnapshot`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportResponse {
    pub conf: RawStationConfig,
    pub media_url: String,
    pub objects: Vec<ExportObject>,
}

/// Raw config as received over the wire — every field optional so missing
/// keys fall back to `StationConfig::default()` and unrecognized keys are
/// simply absent from this struct (serde ignores them by default).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStationConfig {
    pub timezone: Option<String>,
    pub wait_interval_minutes: Option<i64>,
    pub wait_interval_subtracts_stopset_playtime: Option<bool>,
    pub fade_assets_ms: Option<i64>,
    pub clickable_waveform: Option<bool>,
}

impl From<RawStationConfig> for StationConfig {
    fn from(raw: RawStationConfig) -> Self {
        let default = StationConfig::default();
        StationConfig {
            timezone: raw.timezone.unwrap_or(default.timezone),
            wait_interval_minutes: raw.wait_interval_minutes.unwrap_or(default.wait_interval_minutes),
            wait_interval_subtracts_stopset_playtime: raw
                .wait_interval_subtracts_stopset_playtime
                .unwrap_or(default.wait_interval_subtracts_stopset_playtime),
            fade_assets_ms: raw.fade_assets_ms.unwrap_or(default.fade_assets_ms),
            clickable_waveform: raw.clickable_waveform.unwrap_or(default.clickable_waveform),
        }
        .sanitize()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ExportObject {
    Asset { fields: AssetFields },
    Rotator { fields: RotatorFields },
    Stopset { fields: StopSetFields },
    StopsetRotator { fields: StopSetRotatorFields },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetFields {
    pub id: i64,
    pub name: String,
    pub duration_ms: i64,
    pub audio_path: String,
    pub audio_size: i64,
    pub enabled: bool,
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub weight: f64,
    #[serde(default)]
    pub rotator_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotatorFields {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    RotatorColor::Red.as_str().to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopSetFields {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopSetRotatorFields {
    pub id: i64,
    pub stopset_id: i64,
    pub rotator_id: i64,
}

impl ExportResponse {
    /// Partition the heterogeneous `objects` list by kind (§4.2 step 3),
    /// normalizing weights (§3-inv-1) and colors along the way.
    pub fn into_snapshot(self) -> ExportSnapshot {
        let mut assets = Vec::new();
        let mut rotators = Vec::new();
        let mut stopsets = Vec::new();
        let mut slots = Vec::new();

        for obj in self.objects {
            match obj {
                ExportObject::Asset { fields } => assets.push(Asset {
                    id: fields.id,
                    name: fields.name.chars().take(MAX_NAME_LEN).collect(),
                    duration_ms: fields.duration_ms,
                    audio: AudioFile {
                        relative_path: fields.audio_path,
                        audio_size: fields.audio_size,
                    },
                    eligibility: Eligibility {
                        enabled: fields.enabled,
                        begin: fields.begin,
                        end: fields.end,
                    },
                    weight: normalize_weight(fields.weight),
                    rotator_ids: fields.rotator_ids,
                }),
                ExportObject::Rotator { fields } => rotators.push(Rotator {
                    id: fields.id,
                    name: fields.name.chars().take(MAX_NAME_LEN).collect(),
                    color: RotatorColor::from_str_lenient(&fields.color),
                }),
                ExportObject::Stopset { fields } => stopsets.push(StopSet {
                    id: fields.id,
                    name: fields.name.chars().take(MAX_NAME_LEN).collect(),
                    eligibility: Eligibility {
                        enabled: fields.enabled,
                        begin: fields.begin,
                        end: fields.end,
                    },
                    weight: normalize_weight(fields.weight),
                }),
                ExportObject::StopsetRotator { fields } => slots.push(RotatorSlot {
                    id: fields.id,
                    stopset_id: fields.stopset_id,
                    rotator_id: fields.rotator_id,
                    position: fields.id,
                }),
            }
        }

        ExportSnapshot {
            conf: self.conf.into(),
            media_url: self.media_url,
            assets,
            rotators,
            stopsets,
            slots,
        }
    }
}
