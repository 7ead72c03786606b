//! Playback snapshot served as the answer to `query` requests.
//!
//! The snapshot itself comes from the host application; this module only
//! defines its shape, a couple of ways to supply it, and the responder task
//! that wires it to the bridge.

pub mod responder;

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use responder::spawn_query_responder;

/// Whether the current track is liked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LikeStatus {
    /// Neither liked nor disliked (wire value `INDEFFERENT`).
    #[default]
    #[serde(rename = "INDEFFERENT")]
    Indifferent,
    /// Liked.
    #[serde(rename = "LIKE")]
    Like,
    /// Disliked.
    #[serde(rename = "DISLIKE")]
    Dislike,
}

/// Repeat mode of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepeatType {
    /// Play through once.
    #[default]
    None,
    /// Repeat the whole list.
    All,
    /// Repeat the current track.
    One,
}

/// Player state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Whether a track is loaded.
    pub has_song: bool,
    /// Whether playback is paused.
    pub is_paused: bool,
    /// Volume in percent.
    pub volume_percent: f64,
    /// Position in seconds.
    pub seekbar_current_position: u64,
    /// Position as `m:ss`.
    pub seekbar_current_position_human: String,
    /// Playback progress in `0.0..=1.0`.
    pub state_percent: f64,
    /// Like state of the track.
    pub like_status: LikeStatus,
    /// Repeat mode.
    pub repeat_type: RepeatType,
}

/// Current track metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    /// Artists, `/`-separated.
    pub author: String,
    /// Track title.
    pub title: String,
    /// Album name.
    pub album: String,
    /// Cover image URL.
    pub cover: String,
    /// Duration in seconds.
    pub duration: u64,
    /// Duration as `m:ss`.
    pub duration_human: String,
    /// Track page URL.
    pub url: String,
    /// Track id.
    pub id: String,
    /// Whether the item is a video.
    pub is_video: bool,
    /// Whether the item is an advertisement.
    pub is_advertisement: bool,
    /// Whether the track is in the user's library.
    pub in_library: bool,
}

/// Answer payload of a `query` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Player state.
    pub player: PlayerInfo,
    /// Current track.
    pub track: TrackInfo,
}

impl PlayerSnapshot {
    /// Snapshot reported when nothing is playing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            player: PlayerInfo {
                has_song: false,
                is_paused: true,
                volume_percent: 0.0,
                seekbar_current_position: 0,
                seekbar_current_position_human: "0:00".into(),
                state_percent: 0.0,
                like_status: LikeStatus::Indifferent,
                repeat_type: RepeatType::None,
            },
            track: TrackInfo {
                author: String::new(),
                title: String::new(),
                album: String::new(),
                cover: String::new(),
                duration: 0,
                duration_human: "0:00".into(),
                url: String::new(),
                id: String::new(),
                is_video: false,
                is_advertisement: false,
                in_library: false,
            },
        }
    }
}

impl PlayerSnapshot {
    /// Fill in whichever of the `m:ss` labels and second counts is missing.
    ///
    /// Hosts writing a snapshot by hand often set only one of the pair.
    #[must_use]
    pub fn with_time_labels(mut self) -> Self {
        let track = &mut self.track;
        if track.duration_human.is_empty() {
            track.duration_human = format_time(track.duration);
        } else if track.duration == 0 {
            track.duration = parse_time_str(&track.duration_human).unwrap_or(0);
        }

        let player = &mut self.player;
        if player.seekbar_current_position_human.is_empty() {
            player.seekbar_current_position_human = format_time(player.seekbar_current_position);
        } else if player.seekbar_current_position == 0 {
            player.seekbar_current_position =
                parse_time_str(&player.seekbar_current_position_human).unwrap_or(0);
        }
        self
    }
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Source of the current playback snapshot.
pub trait Provider: Send + Sync {
    /// Snapshot to answer a `query` with.
    fn query(&self) -> PlayerSnapshot;
}

/// In-memory snapshot the host pushes updates into.
#[derive(Debug, Clone, Default)]
pub struct SharedSnapshot {
    current: Arc<RwLock<PlayerSnapshot>>,
}

impl SharedSnapshot {
    /// Replace the current snapshot.
    pub fn update(&self, snapshot: PlayerSnapshot) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

impl Provider for SharedSnapshot {
    fn query(&self) -> PlayerSnapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Reads the snapshot from a JSON file on every query.
///
/// A missing or unreadable file yields [`PlayerSnapshot::empty`]. The read
/// blocks, so async callers should go through `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    /// Serve snapshots from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Provider for FileProvider {
    fn query(&self) -> PlayerSnapshot {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, path = %self.path.display(), "snapshot file unreadable");
                return PlayerSnapshot::empty();
            }
        };
        match serde_json::from_str::<PlayerSnapshot>(&raw) {
            Ok(snapshot) => snapshot.with_time_labels(),
            Err(err) => {
                warn!(%err, path = %self.path.display(), "snapshot file is not a valid snapshot");
                PlayerSnapshot::empty()
            }
        }
    }
}

/// Parse an `m:ss` time label into seconds. Returns `None` if malformed.
#[must_use]
pub fn parse_time_str(time: &str) -> Option<u64> {
    let (min, sec) = time.trim().split_once(':')?;
    let min = min.parse::<u64>().ok()?;
    let sec = sec.parse::<u64>().ok()?;
    min.checked_mul(60)?.checked_add(sec)
}

/// Format seconds as an `m:ss` label.
#[must_use]
pub fn format_time(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// `name（alt）` using the first alternative name, or just `name`.
#[must_use]
pub fn format_name(name: &str, alternatives: &[&str]) -> String {
    match alternatives.first() {
        Some(alt) => format!("{name}（{alt}）"),
        None => name.to_owned(),
    }
}
