//! Persistent state: sessions, profiles, history, favorites, settings
//!
//! The relay only ever talks to storage through [`Store`], a fixed set of
//! get/set/delete operations. [`MemoryStore`] is the shipped engine, with
//! an optional JSON snapshot on disk.

pub mod memory;
pub mod records;
pub mod secret;
pub mod snapshot;

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use records::{RegisteredTv, SponsorBlockPrefs};
pub use snapshot::SnapshotFile;

/// Profile identifier
pub type ProfileId = i64;

/// A device session; the token is the only credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub last_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_quality() -> u32 {
    1080
}

fn default_cookie_mode() -> String {
    "auto".to_string()
}

/// Per-profile playback preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default)]
    pub subtitle_lang: String,
    #[serde(default = "default_cookie_mode")]
    pub cookie_mode: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            subtitle_lang: String::new(),
            cookie_mode: default_cookie_mode(),
        }
    }
}

/// Public view of a profile; the PIN digest never leaves the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub has_pin: bool,
    pub avatar_color: String,
    pub avatar_emoji: String,
    pub is_admin: bool,
    pub preferences: Preferences,
    pub sponsorblock: SponsorBlockPrefs,
}

/// Fields for a new profile
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub name: String,
    pub pin: Option<String>,
    pub avatar_color: String,
    pub avatar_emoji: String,
}

/// PIN change carried by a profile update
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PinChange {
    #[default]
    Keep,
    Remove,
    Set(String),
}

/// Partial profile update; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar_color: Option<String>,
    pub avatar_emoji: Option<String>,
    pub pin: PinChange,
}

/// Partial preferences update; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct PreferencesUpdate {
    pub quality: Option<u32>,
    pub subtitle_lang: Option<String>,
    pub cookie_mode: Option<String>,
}

/// Watch history row, upserted by video id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub video_id: String,
    pub position: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub duration_str: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Favorite item; `item_type` is video, playlist, mix or live
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub duration_str: String,
    pub item_type: String,
    #[serde(default)]
    pub playlist_id: String,
    #[serde(default)]
    pub first_video_id: String,
    #[serde(default)]
    pub video_count: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Followed channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowedChannel {
    pub channel_id: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub followed_at: Option<DateTime<Utc>>,
}

/// Fixed operation set the relay uses against storage
pub trait Store: Send + Sync {
    // Sessions
    fn create_session(&self) -> Session;
    fn get_session(&self, token: &str) -> Option<Session>;
    fn delete_session(&self, token: &str);
    fn set_session_profile(&self, token: &str, profile_id: Option<ProfileId>);
    fn set_session_device_name(&self, token: &str, name: &str);
    fn update_session_ip(&self, token: &str, ip: &str);
    fn clear_profile_from_sessions(&self, profile_id: ProfileId);
    fn has_session_with_ip(&self, ip: &str) -> bool;
    fn sessions_for_profile(&self, profile_id: ProfileId) -> Vec<Session>;

    // App password
    fn has_app_password(&self) -> bool;
    fn set_app_password(&self, password: &str);
    fn verify_app_password(&self, password: &str) -> bool;

    // Profiles
    fn list_profiles(&self) -> Vec<Profile>;
    fn get_profile(&self, id: ProfileId) -> Option<Profile>;
    /// Fails with a conflict when the name is taken
    fn create_profile(&self, profile: NewProfile) -> Result<Profile>;
    /// `Ok(None)` when the profile does not exist
    fn update_profile(&self, id: ProfileId, update: ProfileUpdate) -> Result<Option<Profile>>;
    fn delete_profile(&self, id: ProfileId) -> bool;
    fn verify_pin(&self, id: ProfileId, pin: &str) -> bool;
    fn update_preferences(&self, id: ProfileId, update: PreferencesUpdate);
    fn update_sponsorblock(&self, id: ProfileId, prefs: SponsorBlockPrefs);

    // Raw settings; `None` deletes
    fn get_setting(&self, key: &str) -> Option<String>;
    fn set_setting(&self, key: &str, value: Option<&str>);

    // Watch history
    fn save_position(&self, profile_id: ProfileId, entry: HistoryEntry);
    fn get_position(&self, profile_id: ProfileId, video_id: &str) -> Option<f64>;
    fn watch_history(&self, profile_id: ProfileId, limit: usize, offset: usize)
    -> Vec<HistoryEntry>;
    fn delete_history_entry(&self, profile_id: ProfileId, video_id: &str);
    fn clear_history(&self, profile_id: ProfileId);

    // Favorites
    fn add_favorite(&self, profile_id: ProfileId, favorite: Favorite);
    fn remove_favorite(&self, profile_id: ProfileId, video_id: &str);
    fn favorites(
        &self,
        profile_id: ProfileId,
        limit: usize,
        offset: usize,
        item_type: Option<&str>,
    ) -> Vec<Favorite>;
    fn is_favorite(&self, profile_id: ProfileId, video_id: &str) -> bool;
    fn clear_favorites(&self, profile_id: ProfileId);

    // Followed channels
    fn follow_channel(&self, profile_id: ProfileId, channel: FollowedChannel);
    fn unfollow_channel(&self, profile_id: ProfileId, channel_id: &str);
    fn followed_channels(&self, profile_id: ProfileId) -> Vec<FollowedChannel>;
    fn is_following(&self, profile_id: ProfileId, channel_id: &str) -> bool;
    fn clear_followed_channels(&self, profile_id: ProfileId);
}
