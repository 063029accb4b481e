//! In-memory [`Store`] behind a single `RwLock`
//!
//! The whole state is one serde struct so it can be snapshotted to disk
//! and restored on boot.

use super::{
    Favorite, FollowedChannel, HistoryEntry, NewProfile, PinChange, Preferences,
    PreferencesUpdate, Profile, ProfileId, ProfileUpdate, Session, SponsorBlockPrefs, Store,
    secret,
};
use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const APP_PASSWORD_KEY: &str = "app_password";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileRecord {
    id: ProfileId,
    name: String,
    #[serde(default)]
    pin_hash: Option<String>,
    #[serde(default)]
    avatar_color: String,
    #[serde(default)]
    avatar_emoji: String,
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    preferences: Preferences,
    #[serde(default)]
    sponsorblock: SponsorBlockPrefs,
}

impl ProfileRecord {
    fn view(&self) -> Profile {
        Profile {
            id: self.id,
            name: self.name.clone(),
            has_pin: self.pin_hash.is_some(),
            avatar_color: self.avatar_color.clone(),
            avatar_emoji: self.avatar_emoji.clone(),
            is_admin: self.is_admin,
            preferences: self.preferences.clone(),
            sponsorblock: self.sponsorblock.clone(),
        }
    }
}

/// Serializable store contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    sessions: HashMap<String, Session>,
    #[serde(default)]
    profiles: BTreeMap<ProfileId, ProfileRecord>,
    #[serde(default)]
    next_profile_id: ProfileId,
    #[serde(default)]
    settings: BTreeMap<String, String>,
    #[serde(default)]
    history: HashMap<ProfileId, Vec<HistoryEntry>>,
    #[serde(default)]
    favorites: HashMap<ProfileId, Vec<Favorite>>,
    #[serde(default)]
    channels: HashMap<ProfileId, Vec<FollowedChannel>>,
}

impl StoreData {
    fn name_taken(&self, name: &str, except: Option<ProfileId>) -> bool {
        self.profiles
            .values()
            .any(|p| Some(p.id) != except && p.name.eq_ignore_ascii_case(name))
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    items.skip(offset).take(limit).collect()
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously snapshotted contents
    pub fn from_data(data: StoreData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Copy of the current contents for snapshotting
    pub fn data(&self) -> StoreData {
        self.data.read().clone()
    }

    pub fn session_count(&self) -> usize {
        self.data.read().sessions.len()
    }
}

impl Store for MemoryStore {
    fn create_session(&self) -> Session {
        let session = Session {
            token: new_token(),
            profile_id: None,
            device_name: None,
            last_ip: None,
            created_at: Utc::now(),
        };
        self.data
            .write()
            .sessions
            .insert(session.token.clone(), session.clone());
        session
    }

    fn get_session(&self, token: &str) -> Option<Session> {
        self.data.read().sessions.get(token).cloned()
    }

    fn delete_session(&self, token: &str) {
        self.data.write().sessions.remove(token);
    }

    fn set_session_profile(&self, token: &str, profile_id: Option<ProfileId>) {
        if let Some(s) = self.data.write().sessions.get_mut(token) {
            s.profile_id = profile_id;
        }
    }

    fn set_session_device_name(&self, token: &str, name: &str) {
        if let Some(s) = self.data.write().sessions.get_mut(token) {
            s.device_name = Some(name.to_string());
        }
    }

    fn update_session_ip(&self, token: &str, ip: &str) {
        if let Some(s) = self.data.write().sessions.get_mut(token) {
            s.last_ip = Some(ip.to_string());
        }
    }

    fn clear_profile_from_sessions(&self, profile_id: ProfileId) {
        for s in self.data.write().sessions.values_mut() {
            if s.profile_id == Some(profile_id) {
                s.profile_id = None;
            }
        }
    }

    fn has_session_with_ip(&self, ip: &str) -> bool {
        self.data
            .read()
            .sessions
            .values()
            .any(|s| s.last_ip.as_deref() == Some(ip))
    }

    fn sessions_for_profile(&self, profile_id: ProfileId) -> Vec<Session> {
        self.data
            .read()
            .sessions
            .values()
            .filter(|s| s.profile_id == Some(profile_id))
            .cloned()
            .collect()
    }

    fn has_app_password(&self) -> bool {
        self.data.read().settings.contains_key(APP_PASSWORD_KEY)
    }

    fn set_app_password(&self, password: &str) {
        self.data
            .write()
            .settings
            .insert(APP_PASSWORD_KEY.to_string(), secret::hash_secret(password));
    }

    fn verify_app_password(&self, password: &str) -> bool {
        self.data
            .read()
            .settings
            .get(APP_PASSWORD_KEY)
            .is_some_and(|stored| secret::verify_secret(password, stored))
    }

    fn list_profiles(&self) -> Vec<Profile> {
        self.data.read().profiles.values().map(|p| p.view()).collect()
    }

    fn get_profile(&self, id: ProfileId) -> Option<Profile> {
        self.data.read().profiles.get(&id).map(|p| p.view())
    }

    fn create_profile(&self, profile: NewProfile) -> Result<Profile> {
        let mut data = self.data.write();
        if data.name_taken(&profile.name, None) {
            return Err(Error::conflict("Name already taken"));
        }
        data.next_profile_id += 1;
        let record = ProfileRecord {
            id: data.next_profile_id,
            name: profile.name,
            pin_hash: profile
                .pin
                .filter(|p| !p.is_empty())
                .map(|p| secret::hash_secret(&p)),
            avatar_color: profile.avatar_color,
            avatar_emoji: profile.avatar_emoji,
            // The first profile administers the instance
            is_admin: data.profiles.is_empty(),
            preferences: Preferences::default(),
            sponsorblock: SponsorBlockPrefs::default(),
        };
        let view = record.view();
        data.profiles.insert(record.id, record);
        Ok(view)
    }

    fn update_profile(&self, id: ProfileId, update: ProfileUpdate) -> Result<Option<Profile>> {
        let mut data = self.data.write();
        if let Some(name) = &update.name
            && data.name_taken(name, Some(id))
        {
            return Err(Error::conflict("Name already taken"));
        }
        let Some(record) = data.profiles.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(color) = update.avatar_color {
            record.avatar_color = color;
        }
        if let Some(emoji) = update.avatar_emoji {
            record.avatar_emoji = emoji;
        }
        match update.pin {
            PinChange::Keep => {}
            PinChange::Remove => record.pin_hash = None,
            PinChange::Set(pin) => record.pin_hash = Some(secret::hash_secret(&pin)),
        }
        Ok(Some(record.view()))
    }

    fn delete_profile(&self, id: ProfileId) -> bool {
        let mut data = self.data.write();
        data.history.remove(&id);
        data.favorites.remove(&id);
        data.channels.remove(&id);
        data.profiles.remove(&id).is_some()
    }

    fn verify_pin(&self, id: ProfileId, pin: &str) -> bool {
        self.data
            .read()
            .profiles
            .get(&id)
            .and_then(|p| p.pin_hash.as_deref())
            .is_some_and(|stored| secret::verify_secret(pin, stored))
    }

    fn update_preferences(&self, id: ProfileId, update: PreferencesUpdate) {
        if let Some(record) = self.data.write().profiles.get_mut(&id) {
            if let Some(quality) = update.quality {
                record.preferences.quality = quality;
            }
            if let Some(lang) = update.subtitle_lang {
                record.preferences.subtitle_lang = lang;
            }
            if let Some(mode) = update.cookie_mode {
                record.preferences.cookie_mode = mode;
            }
        }
    }

    fn update_sponsorblock(&self, id: ProfileId, prefs: SponsorBlockPrefs) {
        if let Some(record) = self.data.write().profiles.get_mut(&id) {
            record.sponsorblock = prefs;
        }
    }

    fn get_setting(&self, key: &str) -> Option<String> {
        self.data.read().settings.get(key).cloned()
    }

    fn set_setting(&self, key: &str, value: Option<&str>) {
        let mut data = self.data.write();
        match value {
            Some(v) => {
                data.settings.insert(key.to_string(), v.to_string());
            }
            None => {
                data.settings.remove(key);
            }
        }
    }

    fn save_position(&self, profile_id: ProfileId, mut entry: HistoryEntry) {
        let mut data = self.data.write();
        let rows = data.history.entry(profile_id).or_default();
        entry.updated_at = Some(Utc::now());
        if let Some(pos) = rows.iter().position(|r| r.video_id == entry.video_id) {
            let old = rows.remove(pos);
            // Position-only saves keep the metadata already recorded
            if entry.title.is_empty() {
                entry.title = old.title;
            }
            if entry.channel.is_empty() {
                entry.channel = old.channel;
            }
            if entry.thumbnail.is_empty() {
                entry.thumbnail = old.thumbnail;
            }
            if entry.duration == 0 {
                entry.duration = old.duration;
            }
            if entry.duration_str.is_empty() {
                entry.duration_str = old.duration_str;
            }
        }
        // Most recent first
        rows.insert(0, entry);
    }

    fn get_position(&self, profile_id: ProfileId, video_id: &str) -> Option<f64> {
        self.data
            .read()
            .history
            .get(&profile_id)?
            .iter()
            .find(|r| r.video_id == video_id)
            .map(|r| r.position)
    }

    fn watch_history(
        &self,
        profile_id: ProfileId,
        limit: usize,
        offset: usize,
    ) -> Vec<HistoryEntry> {
        let data = self.data.read();
        match data.history.get(&profile_id) {
            Some(rows) => page(rows.iter().cloned(), limit, offset),
            None => Vec::new(),
        }
    }

    fn delete_history_entry(&self, profile_id: ProfileId, video_id: &str) {
        if let Some(rows) = self.data.write().history.get_mut(&profile_id) {
            rows.retain(|r| r.video_id != video_id);
        }
    }

    fn clear_history(&self, profile_id: ProfileId) {
        self.data.write().history.remove(&profile_id);
    }

    fn add_favorite(&self, profile_id: ProfileId, mut favorite: Favorite) {
        let mut data = self.data.write();
        let rows = data.favorites.entry(profile_id).or_default();
        rows.retain(|f| f.video_id != favorite.video_id);
        favorite.created_at = Some(Utc::now());
        rows.insert(0, favorite);
    }

    fn remove_favorite(&self, profile_id: ProfileId, video_id: &str) {
        if let Some(rows) = self.data.write().favorites.get_mut(&profile_id) {
            rows.retain(|f| f.video_id != video_id);
        }
    }

    fn favorites(
        &self,
        profile_id: ProfileId,
        limit: usize,
        offset: usize,
        item_type: Option<&str>,
    ) -> Vec<Favorite> {
        let data = self.data.read();
        match data.favorites.get(&profile_id) {
            Some(rows) => page(
                rows.iter()
                    .filter(|f| item_type.is_none_or(|t| f.item_type == t))
                    .cloned(),
                limit,
                offset,
            ),
            None => Vec::new(),
        }
    }

    fn is_favorite(&self, profile_id: ProfileId, video_id: &str) -> bool {
        self.data
            .read()
            .favorites
            .get(&profile_id)
            .is_some_and(|rows| rows.iter().any(|f| f.video_id == video_id))
    }

    fn clear_favorites(&self, profile_id: ProfileId) {
        self.data.write().favorites.remove(&profile_id);
    }

    fn follow_channel(&self, profile_id: ProfileId, mut channel: FollowedChannel) {
        let mut data = self.data.write();
        let rows = data.channels.entry(profile_id).or_default();
        rows.retain(|c| c.channel_id != channel.channel_id);
        channel.followed_at = Some(Utc::now());
        rows.insert(0, channel);
    }

    fn unfollow_channel(&self, profile_id: ProfileId, channel_id: &str) {
        if let Some(rows) = self.data.write().channels.get_mut(&profile_id) {
            rows.retain(|c| c.channel_id != channel_id);
        }
    }

    fn followed_channels(&self, profile_id: ProfileId) -> Vec<FollowedChannel> {
        self.data
            .read()
            .channels
            .get(&profile_id)
            .cloned()
            .unwrap_or_default()
    }

    fn is_following(&self, profile_id: ProfileId, channel_id: &str) -> bool {
        self.data
            .read()
            .channels
            .get(&profile_id)
            .is_some_and(|rows| rows.iter().any(|c| c.channel_id == channel_id))
    }

    fn clear_followed_channels(&self, profile_id: ProfileId) {
        self.data.write().channels.remove(&profile_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile(name: &str, pin: Option<&str>) -> NewProfile {
        NewProfile {
            name: name.to_string(),
            pin: pin.map(str::to_string),
            avatar_color: "#cc0000".to_string(),
            avatar_emoji: String::new(),
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let store = MemoryStore::new();
        let session = store.create_session();
        assert!(session.token.len() >= 43);
        assert_eq!(store.get_session(&session.token).unwrap().profile_id, None);

        store.set_session_profile(&session.token, Some(3));
        store.update_session_ip(&session.token, "10.0.0.5");
        assert!(store.has_session_with_ip("10.0.0.5"));
        assert_eq!(store.sessions_for_profile(3).len(), 1);

        store.clear_profile_from_sessions(3);
        assert_eq!(store.get_session(&session.token).unwrap().profile_id, None);

        store.delete_session(&session.token);
        assert!(store.get_session(&session.token).is_none());
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = MemoryStore::new();
        assert_ne!(store.create_session().token, store.create_session().token);
    }

    #[test]
    fn test_first_profile_is_admin_and_names_unique() {
        let store = MemoryStore::new();
        let first = store.create_profile(profile("Parent", None)).unwrap();
        let second = store.create_profile(profile("Kid", Some("1234"))).unwrap();
        assert!(first.is_admin);
        assert!(!second.is_admin);
        assert!(second.has_pin);

        let dup = store.create_profile(profile("parent", None));
        assert!(matches!(dup, Err(Error::Conflict { .. })));
    }

    #[test]
    fn test_pin_tri_state_update() {
        let store = MemoryStore::new();
        let p = store.create_profile(profile("Kid", Some("1234"))).unwrap();
        assert!(store.verify_pin(p.id, "1234"));
        assert!(!store.verify_pin(p.id, "0000"));

        let kept = store
            .update_profile(p.id, ProfileUpdate::default())
            .unwrap()
            .unwrap();
        assert!(kept.has_pin);

        let changed = store
            .update_profile(
                p.id,
                ProfileUpdate {
                    pin: PinChange::Set("9999".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(changed.has_pin);
        assert!(store.verify_pin(p.id, "9999"));

        let removed = store
            .update_profile(
                p.id,
                ProfileUpdate {
                    pin: PinChange::Remove,
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(!removed.has_pin);
        assert!(store.update_profile(999, ProfileUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn test_app_password() {
        let store = MemoryStore::new();
        assert!(!store.has_app_password());
        assert!(!store.verify_app_password("anything"));
        store.set_app_password("secret");
        assert!(store.has_app_password());
        assert!(store.verify_app_password("secret"));
        assert!(!store.verify_app_password("Secret"));
        // The digest, not the password, is what gets stored
        assert_ne!(store.get_setting("app_password").unwrap(), "secret");
    }

    #[test]
    fn test_history_upsert_keeps_metadata() {
        let store = MemoryStore::new();
        store.save_position(
            1,
            HistoryEntry {
                video_id: "a".into(),
                position: 42.0,
                title: "Title A".into(),
                duration: 300,
                ..Default::default()
            },
        );
        store.save_position(
            1,
            HistoryEntry {
                video_id: "b".into(),
                position: 10.0,
                ..Default::default()
            },
        );
        store.save_position(
            1,
            HistoryEntry {
                video_id: "a".into(),
                position: 0.0,
                ..Default::default()
            },
        );

        let rows = store.watch_history(1, 50, 0);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].video_id, "a");
        assert_eq!(rows[0].title, "Title A");
        assert_eq!(rows[0].duration, 300);
        assert_eq!(store.get_position(1, "a"), Some(0.0));
        assert_eq!(store.watch_history(1, 1, 1)[0].video_id, "b");

        store.delete_history_entry(1, "a");
        assert_eq!(store.get_position(1, "a"), None);
    }

    #[test]
    fn test_favorites_filter_and_channels() {
        let store = MemoryStore::new();
        store.add_favorite(
            1,
            Favorite {
                video_id: "v1".into(),
                item_type: "video".into(),
                ..Default::default()
            },
        );
        store.add_favorite(
            1,
            Favorite {
                video_id: "PL1".into(),
                item_type: "playlist".into(),
                ..Default::default()
            },
        );
        assert_eq!(store.favorites(1, 50, 0, None).len(), 2);
        assert_eq!(store.favorites(1, 50, 0, Some("playlist"))[0].video_id, "PL1");
        assert!(store.is_favorite(1, "v1"));
        assert!(!store.is_favorite(2, "v1"));

        store.follow_channel(
            1,
            FollowedChannel {
                channel_id: "UC1".into(),
                channel_name: "Chan".into(),
                ..Default::default()
            },
        );
        assert!(store.is_following(1, "UC1"));
        store.unfollow_channel(1, "UC1");
        assert!(store.followed_channels(1).is_empty());
    }

    #[test]
    fn test_delete_profile_drops_its_rows() {
        let store = MemoryStore::new();
        let p = store.create_profile(profile("Gone", None)).unwrap();
        store.save_position(
            p.id,
            HistoryEntry {
                video_id: "x".into(),
                position: 12.0,
                ..Default::default()
            },
        );
        assert!(store.delete_profile(p.id));
        assert!(store.watch_history(p.id, 10, 0).is_empty());
        assert!(!store.delete_profile(p.id));
    }

    #[test]
    fn test_snapshot_data_round_trip() {
        let store = MemoryStore::new();
        let p = store.create_profile(profile("Parent", Some("4321"))).unwrap();
        store.set_app_password("pw");

        let json = serde_json::to_string(&store.data()).unwrap();
        let restored = MemoryStore::from_data(serde_json::from_str(&json).unwrap());
        assert!(restored.verify_app_password("pw"));
        assert!(restored.verify_pin(p.id, "4321"));
        let next = restored.create_profile(profile("Second", None)).unwrap();
        assert_eq!(next.id, p.id + 1);
    }
}
