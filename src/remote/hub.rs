//! Remote-control hub
//!
//! Every WebSocket connection registers under its session token. A remote
//! pairs with one target of the same profile; the target's state is fanned
//! out to all remotes paired with it, and the hub persists the target's
//! playback position along the way.
//!
//! Devices are addressed by a truncated SHA-256 of their token, so peers
//! never see each other's credentials.

use super::messages::{ClientMessage, PlayerState, ServerMessage};
use crate::store::{HistoryEntry, ProfileId, Store};
use crate::utils::format_duration;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Identifies one physical connection; a reconnect gets a new id
pub type ConnId = u64;

/// Close code sent when a socket lacks a profile-bound session
pub const CLOSE_NO_SESSION: u16 = 4001;

const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Stable, non-reversible device id for a session token
pub fn device_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Connected device as listed to a remote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub has_state: bool,
}

#[derive(Debug)]
struct Connection {
    id: ConnId,
    profile_id: ProfileId,
    device_name: Option<String>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    state: Option<PlayerState>,
    last_save: Option<Instant>,
}

impl Connection {
    fn send(&self, message: ServerMessage) {
        // A closed receiver means the socket is already going away
        let _ = self.tx.send(message);
    }
}

#[derive(Debug, Default)]
struct HubState {
    next_id: ConnId,
    connections: HashMap<String, Connection>,
    /// remote token -> target token
    pairings: HashMap<String, String>,
}

impl HubState {
    fn send_to(&self, token: &str, message: ServerMessage) {
        if let Some(conn) = self.connections.get(token) {
            conn.send(message);
        }
    }
}

/// What the position policy decides to write for a state
fn position_to_save(state: &PlayerState) -> Option<f64> {
    let current = state.current_time.filter(|t| *t > 0.0)?;
    let duration = state.duration.unwrap_or(0.0);
    if duration > 0.0 && (current > duration - 30.0 || current / duration > 0.95) {
        return Some(0.0);
    }
    (current > 5.0).then(|| (current * 10.0).round() / 10.0)
}

/// Connection registry and pairing table
pub struct RemoteHub {
    store: Arc<dyn Store>,
    save_interval: Duration,
    state: Mutex<HubState>,
}

impl RemoteHub {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_save_interval(store, DEFAULT_SAVE_INTERVAL)
    }

    pub fn with_save_interval(store: Arc<dyn Store>, save_interval: Duration) -> Self {
        Self {
            store,
            save_interval,
            state: Mutex::new(HubState::default()),
        }
    }

    /// Register a connection for `token`, replacing any previous one
    pub fn register(
        &self,
        token: &str,
        profile_id: ProfileId,
        device_name: Option<String>,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.state.lock();
        hub.next_id += 1;
        let id = hub.next_id;
        hub.connections.insert(
            token.to_string(),
            Connection {
                id,
                profile_id,
                device_name,
                tx,
                state: None,
                last_save: None,
            },
        );
        info!(
            "WebSocket connected: device={} profile={}",
            device_id(token),
            profile_id
        );
        (id, rx)
    }

    /// Process one frame from `token`
    pub fn handle(&self, token: &str, message: ClientMessage) {
        let mut hub = self.state.lock();
        if !hub.connections.contains_key(token) {
            return;
        }
        match message {
            ClientMessage::Pair { device_id } => self.pair(&mut hub, token, &device_id),
            ClientMessage::Unpair => {
                if let Some(target) = hub.pairings.remove(token) {
                    hub.send_to(&target, ServerMessage::RemoteDisconnected);
                }
            }
            ClientMessage::Command { payload } => Self::command(&mut hub, token, payload),
            ClientMessage::State(state) => self.update_state(&mut hub, token, state),
        }
    }

    fn pair(&self, hub: &mut HubState, remote: &str, wanted: &str) {
        let Some(profile_id) = hub.connections.get(remote).map(|c| c.profile_id) else {
            return;
        };
        let target = hub
            .connections
            .iter()
            .find(|(t, c)| c.profile_id == profile_id && device_id(t) == wanted)
            .map(|(t, _)| t.clone());
        let Some(target) = target else {
            hub.send_to(remote, ServerMessage::error("Device not found or offline"));
            return;
        };

        if let Some(old) = hub.pairings.insert(remote.to_string(), target.clone())
            && old != target
        {
            hub.send_to(&old, ServerMessage::RemoteDisconnected);
        }

        let (target_name, target_state) = hub
            .connections
            .get(&target)
            .map(|c| (c.device_name.clone(), c.state.clone()))
            .unwrap_or_default();
        let remote_name = hub
            .connections
            .get(remote)
            .and_then(|c| c.device_name.clone());

        hub.send_to(
            remote,
            ServerMessage::Paired {
                device_name: target_name.unwrap_or_else(|| "Device".to_string()),
                state: target_state,
            },
        );
        hub.send_to(
            &target,
            ServerMessage::RemoteConnected {
                remote_name: remote_name.unwrap_or_else(|| "Remote".to_string()),
            },
        );
        debug!("Paired {} -> {}", device_id(remote), device_id(&target));
    }

    fn command(hub: &mut HubState, remote: &str, payload: Map<String, Value>) {
        let Some(target) = hub.pairings.get(remote).cloned() else {
            hub.send_to(remote, ServerMessage::error("Not paired with any device"));
            return;
        };
        match hub.connections.get(&target) {
            Some(conn) => conn.send(ServerMessage::Command { payload }),
            None => {
                hub.pairings.remove(remote);
                hub.send_to(remote, ServerMessage::TargetDisconnected);
            }
        }
    }

    fn update_state(&self, hub: &mut HubState, token: &str, state: PlayerState) {
        let Some(conn) = hub.connections.get_mut(token) else {
            return;
        };

        // A new video is the last chance to save the old one's position
        if let Some(old) = conn.state.take()
            && let Some(old_video) = old.video()
            && Some(old_video) != state.video()
        {
            conn.last_save = None;
            self.save_position(conn, &old);
        }
        self.save_position(conn, &state);
        conn.state = Some(state.clone());

        for (remote, target) in &hub.pairings {
            if target == token {
                hub.send_to(remote, ServerMessage::State(state.clone()));
            }
        }
    }

    /// Persist the position carried by `state`, at most once per interval
    fn save_position(&self, conn: &mut Connection, state: &PlayerState) {
        let Some(video_id) = state.video() else {
            return;
        };
        let Some(position) = position_to_save(state) else {
            return;
        };
        let now = Instant::now();
        if conn
            .last_save
            .is_some_and(|last| now.duration_since(last) < self.save_interval)
        {
            return;
        }
        conn.last_save = Some(now);

        let entry = if position == 0.0 {
            HistoryEntry {
                video_id: video_id.to_string(),
                position,
                ..Default::default()
            }
        } else {
            let duration = state.duration.unwrap_or(0.0).max(0.0) as u64;
            HistoryEntry {
                video_id: video_id.to_string(),
                position,
                title: state.title.clone().unwrap_or_default(),
                channel: state.channel.clone().unwrap_or_default(),
                thumbnail: state.thumbnail.clone().unwrap_or_default(),
                duration,
                duration_str: if duration > 0 {
                    format_duration(Some(duration as f64))
                } else {
                    String::new()
                },
                updated_at: None,
            }
        };
        self.store.save_position(conn.profile_id, entry);
    }

    /// Tear down `token` if `conn_id` is still its current connection
    ///
    /// Returns false when a newer connection already replaced it.
    pub fn disconnect(&self, token: &str, conn_id: ConnId) -> bool {
        let mut hub = self.state.lock();
        match hub.connections.get(token) {
            Some(conn) if conn.id == conn_id => {}
            _ => {
                info!("WebSocket replaced (reconnect), skipping cleanup");
                return false;
            }
        }

        if let Some(mut conn) = hub.connections.remove(token) {
            if let Some(state) = conn.state.take() {
                conn.last_save = None;
                self.save_position(&mut conn, &state);
            }
        }
        info!("WebSocket disconnected: device={}", device_id(token));

        let remotes: Vec<String> = hub
            .pairings
            .iter()
            .filter(|(_, target)| *target == token)
            .map(|(remote, _)| remote.clone())
            .collect();
        for remote in remotes {
            hub.pairings.remove(&remote);
            hub.send_to(&remote, ServerMessage::TargetDisconnected);
        }

        if let Some(target) = hub.pairings.remove(token) {
            hub.send_to(&target, ServerMessage::RemoteDisconnected);
        }
        true
    }

    /// Devices of `profile_id` other than `own_token` that are not acting as remotes
    pub fn devices(&self, profile_id: ProfileId, own_token: &str) -> Vec<DeviceInfo> {
        let hub = self.state.lock();
        let mut devices: Vec<DeviceInfo> = hub
            .connections
            .iter()
            .filter(|(token, conn)| {
                conn.profile_id == profile_id
                    && token.as_str() != own_token
                    && !hub.pairings.contains_key(token.as_str())
            })
            .map(|(token, conn)| DeviceInfo {
                device_id: device_id(token),
                device_name: conn
                    .device_name
                    .clone()
                    .unwrap_or_else(|| "Unknown Device".to_string()),
                has_state: conn.state.is_some(),
            })
            .collect();
        devices.sort_by(|a, b| a.device_name.cmp(&b.device_name));
        devices
    }

    /// Update the cached device name of a live connection
    pub fn rename(&self, token: &str, name: &str) {
        if let Some(conn) = self.state.lock().connections.get_mut(token) {
            conn.device_name = Some(name.to_string());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewProfile};
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: RemoteHub,
        profile: ProfileId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let profile = store
            .create_profile(NewProfile {
                name: "Home".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id;
        let hub = RemoteHub::new(store.clone());
        Fixture {
            store,
            hub,
            profile,
        }
    }

    fn state(video: &str, current: f64, duration: f64) -> ClientMessage {
        ClientMessage::State(PlayerState {
            video_id: Some(video.to_string()),
            current_time: Some(current),
            duration: Some(duration),
            title: Some("Title".to_string()),
            ..Default::default()
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_device_id_is_stable_and_short() {
        let id = device_id("token-a");
        assert_eq!(id.len(), 12);
        assert_eq!(id, device_id("token-a"));
        assert_ne!(id, device_id("token-b"));
        assert!(!id.contains("token"));
    }

    #[test]
    fn test_position_policy() {
        let near_end = PlayerState {
            current_time: Some(295.0),
            duration: Some(300.0),
            ..Default::default()
        };
        assert_eq!(position_to_save(&near_end), Some(0.0));

        let early = PlayerState {
            current_time: Some(3.0),
            duration: Some(300.0),
            ..Default::default()
        };
        assert_eq!(position_to_save(&early), None);

        let middle = PlayerState {
            current_time: Some(120.44),
            duration: Some(300.0),
            ..Default::default()
        };
        assert_eq!(position_to_save(&middle), Some(120.4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_and_forward() {
        let f = fixture();
        let (_, mut tv_rx) = f.hub.register("tv", f.profile, Some("Living Room".to_string()));
        let (_, mut phone_rx) = f.hub.register("phone", f.profile, Some("Phone".to_string()));

        f.hub.handle("tv", state("v1", 60.0, 600.0));
        f.hub.handle(
            "phone",
            ClientMessage::Pair {
                device_id: device_id("tv"),
            },
        );

        let paired = drain(&mut phone_rx);
        match &paired[..] {
            [ServerMessage::Paired { device_name, state }] => {
                assert_eq!(device_name, "Living Room");
                assert_eq!(state.as_ref().and_then(|s| s.video()), Some("v1"));
            }
            other => panic!("unexpected frames: {other:?}"),
        }
        assert_eq!(
            drain(&mut tv_rx),
            vec![ServerMessage::RemoteConnected {
                remote_name: "Phone".to_string()
            }]
        );

        let mut payload = Map::new();
        payload.insert("action".to_string(), json!("pause"));
        f.hub.handle("phone", ClientMessage::Command { payload: payload.clone() });
        assert_eq!(drain(&mut tv_rx), vec![ServerMessage::Command { payload }]);

        f.hub.handle("tv", state("v1", 70.0, 600.0));
        assert!(matches!(&drain(&mut phone_rx)[..], [ServerMessage::State(_)]));

        // Paired remotes are not offered as targets
        assert!(f.hub.devices(f.profile, "tv").is_empty());
        assert_eq!(f.hub.devices(f.profile, "phone")[0].device_id, device_id("tv"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_is_profile_scoped() {
        let f = fixture();
        let other = f
            .store
            .create_profile(NewProfile {
                name: "Guest".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id;
        let (_, _tv_rx) = f.hub.register("tv", other, None);
        let (_, mut phone_rx) = f.hub.register("phone", f.profile, None);

        f.hub.handle(
            "phone",
            ClientMessage::Pair {
                device_id: device_id("tv"),
            },
        );
        assert_eq!(
            drain(&mut phone_rx),
            vec![ServerMessage::error("Device not found or offline")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_end_saves_zero() {
        let f = fixture();
        let (_, _rx) = f.hub.register("tv", f.profile, None);
        f.hub.handle("tv", state("v1", 295.0, 300.0));
        assert_eq!(f.store.get_position(f.profile, "v1"), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_saves_are_throttled_but_video_change_flushes() {
        let f = fixture();
        let (_, _rx) = f.hub.register("tv", f.profile, None);

        f.hub.handle("tv", state("v1", 10.0, 600.0));
        f.hub.handle("tv", state("v1", 12.0, 600.0));
        assert_eq!(f.store.get_position(f.profile, "v1"), Some(10.0));

        tokio::time::advance(Duration::from_secs(1)).await;
        f.hub.handle("tv", state("v2", 8.0, 600.0));
        assert_eq!(f.store.get_position(f.profile, "v1"), Some(12.0));

        tokio::time::advance(Duration::from_secs(6)).await;
        f.hub.handle("tv", state("v2", 30.0, 600.0));
        assert_eq!(f.store.get_position(f.profile, "v2"), Some(30.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_race_keeps_new_connection() {
        let f = fixture();
        let (old, _old_rx) = f.hub.register("tv", f.profile, None);
        let (new, _new_rx) = f.hub.register("tv", f.profile, None);
        assert_ne!(old, new);

        assert!(!f.hub.disconnect("tv", old));
        assert_eq!(f.hub.connection_count(), 1);

        assert!(f.hub.disconnect("tv", new));
        assert_eq!(f.hub.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_notifies_peers_and_flushes() {
        let f = fixture();
        let (tv, _tv_rx) = f.hub.register("tv", f.profile, None);
        let (_, mut phone_rx) = f.hub.register("phone", f.profile, None);
        f.hub.handle(
            "phone",
            ClientMessage::Pair {
                device_id: device_id("tv"),
            },
        );
        f.hub.handle("tv", state("v1", 10.0, 600.0));
        f.hub.handle("tv", state("v1", 11.0, 600.0));
        drain(&mut phone_rx);

        assert!(f.hub.disconnect("tv", tv));
        assert_eq!(drain(&mut phone_rx), vec![ServerMessage::TargetDisconnected]);
        assert_eq!(f.store.get_position(f.profile, "v1"), Some(11.0));

        let mut payload = Map::new();
        payload.insert("action".to_string(), json!("play"));
        f.hub.handle("phone", ClientMessage::Command { payload });
        assert_eq!(
            drain(&mut phone_rx),
            vec![ServerMessage::error("Not paired with any device")]
        );
    }
}
