//! Remote-control WebSocket and device management

use crate::{
    Error, Result,
    remote::{CLOSE_NO_SESSION, ClientMessage, DeviceInfo},
    server::{
        app::AppState,
        extract::{AdminSession, ProfileSession, RequestContext},
    },
    types::request::RenameDeviceRequest,
};
use axum::{
    Json,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::debug;

const MAX_DEVICE_NAME_CHARS: usize = 50;

/// Accept, then close with `reason`: browsers only surface close codes
/// of sockets that were opened
async fn reject(mut socket: WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: CLOSE_NO_SESSION,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// GET /api/ws
pub async fn websocket(
    State(state): State<AppState>,
    ctx: RequestContext,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = ctx.token.clone() else {
        return ws.on_upgrade(|socket| reject(socket, "No session"));
    };
    let Some((profile_id, device_name)) = ctx
        .session
        .as_ref()
        .and_then(|s| s.profile_id.map(|pid| (pid, s.device_name.clone())))
    else {
        return ws.on_upgrade(|socket| reject(socket, "Invalid session"));
    };

    ws.on_upgrade(move |socket| async move {
        let (conn_id, mut rx) = state.hub.register(&token, profile_id, device_name);
        let (mut sender, mut receiver) = socket.split();

        let mut send_task: JoinHandle<()> = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sender.send(Message::Text(message.to_json().into())).await.is_err() {
                    break;
                }
            }
        });

        let hub = state.hub.clone();
        let recv_token = token.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                match message {
                    Message::Text(text) => match ClientMessage::parse(text.as_str()) {
                        Some(message) => hub.handle(&recv_token, message),
                        None => debug!("Ignoring malformed remote frame"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = (&mut send_task) => recv_task.abort(),
            _ = (&mut recv_task) => send_task.abort(),
        }
        state.hub.disconnect(&token, conn_id);
    })
}

/// Other devices of this profile that can be remote-controlled
///
/// GET /api/remote/devices
pub async fn devices(
    State(state): State<AppState>,
    session: ProfileSession,
) -> Json<Vec<DeviceInfo>> {
    let own = session.ctx.token.as_deref().unwrap_or_default();
    Json(state.hub.devices(session.profile_id, own))
}

/// Name this device as it appears to remotes
///
/// POST /api/remote/rename
pub async fn rename(
    State(state): State<AppState>,
    AdminSession { ctx, .. }: AdminSession,
    Json(req): Json<RenameDeviceRequest>,
) -> Result<Json<Value>> {
    let token = ctx
        .token
        .ok_or_else(|| Error::validation("session", "No session"))?;
    let name = req.device_name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_DEVICE_NAME_CHARS {
        return Err(Error::validation(
            "device_name",
            format!("Device name must be 1-{} characters", MAX_DEVICE_NAME_CHARS),
        ));
    }
    state.store.set_session_device_name(&token, name);
    state.hub.rename(&token, name);
    Ok(Json(json!({ "ok": true, "device_name": name })))
}
