//! Request extractors for the auth gates
//!
//! Every gate first asks whether an app password exists at all. Without
//! one the instance is in first-run mode and only profile-scoped routes
//! still need a selected profile.

use super::app::AppState;
use crate::{
    Error,
    auth::{client_ip, read_cookie},
    store::{Profile, ProfileId, Session, records::ALLOW_EMBED_KEY},
};
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::net::SocketAddr;

/// Session cookie and client address of a request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Raw cookie value, valid or not
    pub token: Option<String>,
    /// Stored session behind the cookie
    pub session: Option<Session>,
    pub ip: String,
}

impl RequestContext {
    pub fn profile_id(&self) -> Option<ProfileId> {
        self.session.as_ref().and_then(|s| s.profile_id)
    }
}

fn context(parts: &Parts, state: &AppState) -> RequestContext {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(&parts.headers, peer, state.settings.server.trust_forwarded_for);
    let token = read_cookie(&parts.headers, &state.settings.server.cookie_name);
    let session = token.as_deref().and_then(|t| state.store.get_session(t));
    if let Some(session) = &session {
        state.ip_buffer.record(&session.token, &ip);
    }
    RequestContext { token, session, ip }
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(context(parts, state))
    }
}

/// Password gate: a valid session, or no password configured
#[derive(Debug, Clone)]
pub struct Authenticated(pub RequestContext);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = context(parts, state);
        if ctx.session.is_some() || !state.store.has_app_password() {
            Ok(Self(ctx))
        } else {
            Err(Error::Unauthorized)
        }
    }
}

/// Password gate that also admits known IPs when embedding is enabled
///
/// Used by the media routes an embedded player on a logged-in household
/// device calls without a cookie.
#[derive(Debug, Clone)]
pub struct EmbedAuthenticated(pub RequestContext);

impl FromRequestParts<AppState> for EmbedAuthenticated {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = context(parts, state);
        if ctx.session.is_some() || !state.store.has_app_password() {
            return Ok(Self(ctx));
        }
        if embed_allowed(state) && state.store.has_session_with_ip(&ctx.ip) {
            return Ok(Self(ctx));
        }
        Err(Error::Unauthorized)
    }
}

/// Whether unauthenticated embed pages are switched on
pub fn embed_allowed(state: &AppState) -> bool {
    state.store.get_setting(ALLOW_EMBED_KEY).as_deref() == Some("1")
}

/// Password gate plus a selected profile
#[derive(Debug, Clone)]
pub struct ProfileSession {
    pub ctx: RequestContext,
    pub profile_id: ProfileId,
}

impl FromRequestParts<AppState> for ProfileSession {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Authenticated(ctx) = Authenticated::from_request_parts(parts, state).await?;
        let profile_id = ctx.profile_id().ok_or(Error::NoProfile)?;
        Ok(Self { ctx, profile_id })
    }
}

/// Password gate plus a selected admin profile
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub ctx: RequestContext,
    pub profile: Profile,
}

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Authenticated(ctx) = Authenticated::from_request_parts(parts, state).await?;
        require_admin(state, &ctx).map(|profile| Self { ctx, profile })
    }
}

/// The admin profile bound to `ctx`
pub fn require_admin(state: &AppState, ctx: &RequestContext) -> Result<Profile, Error> {
    let profile_id = ctx.profile_id().ok_or(Error::NoProfile)?;
    state
        .store
        .get_profile(profile_id)
        .filter(|p| p.is_admin)
        .ok_or_else(|| Error::forbidden("Admin required"))
}
