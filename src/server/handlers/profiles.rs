//! Household profiles and everything scoped to one
//!
//! Listing and selecting profiles only needs the password gate. History,
//! favorites, channels and preferences need a selected profile, and the
//! settings endpoints need an admin one. The very first profile is created
//! without a password and bootstraps it.

use super::with_session_cookie;
use crate::{
    Error, Result,
    extract::{CookieMode, validate_id},
    server::{
        app::AppState,
        extract::{AdminSession, Authenticated, ProfileSession, RequestContext, require_admin},
    },
    store::{
        Favorite, FollowedChannel, HistoryEntry, NewProfile, PinChange, PreferencesUpdate,
        Profile, ProfileId, ProfileUpdate, SponsorBlockPrefs,
        records::{
            ALLOW_EMBED_KEY, REGISTERED_TVS_KEY, RegisteredTv, encode_registered_tvs,
            parse_registered_tvs,
        },
    },
    types::{
        Ack,
        request::{
            AllowEmbedRequest, CreateProfileRequest, EditProfileRequest, FavoriteRequest,
            FollowChannelRequest, PageQuery, Patch, PasswordRequest, PreferencesRequest,
            SavePositionRequest, SelectProfileRequest, SponsorBlockRequest, TvTokenRequest,
        },
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::LazyLock;
use tracing::info;

const MAX_NAME_CHARS: usize = 30;
const MIN_PASSWORD_CHARS: usize = 4;
const MAX_TV_TOKEN_CHARS: usize = 200;
const MAX_TV_NAME_CHARS: usize = 50;
const ITEM_TYPES: [&str; 4] = ["video", "playlist", "mix", "live"];

static AVATAR_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#[0-9a-fA-F]{6}$|^transparent$").expect("valid avatar color pattern")
});

static DURATION_STR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}:\d{2}(:\d{2})?)?$").expect("valid duration pattern")
});

fn check_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_CHARS || name.trim().is_empty() {
        return Err(Error::validation(
            "name",
            format!("Name must be 1-{} characters", MAX_NAME_CHARS),
        ));
    }
    Ok(())
}

fn check_avatar_color(color: &str) -> Result<()> {
    if AVATAR_COLOR.is_match(color) {
        Ok(())
    } else {
        Err(Error::validation("avatar_color", "Invalid avatar color"))
    }
}

/// A trimmed PIN; empty means none
fn check_pin(pin: &str) -> Result<Option<String>> {
    let pin = pin.trim();
    if pin.is_empty() {
        return Ok(None);
    }
    if pin.len() == 4 && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(Some(pin.to_string()))
    } else {
        Err(Error::validation("pin", "PIN must be exactly 4 digits"))
    }
}

fn check_password(password: Option<&str>) -> Result<&str> {
    match password {
        Some(p) if p.chars().count() >= MIN_PASSWORD_CHARS => Ok(p),
        _ => Err(Error::validation(
            "password",
            format!("Password must be at least {} characters", MIN_PASSWORD_CHARS),
        )),
    }
}

fn check_duration_str(value: &str) -> Result<()> {
    if DURATION_STR.is_match(value) {
        Ok(())
    } else {
        Err(Error::validation("duration_str", "Invalid duration format"))
    }
}

/// The request's session token, creating a session when the cookie is
/// missing or stale
fn ensure_session(state: &AppState, ctx: &RequestContext) -> String {
    match &ctx.session {
        Some(session) => session.token.clone(),
        None => {
            let session = state.store.create_session();
            state.store.update_session_ip(&session.token, &ctx.ip);
            session.token
        }
    }
}

/// What the client should show on load
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum BootState {
    FirstRun,
    LoginRequired,
    ProfileSelect { profiles: Vec<Profile> },
    Ready { profile: Profile },
}

/// Decide the boot state without touching the response
pub fn boot_state(state: &AppState, ctx: &RequestContext) -> BootState {
    let profiles = state.store.list_profiles();
    let has_password = state.store.has_app_password();
    if profiles.is_empty() && !has_password {
        return BootState::FirstRun;
    }
    if has_password && ctx.session.is_none() {
        return BootState::LoginRequired;
    }
    if let Some(profile) = ctx.profile_id().and_then(|id| state.store.get_profile(id)) {
        return BootState::Ready { profile };
    }
    BootState::ProfileSelect { profiles }
}

/// GET /api/profiles/boot
pub async fn boot(State(state): State<AppState>, ctx: RequestContext) -> Json<BootState> {
    Json(boot_state(&state, &ctx))
}

/// GET /api/profiles
pub async fn list(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
) -> Json<Vec<Profile>> {
    Json(state.store.list_profiles())
}

/// Create a profile; the first one also sets the app password
///
/// POST /api/profiles
pub async fn create(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Json(req): Json<CreateProfileRequest>,
) -> Result<Response> {
    let existing = state.store.list_profiles();
    let first_run = existing.is_empty() && !state.store.has_app_password();
    if !existing.is_empty() {
        require_admin(&state, &ctx)?;
    }

    check_name(&req.name)?;
    check_avatar_color(&req.avatar_color)?;
    let pin = match req.pin.as_deref() {
        Some(pin) => check_pin(pin)?,
        None => None,
    };
    // Checked before anything is written so a bad password leaves no profile
    let password = if first_run {
        Some(check_password(req.password.as_deref())?)
    } else {
        None
    };

    let profile = state.store.create_profile(NewProfile {
        name: req.name.clone(),
        pin,
        avatar_color: req.avatar_color.clone(),
        avatar_emoji: req.avatar_emoji.clone(),
    })?;
    info!("Created profile {} ({})", profile.id, profile.name);

    let Some(password) = password else {
        return Ok(Json(profile).into_response());
    };
    state.store.set_app_password(password);
    let token = ensure_session(&state, &ctx);
    state.store.set_session_profile(&token, Some(profile.id));
    info!("First-run setup complete");
    Ok(with_session_cookie(&state, &token, Json(profile).into_response()))
}

/// DELETE /api/profiles/profile/{profile_id}
pub async fn remove(
    State(state): State<AppState>,
    AdminSession { ctx, .. }: AdminSession,
    Path(profile_id): Path<ProfileId>,
) -> Result<Json<Ack>> {
    if ctx.profile_id() == Some(profile_id) {
        return Err(Error::validation("profile_id", "Cannot delete your own profile"));
    }
    if state.store.get_profile(profile_id).is_none() {
        return Err(Error::not_found("Profile not found"));
    }
    state.store.delete_profile(profile_id);
    state.store.clear_profile_from_sessions(profile_id);
    info!("Deleted profile {}", profile_id);
    Ok(Json(Ack::OK))
}

/// Bind a profile to this session
///
/// No PIN is asked when re-selecting the current profile or when it is the
/// only one.
///
/// POST /api/profiles/select/{profile_id}
pub async fn select(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(profile_id): Path<ProfileId>,
    Json(req): Json<SelectProfileRequest>,
) -> Result<Response> {
    let profile = state
        .store
        .get_profile(profile_id)
        .ok_or_else(|| Error::not_found("Profile not found"))?;

    let solo = state.store.list_profiles().len() == 1;
    if profile.has_pin && ctx.profile_id() != Some(profile_id) && !solo {
        let pin_ok = req
            .pin
            .as_deref()
            .is_some_and(|pin| state.store.verify_pin(profile_id, pin));
        if !pin_ok {
            return Err(Error::forbidden("Invalid PIN"));
        }
    }

    let token = ensure_session(&state, &ctx);
    state.store.set_session_profile(&token, Some(profile_id));
    let body = Json(json!({ "ok": true, "profile": profile })).into_response();
    Ok(with_session_cookie(&state, &token, body))
}

/// PUT /api/profiles/edit
pub async fn edit(
    State(state): State<AppState>,
    session: ProfileSession,
    Json(req): Json<EditProfileRequest>,
) -> Result<Json<Profile>> {
    if let Some(name) = &req.name {
        check_name(name)?;
    }
    if let Some(color) = &req.avatar_color {
        check_avatar_color(color)?;
    }
    let pin = match &req.pin {
        Patch::Keep => PinChange::Keep,
        Patch::Clear => PinChange::Remove,
        Patch::Set(pin) => match check_pin(pin)? {
            Some(pin) => PinChange::Set(pin),
            None => PinChange::Remove,
        },
    };

    state
        .store
        .update_profile(
            session.profile_id,
            ProfileUpdate {
                name: req.name,
                avatar_color: req.avatar_color,
                avatar_emoji: req.avatar_emoji,
                pin,
            },
        )?
        .map(Json)
        .ok_or_else(|| Error::not_found("Profile not found"))
}

/// PUT /api/profiles/preferences
pub async fn preferences(
    State(state): State<AppState>,
    session: ProfileSession,
    Json(req): Json<PreferencesRequest>,
) -> Result<Json<Ack>> {
    if let Some(mode) = &req.cookie_mode {
        mode.parse::<CookieMode>()
            .map_err(|_| Error::validation("cookie_mode", "Invalid cookie mode"))?;
    }
    state.store.update_preferences(
        session.profile_id,
        PreferencesUpdate {
            quality: req.quality,
            subtitle_lang: req.subtitle_lang,
            cookie_mode: req.cookie_mode,
        },
    );
    Ok(Json(Ack::OK))
}

/// PUT /api/profiles/preferences/sponsorblock
pub async fn sponsorblock(
    State(state): State<AppState>,
    session: ProfileSession,
    Json(req): Json<SponsorBlockRequest>,
) -> Json<Ack> {
    let prefs = SponsorBlockPrefs::sanitized(req.enabled, &req.categories);
    state.store.update_sponsorblock(session.profile_id, prefs);
    Json(Ack::OK)
}

/// GET /api/profiles/history?limit=&offset=
pub async fn history(
    State(state): State<AppState>,
    session: ProfileSession,
    Query(page): Query<PageQuery>,
) -> Json<Vec<HistoryEntry>> {
    Json(
        state
            .store
            .watch_history(session.profile_id, page.limit, page.offset),
    )
}

/// DELETE /api/profiles/history
pub async fn clear_history(State(state): State<AppState>, session: ProfileSession) -> Json<Ack> {
    state.store.clear_history(session.profile_id);
    Json(Ack::OK)
}

/// DELETE /api/profiles/history/{video_id}
pub async fn delete_history_entry(
    State(state): State<AppState>,
    session: ProfileSession,
    Path(video_id): Path<String>,
) -> Json<Ack> {
    state
        .store
        .delete_history_entry(session.profile_id, &video_id);
    Json(Ack::OK)
}

/// POST /api/profiles/position
pub async fn save_position(
    State(state): State<AppState>,
    session: ProfileSession,
    Json(req): Json<SavePositionRequest>,
) -> Result<Json<Ack>> {
    validate_id("video_id", &req.video_id)?;
    check_duration_str(&req.duration_str)?;
    if !req.position.is_finite() || req.position < 0.0 {
        return Err(Error::validation("position", "Invalid position"));
    }
    state.store.save_position(
        session.profile_id,
        HistoryEntry {
            video_id: req.video_id,
            position: req.position,
            title: req.title,
            channel: req.channel,
            thumbnail: req.thumbnail,
            duration: req.duration,
            duration_str: req.duration_str,
            updated_at: None,
        },
    );
    Ok(Json(Ack::OK))
}

/// GET /api/profiles/position/{video_id}
pub async fn get_position(
    State(state): State<AppState>,
    session: ProfileSession,
    Path(video_id): Path<String>,
) -> Json<Value> {
    let position = state.store.get_position(session.profile_id, &video_id);
    Json(json!({ "position": position }))
}

/// GET /api/profiles/favorites?limit=&offset=&type=
pub async fn favorites(
    State(state): State<AppState>,
    session: ProfileSession,
    Query(page): Query<PageQuery>,
) -> Json<Vec<Favorite>> {
    Json(state.store.favorites(
        session.profile_id,
        page.limit,
        page.offset,
        page.item_type.as_deref(),
    ))
}

/// DELETE /api/profiles/favorites
pub async fn clear_favorites(State(state): State<AppState>, session: ProfileSession) -> Json<Ack> {
    state.store.clear_favorites(session.profile_id);
    Json(Ack::OK)
}

/// POST /api/profiles/favorites/{video_id}
pub async fn add_favorite(
    State(state): State<AppState>,
    session: ProfileSession,
    Path(video_id): Path<String>,
    Json(req): Json<FavoriteRequest>,
) -> Result<Json<Ack>> {
    validate_id("video_id", &video_id)?;
    check_duration_str(&req.duration_str)?;
    let item_type = req.item_type.unwrap_or_else(|| "video".to_string());
    if !ITEM_TYPES.contains(&item_type.as_str()) {
        return Err(Error::validation("item_type", "Invalid item type"));
    }
    state.store.add_favorite(
        session.profile_id,
        Favorite {
            video_id,
            title: req.title,
            channel: req.channel,
            thumbnail: req.thumbnail,
            duration: req.duration,
            duration_str: req.duration_str,
            item_type,
            playlist_id: req.playlist_id,
            first_video_id: req.first_video_id,
            video_count: req.video_count,
            created_at: None,
        },
    );
    Ok(Json(Ack::OK))
}

/// DELETE /api/profiles/favorites/{video_id}
pub async fn remove_favorite(
    State(state): State<AppState>,
    session: ProfileSession,
    Path(video_id): Path<String>,
) -> Json<Ack> {
    state.store.remove_favorite(session.profile_id, &video_id);
    Json(Ack::OK)
}

/// GET /api/profiles/favorites/{video_id}/status
pub async fn favorite_status(
    State(state): State<AppState>,
    session: ProfileSession,
    Path(video_id): Path<String>,
) -> Json<Value> {
    let is_favorite = state.store.is_favorite(session.profile_id, &video_id);
    Json(json!({ "is_favorite": is_favorite }))
}

/// GET /api/profiles/channels
pub async fn channels(
    State(state): State<AppState>,
    session: ProfileSession,
) -> Json<Vec<FollowedChannel>> {
    Json(state.store.followed_channels(session.profile_id))
}

/// DELETE /api/profiles/channels
pub async fn clear_channels(State(state): State<AppState>, session: ProfileSession) -> Json<Ack> {
    state.store.clear_followed_channels(session.profile_id);
    Json(Ack::OK)
}

/// POST /api/profiles/channels/{channel_id}
pub async fn follow_channel(
    State(state): State<AppState>,
    session: ProfileSession,
    Path(channel_id): Path<String>,
    Json(req): Json<FollowChannelRequest>,
) -> Result<Json<Ack>> {
    validate_id("channel_id", &channel_id)?;
    state.store.follow_channel(
        session.profile_id,
        FollowedChannel {
            channel_id,
            channel_name: req.channel_name,
            avatar_url: req.avatar_url,
            followed_at: None,
        },
    );
    Ok(Json(Ack::OK))
}

/// DELETE /api/profiles/channels/{channel_id}
pub async fn unfollow_channel(
    State(state): State<AppState>,
    session: ProfileSession,
    Path(channel_id): Path<String>,
) -> Json<Ack> {
    state.store.unfollow_channel(session.profile_id, &channel_id);
    Json(Ack::OK)
}

/// GET /api/profiles/channels/{channel_id}/status
pub async fn channel_status(
    State(state): State<AppState>,
    session: ProfileSession,
    Path(channel_id): Path<String>,
) -> Json<Value> {
    let is_following = state.store.is_following(session.profile_id, &channel_id);
    Json(json!({ "is_following": is_following }))
}

/// Registered TV as shown to admins; the key itself is never sent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TvView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub has_key: bool,
    pub has_token: bool,
    pub token_masked: String,
    pub last_renewed: Option<String>,
    pub last_error: Option<String>,
}

impl From<&RegisteredTv> for TvView {
    fn from(tv: &RegisteredTv) -> Self {
        Self {
            name: tv.name.clone(),
            kind: tv.kind.clone(),
            has_key: tv.has_ssh_key(),
            has_token: !tv.token.is_empty(),
            token_masked: tv.masked_token(),
            last_renewed: tv.last_renewed.clone(),
            last_error: tv.last_error.clone(),
        }
    }
}

fn registered_tvs(state: &AppState) -> Vec<RegisteredTv> {
    parse_registered_tvs(state.store.get_setting(REGISTERED_TVS_KEY).as_deref())
}

fn save_registered_tvs(state: &AppState, tvs: &[RegisteredTv]) {
    state
        .store
        .set_setting(REGISTERED_TVS_KEY, encode_registered_tvs(tvs).as_deref());
}

/// GET /api/profiles/settings
pub async fn settings(State(state): State<AppState>, _admin: AdminSession) -> Json<Value> {
    let tvs: Vec<TvView> = registered_tvs(&state).iter().map(TvView::from).collect();
    Json(json!({
        "allow_embed": state.store.get_setting(ALLOW_EMBED_KEY).as_deref() == Some("1"),
        "registered_tvs": tvs,
    }))
}

/// Change the app password
///
/// During first run (no password, no profile) anyone may set it and the
/// caller gets a session; afterwards it takes an admin.
///
/// PUT /api/profiles/settings/password
pub async fn update_password(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Json(req): Json<PasswordRequest>,
) -> Result<Response> {
    let first_run = !state.store.has_app_password();
    if !first_run || ctx.profile_id().is_some() {
        require_admin(&state, &ctx)?;
    }
    let password = check_password(req.password.as_deref())?;
    state.store.set_app_password(password);
    info!("App password updated");

    let body = Json(Ack::OK).into_response();
    if !first_run {
        return Ok(body);
    }
    let token = ensure_session(&state, &ctx);
    Ok(with_session_cookie(&state, &token, body))
}

/// PUT /api/profiles/settings/allow-embed
pub async fn update_allow_embed(
    State(state): State<AppState>,
    _admin: AdminSession,
    Json(req): Json<AllowEmbedRequest>,
) -> Json<Value> {
    let value = req.allow_embed.then_some("1");
    state.store.set_setting(ALLOW_EMBED_KEY, value);
    Json(json!({ "ok": true, "allow_embed": req.allow_embed }))
}

/// Store a TV developer-mode token, replacing the entry of the same name
///
/// POST /api/profiles/settings/webos-token
pub async fn add_tv_token(
    State(state): State<AppState>,
    _admin: AdminSession,
    Json(req): Json<TvTokenRequest>,
) -> Result<Json<Ack>> {
    let token = req.token.trim();
    let name = req.name.trim();
    if token.is_empty() || token.chars().count() > MAX_TV_TOKEN_CHARS {
        return Err(Error::validation(
            "token",
            format!("Token must be 1-{} characters", MAX_TV_TOKEN_CHARS),
        ));
    }
    if name.chars().count() > MAX_TV_NAME_CHARS {
        return Err(Error::validation(
            "name",
            format!("Name must be at most {} characters", MAX_TV_NAME_CHARS),
        ));
    }

    let mut tvs = registered_tvs(&state);
    match tvs.iter_mut().find(|tv| tv.name == name) {
        Some(tv) => {
            tv.token = token.to_string();
            tv.kind = "webos".to_string();
        }
        None => tvs.push(RegisteredTv {
            name: name.to_string(),
            kind: "webos".to_string(),
            token: token.to_string(),
            ..Default::default()
        }),
    }
    save_registered_tvs(&state, &tvs);
    Ok(Json(Ack::OK))
}

/// DELETE /api/profiles/settings/registered-tv/{index}
pub async fn delete_tv(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(index): Path<usize>,
) -> Json<Ack> {
    let mut tvs = registered_tvs(&state);
    if index < tvs.len() {
        tvs.remove(index);
    }
    save_registered_tvs(&state, &tvs);
    Json(Ack::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Settings, extract::YtDlpResolver, store::MemoryStore};
    use rstest::rstest;
    use std::sync::Arc;

    fn state() -> AppState {
        let settings = Settings::default();
        let resolver = Arc::new(YtDlpResolver::from_settings(&settings));
        AppState::new(settings, Arc::new(MemoryStore::new()), resolver).unwrap()
    }

    fn ctx(state: &AppState, token: Option<&str>) -> RequestContext {
        RequestContext {
            token: token.map(str::to_string),
            session: token.and_then(|t| state.store.get_session(t)),
            ip: "10.0.0.2".to_string(),
        }
    }

    #[rstest]
    #[case("1234", Ok(Some("1234")))]
    #[case(" 0420 ", Ok(Some("0420")))]
    #[case("", Ok(None))]
    #[case("123", Err(()))]
    #[case("12a4", Err(()))]
    #[case("12345", Err(()))]
    fn test_check_pin(#[case] input: &str, #[case] expected: std::result::Result<Option<&str>, ()>) {
        let got = check_pin(input).map_err(|_| ());
        assert_eq!(got, expected.map(|p| p.map(str::to_string)));
    }

    #[rstest]
    #[case("#cc0000", true)]
    #[case("#ABCDEF", true)]
    #[case("transparent", true)]
    #[case("red", false)]
    #[case("#cc00001", false)]
    fn test_avatar_color(#[case] color: &str, #[case] ok: bool) {
        assert_eq!(check_avatar_color(color).is_ok(), ok);
    }

    #[rstest]
    #[case("", true)]
    #[case("3:32", true)]
    #[case("1:02:03", true)]
    #[case("3:2", false)]
    #[case("abc", false)]
    fn test_duration_str(#[case] value: &str, #[case] ok: bool) {
        assert_eq!(check_duration_str(value).is_ok(), ok);
    }

    #[test]
    fn test_name_length_limits() {
        assert!(check_name("Kid").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("   ").is_err());
        assert!(check_name(&"x".repeat(30)).is_ok());
        assert!(check_name(&"x".repeat(31)).is_err());
    }

    #[test]
    fn test_boot_states() {
        let state = state();
        assert_eq!(boot_state(&state, &ctx(&state, None)), BootState::FirstRun);

        state.store.set_app_password("secret");
        assert_eq!(boot_state(&state, &ctx(&state, None)), BootState::LoginRequired);

        let profile = state
            .store
            .create_profile(NewProfile {
                name: "Alex".to_string(),
                ..Default::default()
            })
            .unwrap();
        let session = state.store.create_session();
        assert!(matches!(
            boot_state(&state, &ctx(&state, Some(&session.token))),
            BootState::ProfileSelect { profiles } if profiles.len() == 1
        ));

        state.store.set_session_profile(&session.token, Some(profile.id));
        assert!(matches!(
            boot_state(&state, &ctx(&state, Some(&session.token))),
            BootState::Ready { profile: p } if p.id == profile.id
        ));
    }

    #[test]
    fn test_boot_state_wire_shape() {
        let json = serde_json::to_value(BootState::LoginRequired).unwrap();
        assert_eq!(json, json!({ "state": "login-required" }));
    }

    #[test]
    fn test_tv_view_hides_key() {
        let tv = RegisteredTv {
            name: "living room".to_string(),
            kind: "webos".to_string(),
            token: "abcdef1234567890".to_string(),
            ssh_key: Some("-----BEGIN KEY-----".to_string()),
            ..Default::default()
        };
        let view = serde_json::to_value(TvView::from(&tv)).unwrap();
        assert_eq!(view["token_masked"], "abcdef...7890");
        assert_eq!(view["has_key"], true);
        assert_eq!(view["type"], "webos");
        assert!(view.get("ssh_key").is_none());
        assert!(view.get("token").is_none());
    }
}
