//! Request type definitions
//!
//! Query strings and JSON bodies accepted by the HTTP surface.

use serde::{Deserialize, Deserializer, Serialize};

fn default_count() -> usize {
    10
}

fn default_limit() -> usize {
    50
}

fn default_next() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_avatar_color() -> String {
    "#cc0000".to_string()
}

/// `GET /api/search`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_count")]
    pub count: usize,
}

/// `?quality=<max height>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QualityQuery {
    #[serde(default)]
    pub quality: Option<u32>,
}

/// `?url=<upstream url>`
#[derive(Debug, Clone, Deserialize)]
pub struct UrlQuery {
    pub url: String,
}

/// `GET /api/subtitle/{id}?lang=`
#[derive(Debug, Clone, Deserialize)]
pub struct SubtitleQuery {
    pub lang: String,
}

/// `GET /api/channel/{id}?count=`
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelQuery {
    #[serde(default = "default_count")]
    pub count: usize,
}

/// `POST /login` form
#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_next")]
    pub next: String,
}

/// `GET /login?error=&next=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginPageQuery {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub next: Option<String>,
}

/// `GET /link?code=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkQuery {
    #[serde(default)]
    pub code: String,
}

/// `POST /api/pair/approve|deny`
#[derive(Debug, Clone, Deserialize)]
pub struct PairCodeBody {
    #[serde(default)]
    pub code: String,
}

/// `GET /api/profiles/history|favorites` paging
#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Favorites item type filter
    #[serde(default, rename = "type")]
    pub item_type: Option<String>,
}

/// `POST /api/profiles`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProfileRequest {
    pub name: String,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default = "default_avatar_color")]
    pub avatar_color: String,
    #[serde(default)]
    pub avatar_emoji: String,
    /// First-run only: the app password to bootstrap
    #[serde(default)]
    pub password: Option<String>,
}

/// `POST /api/profiles/select/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectProfileRequest {
    #[serde(default)]
    pub pin: Option<String>,
}

/// Three-way field: absent, explicit null, or a value
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Patch::Set(value),
            None => Patch::Clear,
        })
    }
}

/// `PUT /api/profiles/edit`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_color: Option<String>,
    #[serde(default)]
    pub avatar_emoji: Option<String>,
    /// Absent keeps the PIN, null removes it, a string sets it
    #[serde(default)]
    pub pin: Patch<String>,
}

/// `PUT /api/profiles/preferences`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferencesRequest {
    #[serde(default)]
    pub quality: Option<u32>,
    #[serde(default)]
    pub subtitle_lang: Option<String>,
    #[serde(default)]
    pub cookie_mode: Option<String>,
}

/// `PUT /api/profiles/preferences/sponsorblock`
#[derive(Debug, Clone, Deserialize)]
pub struct SponsorBlockRequest {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// `POST /api/profiles/position`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavePositionRequest {
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
}

/// `POST /api/profiles/favorites/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FavoriteRequest {
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
    pub item_type: Option<String>,
    #[serde(default)]
    pub playlist_id: String,
    #[serde(default)]
    pub first_video_id: String,
    #[serde(default)]
    pub video_count: String,
}

/// `POST /api/profiles/channels/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FollowChannelRequest {
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// `PUT /api/profiles/settings/password`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordRequest {
    #[serde(default)]
    pub password: Option<String>,
}

/// `PUT /api/profiles/settings/allow-embed`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllowEmbedRequest {
    #[serde(default)]
    pub allow_embed: bool,
}

/// `POST /api/profiles/settings/webos-token`
#[derive(Debug, Clone, Deserialize)]
pub struct TvTokenRequest {
    pub token: String,
    #[serde(default)]
    pub name: String,
}

/// `POST /api/remote/rename`
#[derive(Debug, Clone, Deserialize)]
pub struct RenameDeviceRequest {
    #[serde(default)]
    pub device_name: String,
}
