//! Typed records stored inside raw setting strings
//!
//! Persisted JSON may be missing, hand-edited or written by an older
//! build; parsing never fails and degrades to empty or default values.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Setting key holding the registered TV list
pub const REGISTERED_TVS_KEY: &str = "registered_tvs";
/// Setting key enabling unauthenticated embed pages for known IPs
pub const ALLOW_EMBED_KEY: &str = "allow_embed";

/// SponsorBlock categories a profile may skip
pub const SPONSORBLOCK_CATEGORIES: &[&str] = &[
    "sponsor",
    "intro",
    "outro",
    "selfpromo",
    "interaction",
    "preview",
    "filler",
    "music_offtopic",
];

fn default_tv_kind() -> String {
    "webos".to_string()
}

/// A TV registered for developer-mode renewal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisteredTv {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_tv_kind", rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub last_renewed: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl RegisteredTv {
    pub fn has_ssh_key(&self) -> bool {
        self.ssh_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Token with only its edges visible
    pub fn masked_token(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        if chars.len() > 10 {
            let head: String = chars[..6].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        } else if chars.is_empty() {
            String::new()
        } else {
            "***".to_string()
        }
    }
}

/// Parse the registered TV list
pub fn parse_registered_tvs(raw: Option<&str>) -> Vec<RegisteredTv> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(values) => values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        Err(e) => {
            warn!("Ignoring malformed registered TV list: {}", e);
            Vec::new()
        }
    }
}

/// Serialize the registered TV list; an empty list clears the setting
pub fn encode_registered_tvs(tvs: &[RegisteredTv]) -> Option<String> {
    if tvs.is_empty() {
        None
    } else {
        serde_json::to_string(tvs).ok()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_categories() -> Vec<String> {
    vec!["sponsor".to_string()]
}

/// Per-profile SponsorBlock preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorBlockPrefs {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

impl Default for SponsorBlockPrefs {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: default_categories(),
        }
    }
}

impl SponsorBlockPrefs {
    /// Build preferences keeping only known categories, in input order
    pub fn sanitized(enabled: bool, categories: &[String]) -> Self {
        let mut kept: Vec<String> = Vec::new();
        for c in categories {
            if SPONSORBLOCK_CATEGORIES.contains(&c.as_str()) && !kept.contains(c) {
                kept.push(c.clone());
            }
        }
        Self {
            enabled,
            categories: kept,
        }
    }

    /// Parse stored preferences; anything but a JSON object is the default
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Self::default();
        };
        let value = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            Ok(other) => {
                warn!("Ignoring SponsorBlock preferences that are not an object: {}", other);
                return Self::default();
            }
            Err(e) => {
                warn!("Ignoring malformed SponsorBlock preferences: {}", e);
                return Self::default();
            }
        };
        match serde_json::from_value::<Self>(value) {
            Ok(prefs) => Self::sanitized(prefs.enabled, &prefs.categories),
            Err(e) => {
                warn!("Ignoring malformed SponsorBlock preferences: {}", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_registered_tvs_skip_malformed_entries() {
        assert!(parse_registered_tvs(None).is_empty());
        assert!(parse_registered_tvs(Some("{not json")).is_empty());
        assert!(parse_registered_tvs(Some(r#"{"name":"x"}"#)).is_empty());

        let tvs = parse_registered_tvs(Some(
            r#"[{"name":"192.168.1.20","token":"abcdef1234567890"}, 42]"#,
        ));
        assert_eq!(tvs.len(), 1);
        assert_eq!(tvs[0].kind, "webos");
        assert_eq!(tvs[0].masked_token(), "abcdef...7890");
        assert!(!tvs[0].has_ssh_key());
    }

    #[test]
    fn test_short_token_mask() {
        let tv = RegisteredTv {
            token: "short".into(),
            ..Default::default()
        };
        assert_eq!(tv.masked_token(), "***");
        assert_eq!(RegisteredTv::default().masked_token(), "");
    }

    #[test]
    fn test_sponsorblock_sanitized() {
        let prefs = SponsorBlockPrefs::sanitized(
            true,
            &["intro".into(), "bogus".into(), "intro".into(), "outro".into()],
        );
        assert_eq!(prefs.categories, vec!["intro", "outro"]);
    }

    #[test]
    fn test_sponsorblock_parse_malformed() {
        assert_eq!(SponsorBlockPrefs::parse(Some("[]")), SponsorBlockPrefs::default());
        let prefs = SponsorBlockPrefs::parse(Some(r#"{"enabled":false,"categories":["filler"]}"#));
        assert!(!prefs.enabled);
        assert_eq!(prefs.categories, vec!["filler"]);
    }

    #[test]
    fn test_sponsorblock_parse_defaults_missing_fields() {
        let default = SponsorBlockPrefs::default();
        assert_eq!(SponsorBlockPrefs::parse(Some("42")), default);
        assert_eq!(SponsorBlockPrefs::parse(Some("{broken")), default);
        assert_eq!(SponsorBlockPrefs::parse(Some("{}")), default);

        let prefs = SponsorBlockPrefs::parse(Some(r#"{"enabled":false}"#));
        assert!(!prefs.enabled);
        assert_eq!(prefs.categories, vec!["sponsor"]);

        let prefs = SponsorBlockPrefs::parse(Some(r#"{"categories":[]}"#));
        assert!(prefs.enabled);
        assert!(prefs.categories.is_empty());
    }
}
