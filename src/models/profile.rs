// UserProfile - account record carrying the denormalized graph/content counters

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::infrastructure::document_store::{into_document, Document, DocumentSnapshot, Timestamp};
use crate::models::post::AuthorSnapshot;
use crate::models::timestamp::deserialize_timestamp;

pub const MAX_HANDLE_CHARS: usize = 30;
pub const MAX_DISPLAY_NAME_CHARS: usize = 50;
pub const MAX_DESCRIPTION_CHARS: usize = 160;

static HANDLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_.]{1,30}$").expect("handle pattern is valid"));

/// Stored field names on `users/{uid}`
pub mod fields {
    pub const UID: &str = "uid";
    pub const HANDLE: &str = "handle";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const AVATAR_URL: &str = "avatarUrl";
    pub const DESCRIPTION: &str = "description";
    pub const CREATED_AT: &str = "createdAt";
    pub const FOLLOWERS_COUNT: &str = "followersCount";
    pub const FOLLOWING_COUNT: &str = "followingCount";
    pub const POSTS_COUNT: &str = "postsCount";
    pub const REPOSTS_COUNT: &str = "repostsCount";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub created_at: Timestamp,
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub posts_count: u64,
    #[serde(default)]
    pub reposts_count: u64,
}

impl UserProfile {
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> AppResult<Self> {
        let mut profile: UserProfile =
            serde_json::from_value(Value::Object(snapshot.data.clone())).map_err(|e| {
                AppError::MalformedDocument(format!("users/{}: {}", snapshot.id, e))
            })?;
        profile.uid = snapshot.id.clone();
        Ok(profile)
    }

    pub fn to_document(&self) -> AppResult<Document> {
        into_document(serde_json::to_value(self)?)
    }

    /// Name and handle as captured onto posts and comments
    pub fn author_snapshot(&self) -> AuthorSnapshot {
        AuthorSnapshot {
            id: self.uid.clone(),
            name: self.display_name.clone(),
            handle: self.handle.clone(),
        }
    }
}

/// Registration input
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProfile {
    pub uid: String,
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Editable profile fields; counters and the handle are not writable here
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.avatar_url.is_none() && self.description.is_none()
    }
}

/// Trim and lower-case a handle, then check it against the allowed alphabet
pub fn normalize_handle(raw: &str) -> AppResult<String> {
    let handle = raw.trim().to_lowercase();
    if HANDLE_PATTERN.is_match(&handle) {
        Ok(handle)
    } else {
        Err(AppError::InvalidArgument(format!(
            "handle must be 1-{} characters of a-z, 0-9, '_' or '.', got '{}'",
            MAX_HANDLE_CHARS, raw
        )))
    }
}

pub fn validate_display_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_DISPLAY_NAME_CHARS {
        return Err(AppError::InvalidArgument(format!(
            "display name must be 1-{} characters",
            MAX_DISPLAY_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

pub fn validate_description(raw: &str) -> AppResult<String> {
    let description = raw.trim();
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(AppError::InvalidArgument(format!(
            "description exceeds {} characters",
            MAX_DESCRIPTION_CHARS
        )));
    }
    Ok(description.to_string())
}
