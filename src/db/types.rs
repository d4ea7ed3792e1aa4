use std::{fmt, str::FromStr};

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

/// Store-assigned user identifier.
///
/// The relational store hands out sequential integers, the document store
/// 12-byte object ids (kept here in their 24-char hex form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum UserId {
    Serial(i64),
    Object(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid user id {0:?}")]
pub struct InvalidUserId(pub String);

impl UserId {
    pub fn as_serial(&self) -> Option<i64> {
        match self {
            UserId::Serial(n) => Some(*n),
            UserId::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&str> {
        match self {
            UserId::Object(hex) => Some(hex),
            UserId::Serial(_) => None,
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Serial(n) => write!(f, "{n}"),
            UserId::Object(hex) => f.write_str(hex),
        }
    }
}

impl FromStr for UserId {
    type Err = InvalidUserId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || InvalidUserId(s.to_string());

        if !s.is_empty() && s.len() <= 19 && s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse::<i64>().map(UserId::Serial).map_err(|_| invalid());
        }
        if s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(UserId::Object(s.to_ascii_lowercase()));
        }
        Err(invalid())
    }
}

/// User record as seen by the rest of the app.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // never exposed in JSON
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Validated fields for a user that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub password_hash: String,
}

/// Profile fields to overwrite; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.avatar_url.is_none()
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url = avatar_url.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serial_and_object_ids() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId::Serial(42));
        assert_eq!(
            "65F0C0FFEE0000000000ABCD".parse::<UserId>().unwrap(),
            UserId::Object("65f0c0ffee0000000000abcd".into())
        );
    }

    #[test]
    fn rejects_garbage_ids() {
        for raw in ["", "abc", "-1", "12a", "99999999999999999999", "65f0c0ffee0000000000abc"] {
            assert!(raw.parse::<UserId>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn id_serializes_by_variant() {
        assert_eq!(serde_json::to_string(&UserId::Serial(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&UserId::Object("65f0c0ffee0000000000abcd".into())).unwrap(),
            "\"65f0c0ffee0000000000abcd\""
        );
    }

    #[test]
    fn user_json_hides_password_hash() {
        let user = User {
            id: UserId::Serial(1),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            avatar_url: String::new(),
            password_hash: "$argon2id$secret".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["email"], "ana@example.com");
        assert_eq!(json["avatarUrl"], "");
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["createdAt"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn patch_only_touches_provided_fields() {
        let mut user = User {
            id: UserId::Serial(1),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            avatar_url: "https://a/1.png".into(),
            password_hash: "h".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let patch = UserPatch {
            name: Some("Ana Maria".into()),
            ..Default::default()
        };
        patch.apply(&mut user);
        assert_eq!(user.name, "Ana Maria");
        assert_eq!(user.email, "ana@example.com");
        assert_eq!(user.avatar_url, "https://a/1.png");
        assert!(UserPatch::default().is_empty());
    }
}
