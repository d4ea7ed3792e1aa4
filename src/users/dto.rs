use serde::Deserialize;

use crate::{
    auth::services::{is_valid_email, normalize_email},
    db::UserPatch,
    error::ApiError,
};

/// Body of `PUT /api/users/:id`; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl UpdateUserRequest {
    pub fn into_patch(self) -> Result<UserPatch, ApiError> {
        let name = match self.name.map(|n| n.trim().to_string()) {
            Some(n) if n.is_empty() => return Err(ApiError::validation("name must not be empty")),
            other => other,
        };
        let email = match self.email.map(|e| normalize_email(&e)) {
            Some(e) if !is_valid_email(&e) => return Err(ApiError::validation("invalid email")),
            other => other,
        };
        let patch = UserPatch {
            name,
            email,
            avatar_url: self.avatar_url.map(|a| a.trim().to_string()),
        };
        if patch.is_empty() {
            return Err(ApiError::validation("nothing to update"));
        }
        Ok(patch)
    }
}
