//! Profile of the signed-in user.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::AuthApi;
use crate::http::ApiError;

/// Path the current user's profile is read from.
pub const PROFILE_PATH: &str = "/auth/profile";

/// Path profile changes are sent to.
pub const USERS_PATH: &str = "/api/users";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Fields this crate does not model, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The profile payload, wrapped the way callers expect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileResponse<T> {
    pub data: T,
}

impl AuthApi {
    /// Fetches the signed-in user's profile.
    #[tracing::instrument(skip(self))]
    pub async fn get_profile<T: DeserializeOwned>(&self) -> Result<ProfileResponse<T>, ApiError> {
        let data = self.client.get::<T>(PROFILE_PATH, None).await?;
        Ok(ProfileResponse { data })
    }

    /// Sends only the changed profile fields and returns the updated profile.
    #[tracing::instrument(skip(self, changes))]
    pub async fn update_profile<T, P>(&self, changes: &P) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.client.patch(USERS_PATH, Some(changes), None).await
    }
}
