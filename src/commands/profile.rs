use anyhow::Result;
use serde_json::Value;

use crate::auth::{AuthApi, ProfileResponse};

/// Fetches the signed-in user's profile as `{ "data": ... }`.
#[tracing::instrument(skip(auth))]
pub async fn profile(auth: &AuthApi) -> Result<Value> {
    let response: ProfileResponse<Value> = auth.get_profile().await?;
    Ok(serde_json::to_value(response)?)
}
