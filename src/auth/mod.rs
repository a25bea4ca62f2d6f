//! Authentication state: the reconnecting auth event subscription and the
//! signed-in user's profile.

mod events;
mod profile;
mod source;
mod sse;
mod subscription;

pub use events::{AuthEventKind, AuthStateChange, Session, SessionUser};
pub use profile::{PROFILE_PATH, Profile, ProfileResponse, USERS_PATH};
pub use source::{
    AUTH_EVENTS_PATH, DEFAULT_RESPONSE_TIMEOUT_MS, EventSource, EventStream, HttpEventSource,
};
pub use sse::{SseDecoder, SseMessage};
pub use subscription::{
    AuthSubscription, MAX_RECONNECTS, RECONNECT_DELAY_MS, ReconnectPolicy, SubscriptionState,
    subscribe,
};

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;

use crate::http::ApiClient;

/// Auth operations layered on an [`ApiClient`].
#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
    events: Arc<dyn EventSource>,
    reconnect: ReconnectPolicy,
}

impl AuthApi {
    pub fn new(client: ApiClient, events: Arc<dyn EventSource>) -> Self {
        Self {
            client,
            events,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Calls `callback` for every auth state change pushed by the server
    /// until the returned subscription is unsubscribed or dropped.
    pub fn on_auth_state_change<F, Fut>(&self, callback: F) -> AuthSubscription
    where
        F: Fn(AuthEventKind, Option<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        subscribe(Arc::clone(&self.events), self.reconnect.clone(), callback)
    }
}
