//! Reconnecting subscription to the auth event stream.
//!
//! A subscription is a background task that owns exactly one live
//! connection at a time and moves through
//! `Connecting -> Open -> (Error -> Connecting | Closed)`.
//!
//! - Opening a connection resets the retry counter.
//! - Every message is decoded and handed to the callback, in order, once.
//!   Bad payloads and failing (or panicking) callbacks are logged and the
//!   connection stays up.
//! - When the connection is lost the subscription waits a fixed delay and
//!   reconnects, up to `max_retries` consecutive times. After that it is
//!   `Closed` for good and the caller has to subscribe again.
//! - [`AuthSubscription::unsubscribe`] closes the connection and stops any
//!   further reconnects, even while a callback is still running. The
//!   pending callback is dropped.

use anyhow::Result;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::events::{AuthEventKind, AuthStateChange, Session};
use super::source::EventSource;
use super::sse::SseMessage;

/// Consecutive reconnect attempts before giving up.
pub const MAX_RECONNECTS: u32 = 3;

/// Fixed delay before each reconnect in milliseconds.
pub const RECONNECT_DELAY_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Open,
    Error,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RECONNECTS,
            delay: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }
}

/// Handle to a running subscription. Dropping it unsubscribes.
#[must_use = "dropping the subscription closes it"]
pub struct AuthSubscription {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<SubscriptionState>,
}

impl AuthSubscription {
    /// Closes the live connection and suppresses reconnects. Safe to call
    /// more than once.
    pub fn unsubscribe(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("Unsubscribing from auth state changes");
        }
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Resolves once the subscription reached `Closed`, either through
    /// `unsubscribe` or because reconnects ran out.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|s| *s == SubscriptionState::Closed)
            .await;
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Starts delivering auth state changes from `source` to `callback`.
///
/// Must be called from within a tokio runtime.
pub fn subscribe<F, Fut>(
    source: Arc<dyn EventSource>,
    policy: ReconnectPolicy,
    callback: F,
) -> AuthSubscription
where
    F: Fn(AuthEventKind, Option<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(SubscriptionState::Connecting);

    tokio::spawn(drive(source, policy, callback, shutdown_rx, state_tx));

    AuthSubscription {
        shutdown: shutdown_tx,
        state: state_rx,
    }
}

async fn drive<F, Fut>(
    source: Arc<dyn EventSource>,
    policy: ReconnectPolicy,
    callback: F,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<SubscriptionState>,
) where
    F: Fn(AuthEventKind, Option<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut retry_count: u32 = 0;
    let mut last_event_id: Option<String> = None;

    'connection: loop {
        state.send_replace(SubscriptionState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break 'connection,
            result = source.connect(last_event_id.clone()) => result,
        };

        match connected {
            Ok(mut stream) => {
                state.send_replace(SubscriptionState::Open);
                retry_count = 0;
                debug!("Auth state change connection established");

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break 'connection,
                        next = stream.next_message() => next,
                    };
                    match next {
                        Ok(Some(message)) => {
                            if message.id.is_some() {
                                last_event_id = message.id.clone();
                            }
                            tokio::select! {
                                biased;
                                _ = shutdown_requested(&mut shutdown) => break 'connection,
                                _ = dispatch(&callback, &message) => {}
                            }
                        }
                        Ok(None) => {
                            error!("Auth state change connection error: closed by server");
                            break;
                        }
                        Err(e) => {
                            error!("Auth state change connection error: {:#}", e);
                            break;
                        }
                    }
                }
                // The dead connection is dropped here, before any reconnect
            }
            Err(e) => error!("Auth state change connection error: {:#}", e),
        }

        state.send_replace(SubscriptionState::Error);
        if retry_count >= policy.max_retries {
            warn!(
                "Auth state change connection closed after {} reconnect attempts; re-subscribe to resume",
                retry_count
            );
            break;
        }
        retry_count += 1;
        info!(
            "Reconnecting to auth state changes in {}ms (attempt {}/{})...",
            policy.delay.as_millis(),
            retry_count,
            policy.max_retries
        );

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }

    state.send_replace(SubscriptionState::Closed);
}

/// Resolves once `unsubscribe` was called or the handle is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn dispatch<F, Fut>(callback: &F, message: &SseMessage)
where
    F: Fn(AuthEventKind, Option<Session>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if !message.is_message() {
        debug!("Ignoring {:?} event on auth stream", message.event);
        return;
    }

    let change = match AuthStateChange::parse(&message.data) {
        Ok(change) => change,
        Err(e) => {
            error!("Error processing auth state change: {:#}", e);
            return;
        }
    };
    debug!("Auth state change: {}", change.event);

    let outcome = AssertUnwindSafe(async { callback(change.event, change.session).await })
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Error processing auth state change: {:#}", e),
        Err(_) => error!("Error processing auth state change: callback panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::source::EventStream;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::Instant;

    /// What a scripted connection does once opened.
    enum Script {
        Refuse,
        /// Yields the payloads, then the server closes the stream.
        Deliver(Vec<&'static str>),
        /// Yields the payloads, then stays open.
        DeliverAndHold(Vec<&'static str>),
        /// Stays open until the trigger fires, then reports a read error.
        FailOn(oneshot::Receiver<()>),
    }

    #[derive(Default)]
    struct Tracker {
        connects: AtomicUsize,
        live: AtomicUsize,
        max_live: AtomicUsize,
        connect_times: Mutex<Vec<Instant>>,
    }

    struct ScriptedSource {
        scripts: Mutex<VecDeque<Script>>,
        tracker: Arc<Tracker>,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Script>) -> (Arc<Self>, Arc<Tracker>) {
            let tracker = Arc::new(Tracker::default());
            let source = Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                tracker: Arc::clone(&tracker),
            });
            (source, tracker)
        }
    }

    struct ScriptedStream {
        messages: VecDeque<SseMessage>,
        hold: bool,
        fail_on: Option<oneshot::Receiver<()>>,
        tracker: Arc<Tracker>,
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            self.tracker.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn messages(payloads: Vec<&'static str>) -> VecDeque<SseMessage> {
        payloads
            .into_iter()
            .map(|data| SseMessage {
                data: data.to_string(),
                ..SseMessage::default()
            })
            .collect()
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self, _last_event_id: Option<String>) -> Result<Box<dyn EventStream>> {
            self.tracker.connects.fetch_add(1, Ordering::SeqCst);
            self.tracker.connect_times.lock().unwrap().push(Instant::now());

            let script = self.scripts.lock().unwrap().pop_front();
            let (messages, hold, fail_on) = match script {
                None | Some(Script::Refuse) => return Err(anyhow!("connection refused")),
                Some(Script::Deliver(p)) => (messages(p), false, None),
                Some(Script::DeliverAndHold(p)) => (messages(p), true, None),
                Some(Script::FailOn(rx)) => (VecDeque::new(), true, Some(rx)),
            };

            let live = self.tracker.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.tracker.max_live.fetch_max(live, Ordering::SeqCst);
            Ok(Box::new(ScriptedStream {
                messages,
                hold,
                fail_on,
                tracker: Arc::clone(&self.tracker),
            }))
        }
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_message(&mut self) -> Result<Option<SseMessage>> {
            if let Some(message) = self.messages.pop_front() {
                return Ok(Some(message));
            }
            if let Some(rx) = self.fail_on.take() {
                let _ = rx.await;
                return Err(anyhow!("connection reset by peer"));
            }
            if self.hold {
                std::future::pending::<()>().await;
            }
            Ok(None)
        }
    }

    type Received = (AuthEventKind, Option<Session>);

    fn channel_callback(
        tx: mpsc::UnboundedSender<Received>,
    ) -> impl Fn(AuthEventKind, Option<Session>) -> std::future::Ready<Result<()>> + Send + Sync + 'static
    {
        move |event, session| {
            let _ = tx.send((event, session));
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_signed_out_once() {
        let (source, _tracker) = ScriptedSource::new(vec![Script::DeliverAndHold(vec![
            r#"{"event":"SIGNED_OUT","session":null}"#,
        ])]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscription = subscribe(source, ReconnectPolicy::default(), channel_callback(tx));

        assert_eq!(rx.recv().await, Some((AuthEventKind::SignedOut, None)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(subscription.state(), SubscriptionState::Open);

        subscription.unsubscribe();
        subscription.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_payloads_and_failing_callbacks_keep_connection_open() {
        let (source, tracker) = ScriptedSource::new(vec![Script::DeliverAndHold(vec![
            r#"{"event":"SIGNED_IN","session":{"user":{"id":"u1"}}}"#,
            "this is not json",
            r#"{"event":"USER_UPDATED","session":{"user":{"id":"u1"}}}"#,
            r#"{"event":"SIGNED_OUT","session":null}"#,
        ])]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscription = subscribe(source, ReconnectPolicy::default(), move |event, session| {
            let tx = tx.clone();
            async move {
                match event {
                    AuthEventKind::SignedIn => bail_out(),
                    AuthEventKind::UserUpdated => panic!("callback bug"),
                    AuthEventKind::SignedOut => {
                        let _ = tx.send((event, session));
                        Ok(())
                    }
                }
            }
        });

        assert_eq!(rx.recv().await, Some((AuthEventKind::SignedOut, None)));
        assert_eq!(tracker.connects.load(Ordering::SeqCst), 1);
        assert_eq!(subscription.state(), SubscriptionState::Open);
    }

    fn bail_out() -> Result<()> {
        Err(anyhow!("profile refresh failed"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_arrive_in_order() {
        let (source, _tracker) = ScriptedSource::new(vec![Script::DeliverAndHold(vec![
            r#"{"event":"SIGNED_IN","session":{"user":{"id":"a"}}}"#,
            r#"{"event":"USER_UPDATED","session":{"user":{"id":"a"}}}"#,
            r#"{"event":"SIGNED_OUT","session":null}"#,
        ])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = subscribe(source, ReconnectPolicy::default(), channel_callback(tx));

        let mut kinds = Vec::new();
        for _ in 0..3 {
            kinds.push(rx.recv().await.unwrap().0);
        }
        assert_eq!(
            kinds,
            vec![
                AuthEventKind::SignedIn,
                AuthEventKind::UserUpdated,
                AuthEventKind::SignedOut
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_reconnects() {
        let (source, tracker) = ScriptedSource::new(vec![]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let start = Instant::now();
        let subscription = subscribe(source, ReconnectPolicy::default(), channel_callback(tx));
        subscription.closed().await;

        // Initial attempt plus three reconnects, never a fourth
        assert_eq!(tracker.connects.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(3 * RECONNECT_DELAY_MS));
        assert_eq!(subscription.state(), SubscriptionState::Closed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(tracker.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay() {
        let (source, tracker) = ScriptedSource::new(vec![
            Script::Deliver(vec![]),
            Script::DeliverAndHold(vec![r#"{"event":"SIGNED_IN","session":{"user":{"id":"b"}}}"#]),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = subscribe(source, ReconnectPolicy::default(), channel_callback(tx));

        let (kind, session) = rx.recv().await.unwrap();
        assert_eq!(kind, AuthEventKind::SignedIn);
        assert_eq!(session.unwrap().user_id(), "b");

        let times = tracker.connect_times.lock().unwrap().clone();
        assert_eq!(times.len(), 2);
        assert_eq!(times[1] - times[0], Duration::from_millis(RECONNECT_DELAY_MS));
        assert_eq!(tracker.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_retry_counter() {
        let (source, tracker) = ScriptedSource::new(vec![
            Script::Refuse,
            Script::Refuse,
            Script::Deliver(vec![]),
            Script::Refuse,
            Script::Refuse,
            Script::Refuse,
        ]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = subscribe(source, ReconnectPolicy::default(), channel_callback(tx));
        subscription.closed().await;

        // Two failures, an open that resets the counter, then three more
        assert_eq!(tracker.connects.load(Ordering::SeqCst), 6);
        assert_eq!(tracker.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_then_error_does_not_reconnect() {
        let (trigger, fail_on) = oneshot::channel();
        let (source, tracker) = ScriptedSource::new(vec![Script::FailOn(fail_on)]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = subscribe(source, ReconnectPolicy::default(), channel_callback(tx));

        while subscription.state() != SubscriptionState::Open {
            tokio::task::yield_now().await;
        }

        subscription.unsubscribe();
        let _ = trigger.send(());
        subscription.closed().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(tracker.connects.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.live.load(Ordering::SeqCst), 0);
        assert_eq!(subscription.state(), SubscriptionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_while_callback_is_pending() {
        let (source, tracker) = ScriptedSource::new(vec![Script::DeliverAndHold(vec![
            r#"{"event":"SIGNED_IN","session":{"user":{"id":"u1"}}}"#,
        ])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = subscribe(source, ReconnectPolicy::default(), move |event, session| {
            let _ = tx.send((event, session));
            std::future::pending::<Result<()>>()
        });

        // The callback is now stuck
        assert_eq!(rx.recv().await.unwrap().0, AuthEventKind::SignedIn);
        assert_eq!(tracker.live.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        subscription.closed().await;

        assert_eq!(tracker.live.load(Ordering::SeqCst), 0);
        assert_eq!(subscription.state(), SubscriptionState::Closed);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(tracker.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_during_reconnect_delay() {
        let (source, tracker) = ScriptedSource::new(vec![Script::Refuse]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = subscribe(source, ReconnectPolicy::default(), channel_callback(tx));

        while subscription.state() != SubscriptionState::Error {
            tokio::task::yield_now().await;
        }
        subscription.unsubscribe();
        subscription.unsubscribe();
        subscription.closed().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(tracker.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_subscription() {
        let (source, tracker) =
            ScriptedSource::new(vec![Script::DeliverAndHold(vec![])]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = subscribe(source, ReconnectPolicy::default(), channel_callback(tx));

        while subscription.state() != SubscriptionState::Open {
            tokio::task::yield_now().await;
        }
        drop(subscription);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracker.live.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.connects.load(Ordering::SeqCst), 1);
    }
}
