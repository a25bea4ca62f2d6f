use anyhow::{Result, anyhow, bail};
use log::info;
use tokio::sync::mpsc;

use crate::auth::{AuthApi, AuthEventKind, AuthStateChange, Session};

/// One auth state change as a JSON line, in the wire format.
pub fn format_event(event: AuthEventKind, session: Option<Session>) -> String {
    let change = AuthStateChange { event, session };
    serde_json::to_string(&change).unwrap_or_else(|_| format!(r#"{{"event":"{}"}}"#, event))
}

/// Streams auth state changes to `emit` until `limit` events were seen,
/// the user interrupts, or reconnects run out (an error).
pub async fn watch<W>(auth: &AuthApi, limit: Option<usize>, mut emit: W) -> Result<()>
where
    W: FnMut(&str),
{
    if limit == Some(0) {
        return Ok(());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = auth.on_auth_state_change(move |event, session| {
        let sent = tx
            .send(format_event(event, session))
            .map_err(|_| anyhow!("Auth event watcher is gone"));
        async move { sent }
    });

    let mut seen = 0usize;
    loop {
        tokio::select! {
            biased;
            line = rx.recv() => {
                let Some(line) = line else { break };
                emit(&line);
                seen += 1;
                if limit.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            _ = subscription.closed() => {
                bail!("Auth event stream closed: reconnect attempts exhausted");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing auth event stream");
                break;
            }
        }
    }

    subscription.unsubscribe();
    Ok(())
}
