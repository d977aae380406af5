//! Safe delivery
//!
//! Best-effort sends that never fail the caller. The UI may close a channel or
//! abandon a one-shot request at any moment; that is logged at debug level and
//! otherwise ignored. Each call makes exactly one attempt, with no retry and no
//! buffering.

use serde::Serialize;

use crate::channel::{MessageSink, Responder};
use crate::error::RelayError;

/// Post `message` on `channel`. Returns whether the channel accepted it.
pub fn send<S, M>(channel: &S, message: M) -> bool
where
    S: MessageSink + ?Sized,
    M: Serialize,
{
    let value = match serde_json::to_value(message) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(channel = channel.channel_name(), error = %e, "failed to serialize outgoing message");
            return false;
        }
    };
    match channel.post_message(value) {
        Ok(()) => true,
        Err(e) => {
            log_failure(channel.channel_name(), &e);
            false
        }
    }
}

/// Answer a one-shot request. Returns whether the caller was still waiting.
pub fn respond<M: Serialize>(responder: Responder, message: M) -> bool {
    let value = match serde_json::to_value(message) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize response");
            return false;
        }
    };
    match responder.send(value) {
        Ok(()) => true,
        Err(e) => {
            log_failure("one-shot", &e);
            false
        }
    }
}

fn log_failure(target: &str, error: &RelayError) {
    if error.is_disconnect() {
        tracing::debug!(channel = target, "remote endpoint gone; message dropped");
    } else {
        tracing::debug!(channel = target, error = %error, "unexpected delivery failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use serde_json::json;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn send_reports_success() {
        let (relay, mut remote) = channel("chat");
        assert!(send(&relay.sender(), json!({"delta": "a"})));
        assert_eq!(remote.recv().await, Some(json!({"delta": "a"})));
    }

    #[tokio::test]
    #[traced_test]
    async fn send_to_gone_remote_is_swallowed() {
        let (relay, remote) = channel("chat");
        drop(remote);
        assert!(!send(&relay.sender(), json!({"delta": "a"})));
        assert!(logs_contain("remote endpoint gone"));
    }

    #[tokio::test]
    async fn respond_to_abandoned_caller_is_swallowed() {
        let (responder, rx) = Responder::new();
        drop(rx);
        assert!(!respond(responder, json!({"success": true})));
    }

    #[tokio::test]
    async fn respond_delivers_once() {
        let (responder, rx) = Responder::new();
        assert!(respond(responder, json!({"success": true})));
        assert_eq!(rx.await.unwrap(), json!({"success": true}));
    }
}
