use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use super::{Envelope, Message, MessagePath, ModuleRef, Response};
use crate::error::{RelayError, Result};

/// Bounded wait for the target module to answer.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Deliver `message` to the module at `path` below `parent` and wait for its
/// response with [`DEFAULT_RESPONSE_TIMEOUT`].
pub fn send_message(
    parent: &ModuleRef,
    path: &MessagePath,
    message: impl Into<Message>,
) -> Result<Response> {
    send_message_timeout(parent, path, message, DEFAULT_RESPONSE_TIMEOUT)
}

/// Deliver `message` to the module at `path` below `parent`, blocking the
/// calling thread until the target answers or `timeout` elapses.
///
/// Fails with [`RelayError::NoRoute`] when a path segment has no matching
/// child; the message is released without being delivered anywhere.
pub fn send_message_timeout(
    parent: &ModuleRef,
    path: &MessagePath,
    message: impl Into<Message>,
    timeout: Duration,
) -> Result<Response> {
    let message = message.into();

    let Some(target) = parent.resolve(path) else {
        tracing::warn!(%path, from = %parent.class(), "no route for message");
        return Err(RelayError::NoRoute { path: path.clone() });
    };

    let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
    tracing::trace!(%path, ?message, "delivering message");

    if !target.deliver(Envelope::new(message, reply_tx)) {
        return Err(RelayError::ModuleGone);
    }
    drop(target);

    match reply_rx.recv_timeout(timeout) {
        Ok(response) => {
            tracing::trace!(%path, status = %response.status, "response received");
            Ok(response)
        }
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(%path, ?timeout, "message response timed out");
            Err(RelayError::ResponseTimeout { path: path.clone() })
        }
        Err(RecvTimeoutError::Disconnected) => Err(RelayError::ModuleGone),
    }
}
