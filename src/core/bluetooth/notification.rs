//! Notification handling for the session
//! Routes payloads from the notify characteristic to the one command waiting
//! for a response.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::peripheral::NotificationReceiver;
use crate::core::error::{Activity, Error, Result};

type Waiter = oneshot::Sender<Result<Vec<u8>>>;

/// Single-slot sink for command responses.
#[derive(Default)]
pub struct NotificationSink {
    waiter: Mutex<Option<Waiter>>,
}

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Waiter>> {
        self.waiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the waiter for the next payload. Fails while another live
    /// waiter is registered; a waiter whose receiver was dropped counts as
    /// free.
    pub fn register(&self) -> Result<oneshot::Receiver<Result<Vec<u8>>>> {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|waiter| !waiter.is_closed()) {
            return Err(Error::Busy(Activity::AwaitingResponse));
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(tx);
        Ok(rx)
    }

    /// Hand a payload to the waiter, if any. Returns whether it was taken.
    pub fn deliver(&self, payload: Vec<u8>) -> bool {
        match self.slot().take() {
            Some(waiter) => waiter.send(Ok(payload)).is_ok(),
            None => {
                debug!("Dropping unsolicited notification: {:02x?}", payload);
                false
            }
        }
    }

    /// Fail the pending waiter, if any.
    pub fn fail(&self, err: Error) {
        if let Some(waiter) = self.slot().take() {
            let _ = waiter.send(Err(err));
        }
    }

    /// Drop the pending waiter without resolving it.
    pub fn clear(&self) {
        self.slot().take();
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.slot().as_ref().is_some_and(|waiter| !waiter.is_closed())
    }
}

/// Forward notifications into the sink until cancelled or the stream ends.
pub fn spawn_forwarder(
    mut notifications: NotificationReceiver,
    sink: std::sync::Arc<NotificationSink>,
    cancel_token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                payload = notifications.recv() => match payload {
                    Some(payload) => {
                        debug!("Received notification: {:02x?}", payload);
                        sink.deliver(payload);
                    }
                    None => break,
                },
            }
        }
        info!("Notification forwarder stopped");
    });
}
