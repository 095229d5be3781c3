//! Rendezvous channel between the poll loop and its consumer.
//!
//! A send completes only once the receiver has taken the value, so a slow
//! consumer holds the producer back instead of values piling up. tokio's
//! bounded channel needs a capacity of at least one, so every value travels
//! with a oneshot acknowledgement that the sender waits on.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send cancelled")]
    Cancelled,
    #[error("receiver closed")]
    Closed,
}

struct Envelope<T> {
    value: T,
    ack: oneshot::Sender<()>,
}

pub struct HandoffSender<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

pub fn channel<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl<T> HandoffSender<T> {
    /// Waits until the receiver has taken `value` or `cancel` fires.
    pub async fn send(&self, value: T, cancel: &CancellationToken) -> Result<(), SendError> {
        let (ack, acked) = oneshot::channel();
        let deliver = async {
            self.tx
                .send(Envelope { value, ack })
                .await
                .map_err(|_| SendError::Closed)?;
            acked.await.map_err(|_| SendError::Closed)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SendError::Cancelled),
            res = deliver => res,
        }
    }
}

impl<T> HandoffReceiver<T> {
    /// Next value, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let Envelope { value, ack } = self.rx.recv().await?;
            // A sender that gave up on cancellation no longer waits for the
            // ack; its value is not delivered.
            if ack.send(()).is_ok() {
                return Some(value);
            }
        }
    }
}
