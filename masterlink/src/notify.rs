//! One-shot disconnect signal.

use tokio::sync::oneshot;

/// Producer side of the disconnect signal. Fires at most once.
#[derive(Debug)]
pub struct DisconnectNotifier {
    tx: Option<oneshot::Sender<()>>,
}

impl DisconnectNotifier {
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Returns true if this call fired the signal.
    pub fn fire(&mut self) -> bool {
        let Some(tx) = self.tx.take() else {
            tracing::debug!("Disconnect already signalled");
            return false;
        };
        if tx.send(()).is_err() {
            tracing::debug!("Disconnect receiver dropped, nobody is listening");
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.tx.is_none()
    }
}
