use tokio::sync::{mpsc, watch};

/// Sending half of a broadcast signal without payload.
pub type SignalTx = watch::Sender<()>;

/// Receiving half of a broadcast signal without payload.
pub type SignalRx = watch::Receiver<()>;

/// Creates a new pair of [`SignalTx`] and [`SignalRx`].
pub fn create_signal() -> (SignalTx, SignalRx) {
    watch::channel(())
}

/// A request flag backed by a channel of capacity one.
///
/// Requesting while a request is already pending is a no-op, so any number of failures
/// between two retry cycles collapse into a single retry.
#[derive(Debug)]
pub struct CoalescingSignal {
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
}

impl CoalescingSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx }
    }

    /// Marks a request as pending.
    ///
    /// Returns `false` if a request was already pending and this one was coalesced into it.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }

    /// Consumes the pending request, if any.
    ///
    /// Returns whether a request was pending.
    pub fn take(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Default for CoalescingSignal {
    fn default() -> Self {
        Self::new()
    }
}
