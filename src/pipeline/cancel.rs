use tokio::sync::watch;

/// Creates a linked cancel handle / cancellation pair
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

/// Held by the collaborator that may stop a run (for example a Ctrl-C handler)
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Checked by the pipeline before pulling each new raw record
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A cancellation that never fires
    pub fn never() -> Self {
        let (_handle, cancellation) = cancellation();
        cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_observed_by_clones() {
        let (handle, cancellation) = cancellation();
        let observer = cancellation.clone();
        assert!(!observer.is_cancelled());
        handle.cancel();
        assert!(cancellation.is_cancelled());
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_never_stays_uncancelled() {
        assert!(!Cancellation::never().is_cancelled());
    }
}
