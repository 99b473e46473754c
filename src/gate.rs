//! Run supersession.
//!
//! Every pipeline run holds a [`RunTicket`] stamped with the gate's epoch.
//! Starting a new run or signing out bumps the epoch, which wakes every
//! suspended step of an older run so it can stop without producing an outcome.

use std::future::Future;
use tokio::sync::watch;

#[derive(Debug)]
pub struct RunGate {
    epoch: watch::Sender<u64>,
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RunGate {
    pub fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        RunGate { epoch }
    }

    /// Invalidate every outstanding ticket and hand out a fresh one
    pub fn begin(&self) -> RunTicket {
        self.invalidate();
        self.current()
    }

    /// Ticket for the current epoch, without superseding anything
    pub fn current(&self) -> RunTicket {
        let rx = self.epoch.subscribe();
        let epoch = *rx.borrow();
        RunTicket { epoch, rx }
    }

    /// Invalidate every outstanding ticket
    pub fn invalidate(&self) {
        self.epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }
}

#[derive(Debug)]
pub struct RunTicket {
    epoch: u64,
    rx: watch::Receiver<u64>,
}

impl RunTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self) -> bool {
        *self.rx.borrow() == self.epoch
    }

    /// Resolves once the ticket has been superseded
    pub async fn superseded(&mut self) {
        loop {
            if *self.rx.borrow_and_update() != self.epoch {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Gate dropped: nothing can supersede this ticket any more.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` unless the ticket is superseded first
    ///
    /// # Returns
    /// * `Option<F::Output>` - The future's output, or `None` if the run was
    ///   superseded before it completed (the future is dropped)
    pub async fn guard<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if !self.is_current() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.superseded() => None,
            out = fut => Some(out),
        }
    }
}
