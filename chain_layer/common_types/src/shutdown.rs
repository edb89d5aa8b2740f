//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! A one-shot shutdown flag that fans out to every worker task.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn to_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is triggered. Also resolves if the `Shutdown`
    /// handle is dropped, so orphaned workers still exit.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_resolves_on_trigger() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.to_signal();
        assert!(!signal.is_triggered());
        shutdown.trigger();
        signal.wait().await;
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn signal_resolves_on_drop() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.to_signal();
        drop(shutdown);
        signal.wait().await;
    }
}
