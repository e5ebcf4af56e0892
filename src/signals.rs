//! Signal handling for graceful shutdown.
//!
//! First SIGINT or SIGTERM: stop the session at the next tick, close the
//! browser and exit without sending a completion notice.
//! Second signal: abandon the current step immediately. The browser is still
//! closed so its process group does not outlive us.
//! A third signal exits on the spot.
use tokio::sync::watch;

/// How hard the session has been asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownLevel {
    Running,
    /// Stop at the next tick or during the current wait.
    Graceful,
    /// Stop now, even in the middle of a browser command.
    Force,
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<ShutdownLevel>,
}

impl ShutdownSignal {
    /// Install process signal handlers.
    pub fn install() -> std::io::Result<Self> {
        let (tx, rx) = watch::channel(ShutdownLevel::Running);

        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::spawn(async move {
            let mut received = 0u32;
            loop {
                tokio::select! {
                    r = tokio::signal::ctrl_c() => {
                        if r.is_err() {
                            return;
                        }
                    }
                    _ = sigterm.recv() => {}
                }

                received += 1;
                match received {
                    1 => {
                        tracing::warn!("interrupt received, stopping after the current step");
                        let _ = tx.send(ShutdownLevel::Graceful);
                    }
                    2 => {
                        tracing::warn!("second interrupt, abandoning the current step");
                        let _ = tx.send(ShutdownLevel::Force);
                    }
                    _ => {
                        tracing::warn!("third interrupt, exiting immediately");
                        std::process::exit(130);
                    }
                }
            }
        });

        Ok(Self { rx })
    }

    /// A signal driven by the returned sender instead of the OS.
    pub fn manual() -> (watch::Sender<ShutdownLevel>, Self) {
        let (tx, rx) = watch::channel(ShutdownLevel::Running);
        (tx, Self { rx })
    }

    pub fn requested(&self) -> bool {
        *self.rx.borrow() >= ShutdownLevel::Graceful
    }

    /// Resolve once any shutdown is requested.
    pub async fn wait(&mut self) {
        self.wait_for(ShutdownLevel::Graceful).await
    }

    /// Resolve once a forced stop is requested.
    pub async fn forced(&mut self) {
        self.wait_for(ShutdownLevel::Force).await
    }

    /// Never resolves if the sender is dropped below `level`.
    async fn wait_for(&mut self, level: ShutdownLevel) {
        loop {
            if *self.rx.borrow_and_update() >= level {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_manual_signal_starts_clear() {
        let (_tx, signal) = ShutdownSignal::manual();
        assert!(!signal.requested());
    }

    #[tokio::test]
    async fn test_wait_resolves_after_request() {
        let (tx, mut signal) = ShutdownSignal::manual();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(ShutdownLevel::Graceful).unwrap();
        });
        tokio::time::timeout(Duration::from_secs(2), signal.wait())
            .await
            .expect("wait should resolve");
        assert!(signal.requested());
    }

    #[tokio::test]
    async fn test_graceful_does_not_force() {
        let (tx, mut signal) = ShutdownSignal::manual();
        tx.send(ShutdownLevel::Graceful).unwrap();
        let forced = tokio::time::timeout(Duration::from_millis(50), signal.forced()).await;
        assert!(forced.is_err());

        tx.send(ShutdownLevel::Force).unwrap();
        tokio::time::timeout(Duration::from_secs(2), signal.forced())
            .await
            .expect("forced should resolve");
        assert!(signal.requested());
    }

    #[tokio::test]
    async fn test_force_also_satisfies_wait() {
        let (tx, mut signal) = ShutdownSignal::manual();
        tx.send(ShutdownLevel::Force).unwrap();
        tokio::time::timeout(Duration::from_secs(2), signal.wait())
            .await
            .expect("wait should resolve");
    }

    #[tokio::test]
    async fn test_wait_pends_when_sender_dropped() {
        let (tx, mut signal) = ShutdownSignal::manual();
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.wait()).await;
        assert!(waited.is_err());
        assert!(!signal.requested());
    }
}
