use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Graceful shutdown coordinator
#[derive(Clone)]
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<()>,
    components: Arc<Mutex<Vec<ShutdownComponent>>>,
    drain_period: Duration,
}

/// Type alias for shutdown function result
type ShutdownResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Type alias for shutdown function
type ShutdownFn = Box<dyn Fn() -> tokio::task::JoinHandle<ShutdownResult> + Send + Sync>;

/// A component that needs to be shut down gracefully
struct ShutdownComponent {
    name: String,
    shutdown_fn: ShutdownFn,
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl GracefulShutdown {
    /// `drain_period` is how long in-flight verifications get after the signal
    pub fn new(drain_period: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            components: Arc::new(Mutex::new(Vec::new())),
            drain_period,
        }
    }

    /// Get a shutdown receiver for components to listen on
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Register a component for graceful shutdown
    pub async fn register_component<F, Fut>(&self, name: impl Into<String>, shutdown_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ShutdownResult> + Send + 'static,
    {
        let component = ShutdownComponent {
            name: name.into(),
            shutdown_fn: Box::new(move || {
                let fut = shutdown_fn();
                tokio::spawn(fut)
            }),
        };

        self.components.lock().await.push(component);
    }

    /// Initiate graceful shutdown
    pub async fn shutdown(&self) -> ShutdownResult {
        info!("Initiating graceful shutdown...");

        // Timers and the HTTP listener stop picking up new work
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        info!("Waiting {:?} for in-flight verifications...", self.drain_period);
        tokio::time::sleep(self.drain_period).await;

        let components = self.components.lock().await;
        let mut handles = Vec::new();

        for component in components.iter() {
            info!("Shutting down component: {}", component.name);
            let handle = (component.shutdown_fn)();
            handles.push((component.name.clone(), handle));
        }

        for (name, handle) in handles {
            match timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(Ok(()))) => {
                    info!("Component '{}' shut down successfully", name);
                }
                Ok(Ok(Err(e))) => {
                    error!("Component '{}' shutdown failed: {}", name, e);
                }
                Ok(Err(e)) => {
                    error!("Component '{}' shutdown task panicked: {}", name, e);
                }
                Err(_) => {
                    warn!("Component '{}' shutdown timed out", name);
                }
            }
        }

        info!("Graceful shutdown completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_shutdown_signals_and_runs_components() {
        let shutdown = GracefulShutdown::new(Duration::from_millis(1));
        let mut rx = shutdown.subscribe();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        shutdown
            .register_component("status-store", move || {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        shutdown.shutdown().await.unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(ran.load(Ordering::SeqCst));
    }
}
