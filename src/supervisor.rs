//! Runs one publisher per configured stream until shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::publisher::{Backends, Publisher, PublisherSettings, PublisherState};

pub struct Supervisor {
    publishers: Vec<Arc<Publisher>>,
    cancel: CancellationToken,
    restart_delay: Duration,
}

impl Supervisor {
    pub fn new(config: &AppConfig, backends: Backends) -> Self {
        let cancel = CancellationToken::new();
        let settings = Arc::new(PublisherSettings::from(config));

        let publishers = config
            .streams
            .iter()
            .map(|stream| {
                Arc::new(Publisher::new(
                    stream.clone(),
                    settings.clone(),
                    backends.clone(),
                    cancel.child_token(),
                ))
            })
            .collect();

        Self {
            publishers,
            cancel,
            restart_delay: settings.initial_backoff,
        }
    }

    /// Cancelling this token stops every publisher
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// State watch for the named stream
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<PublisherState>> {
        self.publishers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.subscribe())
    }

    /// Run every publisher until `shutdown` resolves or the cancel token
    /// fires, then wait for all of them to tear down.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Supervisor {
            publishers,
            cancel,
            restart_delay,
        } = self;

        let mut tasks = JoinSet::new();
        for publisher in publishers {
            tasks.spawn(keep_running(publisher, cancel.clone(), restart_delay));
        }
        log::info!("supervising {} stream(s)", tasks.len());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("shutdown requested, stopping publishers");
                    cancel.cancel();
                    break;
                }
                _ = cancel.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => log::warn!("publisher task ended abnormally: {}", e),
                    None => break,
                },
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::debug!("publisher task error during shutdown: {}", e);
            }
        }
        log::info!("all publishers stopped");
    }
}

/// Run `publisher` on its own task, restarting it after a panic until
/// `cancel` fires.
async fn keep_running(publisher: Arc<Publisher>, cancel: CancellationToken, delay: Duration) {
    loop {
        let task = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.run().await })
        };

        match task.await {
            Ok(()) => return,
            Err(e) if e.is_panic() => {
                log::warn!(
                    "[{}] publisher panicked, restarting in {}s",
                    publisher.name(),
                    delay.as_secs()
                );
            }
            Err(e) => {
                log::warn!("[{}] publisher task ended abnormally: {}", publisher.name(), e);
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
