//! Background lease renewal.

use mobilize_core::JobId;
use mobilize_db::JobStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, warn};

/// Renews a worker's lease every `ttl / 3` until stopped. Once a renewal
/// finds the lease gone, [`LeaseKeeper::is_lost`] turns true and the keeper
/// exits.
pub struct LeaseKeeper {
    lost: Arc<AtomicBool>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    pub fn spawn(store: Arc<dyn JobStore>, job_id: JobId, worker: String, ttl: Duration) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let (stop, mut stopped) = oneshot::channel();
        let period = (ttl / 3).max(Duration::from_millis(10));

        let flag = lost.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        match store.renew_lease(job_id, &worker, ttl).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!(%job_id, worker_id = %worker, "Lease lost");
                                flag.store(true, Ordering::SeqCst);
                                break;
                            }
                            Err(e) => warn!(%job_id, error = %e, "Failed to renew lease"),
                        }
                    }
                }
            }
            debug!(%job_id, "Lease keeper stopped");
        });

        Self {
            lost,
            stop: Some(stop),
            handle,
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.handle).await;
    }
}
