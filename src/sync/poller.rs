use async_trait::async_trait;
use log::{ debug, info };
use std::sync::{ Arc, Weak };
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{ interval_at, Instant, MissedTickBehavior };

#[async_trait]
pub trait RefreshTarget: Send + Sync + 'static {
    /// Re-fetch without touching loading indicators or surfacing errors.
    async fn silent_refresh(&self);
}

/// Background timer driving periodic silent refreshes.
///
/// The first refresh fires one full period after `start`; the task stops on its own
/// once the target has been dropped.
pub struct PollingRefresher {
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl PollingRefresher {
    pub fn new(period: Duration) -> Self {
        Self { period, task: None }
    }

    /// Returns false if already running.
    pub fn start(&mut self, target: Arc<dyn RefreshTarget>) -> bool {
        if self.is_running() {
            return false;
        }
        let period = self.period;
        let target: Weak<dyn RefreshTarget> = Arc::downgrade(&target);
        self.task = Some(
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(target) = target.upgrade() else {
                        debug!("Refresh target gone, stopping poller");
                        return;
                    };
                    target.silent_refresh().await;
                }
            })
        );
        info!("Polling refresher started (every {:?})", period);
        true
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Polling refresher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for PollingRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}
