//! Timer messages.
//!
//! Periodic work is modeled as ordinary messages delivered into the owning
//! worker's mailbox; no background task ever touches worker state directly.

use crate::runtime::mailbox::Address;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Delivers `make()` into the mailbox every `period`. The ticker dies with
/// the worker.
pub fn every<M, F>(address: Address<M>, period: Duration, make: F) -> JoinHandle<()>
where
    M: Send + 'static,
    F: Fn() -> M + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first
        // delivery happens one full period from now.
        interval.tick().await;
        loop {
            interval.tick().await;
            if address.send(make()).await.is_err() {
                break;
            }
        }
    })
}

/// Delivers `msg` once after `delay`.
pub fn once<M: Send + 'static>(address: Address<M>, delay: Duration, msg: M) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = address.send(msg).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mailbox::{Flow, Worker};
    use crate::runtime::supervisor::Supervisor;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct TickCounter {
        ticks: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Worker for TickCounter {
        type Msg = ();

        fn name(&self) -> String {
            "ticks".to_string()
        }

        async fn handle(&mut self, _msg: ()) -> anyhow::Result<Flow> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(Flow::Continue)
        }
    }

    #[tokio::test]
    async fn test_every_delivers_ticks() {
        let ticks = Arc::new(AtomicU32::new(0));
        let mut supervisor = Supervisor::new();
        let address = Address::unbound("ticks");
        let spawn_ticks = ticks.clone();
        supervisor
            .supervise(address.clone(), 64, move || TickCounter {
                ticks: spawn_ticks.clone(),
            })
            .await;

        let timer = every(address.clone(), Duration::from_millis(10), || ());
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.abort();

        assert!(ticks.load(Ordering::SeqCst) >= 3);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_once_fires_once() {
        let ticks = Arc::new(AtomicU32::new(0));
        let mut supervisor = Supervisor::new();
        let address = Address::unbound("ticks");
        let spawn_ticks = ticks.clone();
        supervisor
            .supervise(address.clone(), 64, move || TickCounter {
                ticks: spawn_ticks.clone(),
            })
            .await;

        once(address.clone(), Duration::from_millis(10), ());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        supervisor.shutdown().await;
    }
}
