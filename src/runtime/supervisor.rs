use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::runtime::mailbox::{Address, Worker, WorkerExit, run_worker};

/// A second failure inside this window after a restart keeps the worker
/// dead.
const RESTART_WINDOW: Duration = Duration::from_secs(30);

const STATUS_RUNNING: u8 = 0;
const STATUS_RESTARTING: u8 = 1;
const STATUS_FAULTED: u8 = 2;
const STATUS_STOPPED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Running,
    Restarting,
    Faulted,
    Stopped,
}

impl ChildStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            STATUS_RUNNING => ChildStatus::Running,
            STATUS_RESTARTING => ChildStatus::Restarting,
            STATUS_FAULTED => ChildStatus::Faulted,
            _ => ChildStatus::Stopped,
        }
    }
}

struct Child {
    name: String,
    status: Arc<AtomicU8>,
    monitor: JoinHandle<()>,
    stop: Box<dyn Fn() -> futures::future::BoxFuture<'static, ()> + Send + Sync>,
}

/// Creates, links and restarts workers; owns shutdown.
///
/// Failure policy: an unhandled error or panic inside a worker's message
/// loop restarts it once. A second failure within 30 seconds of that
/// restart marks the child `Faulted` and its address dead. Failures never
/// propagate to siblings. The mailbox survives a restart, so queued
/// messages are preserved while the message that killed the worker is
/// quarantined (it was already consumed).
pub struct Supervisor {
    children: Vec<Child>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    /// Binds a mailbox behind `address` and runs `recipe`-built workers on
    /// it under the restart policy.
    pub async fn supervise<W, F>(&mut self, address: Address<W::Msg>, capacity: usize, recipe: F)
    where
        W: Worker,
        F: Fn() -> W + Send + Sync + 'static,
    {
        let name = address.name().to_string();
        let status = Arc::new(AtomicU8::new(STATUS_RUNNING));

        let (tx, rx) = mpsc::channel(capacity);
        address.bind(tx).await;

        let monitor_status = status.clone();
        let monitor_address = address.clone();
        let monitor_name = name.clone();
        let monitor = tokio::spawn(async move {
            let mut rx = rx;
            let mut last_failure: Option<tokio::time::Instant> = None;
            loop {
                let worker = recipe();
                let (exit, rx_back) = run_worker(worker, rx).await;
                rx = rx_back;
                match exit {
                    WorkerExit::Stopped => {
                        info!(worker = %monitor_name, "Worker stopped");
                        monitor_status.store(STATUS_STOPPED, Ordering::SeqCst);
                        break;
                    }
                    WorkerExit::Failed(_) | WorkerExit::Panicked(_) => {
                        let now = tokio::time::Instant::now();
                        let recently_failed = last_failure
                            .map(|t| now.duration_since(t) < RESTART_WINDOW)
                            .unwrap_or(false);
                        if recently_failed {
                            error!(
                                worker = %monitor_name,
                                "Worker failed twice within the restart window, marking faulted"
                            );
                            monitor_status.store(STATUS_FAULTED, Ordering::SeqCst);
                            break;
                        }
                        last_failure = Some(now);
                        warn!(worker = %monitor_name, "Worker failed, restarting");
                        monitor_status.store(STATUS_RUNNING, Ordering::SeqCst);
                    }
                }
            }
            monitor_address.unbind().await;
        });

        let stop_address = address.clone();
        self.children.push(Child {
            name,
            status,
            monitor,
            stop: Box::new(move || {
                let address = stop_address.clone();
                Box::pin(async move { address.stop().await })
            }),
        });
    }

    pub fn status(&self, name: &str) -> Option<ChildStatus> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .map(|c| ChildStatus::from_u8(c.status.load(Ordering::SeqCst)))
    }

    pub fn statuses(&self) -> Vec<(String, ChildStatus)> {
        self.children
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    ChildStatus::from_u8(c.status.load(Ordering::SeqCst)),
                )
            })
            .collect()
    }

    /// Stops children in reverse registration order, draining each mailbox
    /// before moving on.
    pub async fn shutdown(self) {
        for child in self.children.into_iter().rev() {
            (child.stop)().await;
            if tokio::time::timeout(Duration::from_secs(5), child.monitor)
                .await
                .is_err()
            {
                warn!(worker = %child.name, "Worker did not stop in time");
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
