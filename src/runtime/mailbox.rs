use crate::domain::errors::RequestError;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc, oneshot};

/// Mailbox bound for control-plane workers.
pub const CONTROL_CAPACITY: usize = 64;
/// Mailbox bound for hot-path data fan-out.
pub const DATA_CAPACITY: usize = 1024;

/// Default `request` timeout for control messages.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default `request` timeout for hot-path queries.
pub const HOT_PATH_TIMEOUT: Duration = Duration::from_secs(2);

/// A message-driven unit of the system. `handle` runs one message to
/// completion before the next is delivered; concurrency exists only
/// *between* workers.
#[async_trait]
pub trait Worker: Send + 'static {
    type Msg: Send + 'static;

    fn name(&self) -> String;

    async fn on_start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle(&mut self, msg: Self::Msg) -> anyhow::Result<Flow>;

    async fn on_stop(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub(crate) enum Envelope<M> {
    Msg(M),
    /// In-band stop marker: everything enqueued before it still drains.
    Stop,
}

#[derive(Debug)]
pub enum WorkerExit {
    /// Mailbox closed or the worker asked to stop.
    Stopped,
    /// `handle` or `on_start` returned an error.
    Failed(anyhow::Error),
    /// User code inside the worker panicked; the offending message is
    /// consumed and never redelivered.
    Panicked(String),
}

struct Shared<M> {
    name: String,
    tx: RwLock<Option<mpsc::Sender<Envelope<M>>>>,
}

/// Routable handle to a worker's mailbox.
///
/// The address is a stable facade: it survives supervisor restarts of the
/// worker behind it, and reports `DeadActor` once the worker is gone for
/// good. Cloning is cheap and does not confer ownership.
pub struct Address<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for Address<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Outcome of a non-blocking send attempt.
pub enum SendOutcome<M> {
    Delivered,
    /// Mailbox full; the message is handed back so the sender can coalesce.
    Saturated(M),
    Dead,
}

impl<M: Send + 'static> Address<M> {
    /// Creates an unbound address. Sends fail with `DeadActor` until a
    /// supervisor binds a mailbox behind it.
    pub fn unbound(name: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                tx: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn dead(&self) -> RequestError {
        RequestError::DeadActor {
            worker: self.shared.name.clone(),
        }
    }

    pub(crate) async fn bind(&self, tx: mpsc::Sender<Envelope<M>>) {
        *self.shared.tx.write().await = Some(tx);
    }

    pub(crate) async fn unbind(&self) {
        *self.shared.tx.write().await = None;
    }

    pub async fn is_alive(&self) -> bool {
        match self.shared.tx.read().await.as_ref() {
            Some(tx) => !tx.is_closed(),
            None => false,
        }
    }

    /// Fire-and-forget enqueue. Blocks only on mailbox backpressure.
    pub async fn send(&self, msg: M) -> Result<(), RequestError> {
        let guard = self.shared.tx.read().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(Envelope::Msg(msg))
                .await
                .map_err(|_| self.dead()),
            None => Err(self.dead()),
        }
    }

    /// Non-blocking enqueue for droppable data. Never waits.
    pub fn try_send(&self, msg: M) -> SendOutcome<M> {
        let guard = match self.shared.tx.try_read() {
            Ok(guard) => guard,
            Err(_) => return SendOutcome::Saturated(msg),
        };
        match guard.as_ref() {
            Some(tx) => match tx.try_send(Envelope::Msg(msg)) {
                Ok(()) => SendOutcome::Delivered,
                Err(TrySendError::Full(Envelope::Msg(m))) => SendOutcome::Saturated(m),
                Err(TrySendError::Full(Envelope::Stop)) => unreachable!("sent a Msg envelope"),
                Err(TrySendError::Closed(_)) => SendOutcome::Dead,
            },
            None => SendOutcome::Dead,
        }
    }

    /// Correlated round trip. `make` embeds the reply slot into the message;
    /// on timeout the pending slot is simply dropped and a late reply is
    /// discarded by the oneshot.
    pub async fn request<R, F>(&self, make: F, timeout: Duration) -> Result<R, RequestError>
    where
        F: FnOnce(oneshot::Sender<R>) -> M,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Reply slot dropped: the worker died mid-request.
            Ok(Err(_)) => Err(self.dead()),
            Err(_) => Err(RequestError::Timeout {
                worker: self.shared.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Graceful termination: delivered in arrival order, so all previously
    /// enqueued messages drain first.
    pub async fn stop(&self) {
        let guard = self.shared.tx.read().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(Envelope::Stop).await;
        }
    }
}

/// Runs a worker over an existing mailbox receiver. Returns the receiver so
/// a supervisor can hand the surviving queue to a restarted instance; the
/// message that failed is already consumed.
pub(crate) async fn run_worker<W: Worker>(
    mut worker: W,
    mut rx: mpsc::Receiver<Envelope<W::Msg>>,
) -> (WorkerExit, mpsc::Receiver<Envelope<W::Msg>>) {
    let name = worker.name();

    match AssertUnwindSafe(worker.on_start()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return (WorkerExit::Failed(e), rx),
        Err(panic) => return (WorkerExit::Panicked(panic_text(panic)), rx),
    }

    loop {
        let envelope = match rx.recv().await {
            Some(envelope) => envelope,
            None => break,
        };
        match envelope {
            Envelope::Stop => break,
            Envelope::Msg(msg) => {
                match AssertUnwindSafe(worker.handle(msg)).catch_unwind().await {
                    Ok(Ok(Flow::Continue)) => {}
                    Ok(Ok(Flow::Stop)) => break,
                    Ok(Err(e)) => {
                        tracing::error!(worker = %name, error = %e, "Worker message failed");
                        return (WorkerExit::Failed(e), rx);
                    }
                    Err(panic) => {
                        let text = panic_text(panic);
                        tracing::error!(worker = %name, panic = %text, "Worker panicked");
                        return (WorkerExit::Panicked(text), rx);
                    }
                }
            }
        }
    }

    worker.on_stop().await;
    (WorkerExit::Stopped, rx)
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
