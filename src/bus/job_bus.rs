use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use std::sync::Mutex as SyncMutex;

use crate::error::{AppError, AppResult};

use super::inflight::InFlightCounter;

/// A job routed through the bus by stream name, carrying an opaque payload.
/// The forwarder uses this to carry a batch id (see `ForwardJob`); nothing
/// about the bus itself is forwarder-specific.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub stream_name: String,
    pub data: Vec<u8>,
}

impl BusMessage {
    pub fn new(stream_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            stream_name: stream_name.into(),
            data,
        }
    }
}

#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle(&self, msg: BusMessage) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    New,
    Running,
    ShuttingDown,
    Terminated,
}

impl From<u8> for BusState {
    fn from(v: u8) -> Self {
        match v {
            0 => BusState::New,
            1 => BusState::Running,
            2 => BusState::ShuttingDown,
            _ => BusState::Terminated,
        }
    }
}

#[derive(Clone)]
pub struct JobBusConfig {
    /// Buffered channel capacity for the internal queue.
    pub queue_buffer: usize,
    /// Per-handler timeout; a subscriber that exceeds this is treated as
    /// failed for that delivery (the job itself is not retried by the bus,
    /// only the forwarder's own retry middleware retries jobs).
    pub handler_timeout: Duration,
}

impl Default for JobBusConfig {
    fn default() -> Self {
        Self {
            queue_buffer: 256,
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// Single-process, in-memory fan-out bus. Never a global singleton: every
/// agent owns its own instance (see `SPEC_FULL.md`'s default-bus-singleton
/// redesign note).
pub struct JobBus {
    tx: mpsc::Sender<BusMessage>,
    rx: AsyncMutex<Option<mpsc::Receiver<BusMessage>>>,
    subscribers: SyncMutex<HashMap<String, Vec<Arc<dyn BusHandler>>>>,
    in_flight: Arc<InFlightCounter>,
    state: AtomicU8,
    ready: Notify,
    cfg: JobBusConfig,
}

impl JobBus {
    pub fn new(cfg: JobBusConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(cfg.queue_buffer);
        Arc::new(Self {
            tx,
            rx: AsyncMutex::new(Some(rx)),
            subscribers: SyncMutex::new(HashMap::new()),
            in_flight: InFlightCounter::new(),
            state: AtomicU8::new(BusState::New as u8),
            ready: Notify::new(),
            cfg,
        })
    }

    fn state(&self) -> BusState {
        BusState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn subscribe(&self, stream_name: impl Into<String>, handler: Arc<dyn BusHandler>) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.entry(stream_name.into()).or_default().push(handler);
    }

    /// Publishes a job onto the bus. Rejects empty payloads and publishes
    /// once the bus has begun shutting down, mirroring
    /// `ErrEmptyMessage`/`ErrBusIsShutdown` from the source.
    pub async fn publish(&self, msg: BusMessage) -> AppResult<()> {
        if self.state() != BusState::Running && self.state() != BusState::New {
            return Err(AppError::BusShutdown);
        }
        if msg.data.is_empty() {
            return Err(AppError::EmptyMessage);
        }

        self.in_flight.add(1);
        if self.tx.send(msg).await.is_err() {
            self.in_flight.done();
            return Err(AppError::BusShutdown);
        }
        Ok(())
    }

    /// Runs the dispatch loop until the bus is shut down. Intended to be
    /// spawned as its own task by the owning agent.
    pub async fn start(self: Arc<Self>) -> AppResult<()> {
        self.state.store(BusState::Running as u8, Ordering::SeqCst);
        self.ready.notify_waiters();

        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .expect("JobBus::start must only be called once");

        while let Some(msg) = rx.recv().await {
            let subs = {
                let subs = self.subscribers.lock().unwrap();
                subs.get(&msg.stream_name).cloned().unwrap_or_default()
            };

            if subs.is_empty() {
                // Root lock released with nothing handed to a child.
                self.in_flight.done();
                continue;
            }

            self.in_flight.add(subs.len() as u64);
            self.in_flight.done();

            for handler in subs {
                let msg = msg.clone();
                let in_flight = self.in_flight.clone();
                let timeout = self.cfg.handler_timeout;

                tokio::spawn(async move {
                    let result = tokio::time::timeout(timeout, handler.handle(msg)).await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::warn!(error = %err, "bus handler returned an error");
                        }
                        Err(_) => {
                            tracing::warn!("bus handler exceeded its timeout");
                        }
                    }
                    in_flight.done();
                });
            }
        }

        Ok(())
    }

    /// Drains in-flight work, then stops accepting new publishes. Safe to
    /// call concurrently with `publish`; once `ShuttingDown` is observed,
    /// `publish` starts returning `AppError::BusShutdown`.
    pub async fn shutdown(&self) {
        let prev = self
            .state
            .swap(BusState::ShuttingDown as u8, Ordering::SeqCst);
        if prev == BusState::ShuttingDown as u8 || prev == BusState::Terminated as u8 {
            return;
        }

        self.in_flight.wait_zero().await;
        self.state.store(BusState::Terminated as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BusHandler for CountingHandler {
        async fn handle(&self, _msg: BusMessage) -> AppResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_published_messages_to_subscribers() {
        let bus = JobBus::new(JobBusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            "forward-jobs",
            Arc::new(CountingHandler {
                count: count.clone(),
            }),
        );

        let bus_clone = bus.clone();
        let runner = tokio::spawn(async move { bus_clone.start().await });

        bus.publish(BusMessage::new("forward-jobs", b"batch-1".to_vec()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.shutdown().await;
        runner.abort();
    }

    #[tokio::test]
    async fn rejects_empty_payloads() {
        let bus = JobBus::new(JobBusConfig::default());
        let err = bus
            .publish(BusMessage::new("forward-jobs", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyMessage));
    }

    #[tokio::test]
    async fn rejects_publish_after_shutdown() {
        let bus = JobBus::new(JobBusConfig::default());
        bus.shutdown().await;

        let err = bus
            .publish(BusMessage::new("forward-jobs", b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BusShutdown));
    }

    #[tokio::test]
    async fn publish_to_unknown_stream_still_releases_the_root_lock() {
        let bus = JobBus::new(JobBusConfig::default());
        let bus_clone = bus.clone();
        let runner = tokio::spawn(async move { bus_clone.start().await });

        bus.publish(BusMessage::new("nobody-listens", b"x".to_vec()))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_millis(100), bus.in_flight.wait_zero())
            .await
            .expect("in-flight count should drain even with no subscribers");

        bus.shutdown().await;
        runner.abort();
    }
}
