//! Concurrent event fan-in.
//!
//! The dispatcher runs one producer task per registered [`EventEmitter`], each
//! pushing into a shared bounded channel, and one collector task that drains
//! the channel into the [`PluginContext`]. A full channel blocks producers
//! instead of dropping events.
//!
//! The lifecycle is `Idle -> Running -> Stopped`. `Stopped` is terminal.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::PluginEvent;
use crate::plugin::{
    EventEmitter, PluginContext, PluginError, PluginRegistry, PluginResult, RegisteredEmitter,
};

/// Default capacity of the aggregation channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

const NAME: &str = "event dispatcher";

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Capacity of the aggregation channel (at least 1).
    pub channel_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { channel_capacity: DEFAULT_CHANNEL_CAPACITY }
    }
}

impl DispatcherConfig {
    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self { channel_capacity: channel_capacity.max(1) }
    }
}

/// Point-in-time dispatcher snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherMetrics {
    pub running: bool,
    pub emitter_count: usize,
    /// Events persisted since start.
    pub events_handled: u64,
    /// Events the context failed to persist.
    pub events_failed: u64,
    pub channel_cap: usize,
    /// Events buffered in the channel right now.
    pub channel_len: usize,
}

/// Tasks owned by a running dispatcher.
struct Tasks {
    token: CancellationToken,
    sender: mpsc::Sender<PluginEvent>,
    producers: Vec<(String, JoinHandle<()>)>,
    collector: JoinHandle<()>,
}

/// Fans events from every emitter into one persisted stream.
pub struct EventDispatcher {
    context: Arc<dyn PluginContext>,
    config: DispatcherConfig,
    emitters: RwLock<Vec<RegisteredEmitter>>,
    state: AtomicU8,
    events_handled: Arc<AtomicU64>,
    events_failed: Arc<AtomicU64>,
    channel: RwLock<Option<mpsc::WeakSender<PluginEvent>>>,
    tasks: Mutex<Option<Tasks>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no emitters.
    pub fn new(context: Arc<dyn PluginContext>, config: DispatcherConfig) -> Self {
        Self {
            context,
            config: DispatcherConfig::with_capacity(config.channel_capacity),
            emitters: RwLock::new(Vec::new()),
            state: AtomicU8::new(IDLE),
            events_handled: Arc::new(AtomicU64::new(0)),
            events_failed: Arc::new(AtomicU64::new(0)),
            channel: RwLock::new(None),
            tasks: Mutex::new(None),
        }
    }

    /// Create a dispatcher over every emitter in a registry.
    pub fn from_registry(
        registry: &PluginRegistry,
        context: Arc<dyn PluginContext>,
        config: DispatcherConfig,
    ) -> Self {
        let dispatcher = Self::new(context, config);
        *dispatcher.emitters.write() = registry.event_emitters();
        dispatcher
    }

    /// Add an emitter. Only allowed before [`Self::start`].
    pub fn register_emitter(
        &self,
        plugin: impl Into<String>,
        emitter: Arc<dyn EventEmitter>,
    ) -> PluginResult<()> {
        let mut emitters = self.emitters.write();
        match self.state.load(Ordering::SeqCst) {
            IDLE => {
                emitters.push(RegisteredEmitter { plugin: plugin.into(), emitter });
                Ok(())
            }
            RUNNING => Err(PluginError::AlreadyRunning(NAME.to_string())),
            _ => Err(PluginError::Terminated(NAME.to_string())),
        }
    }

    /// Start one producer per emitter and the collector.
    ///
    /// Must be called inside a Tokio runtime. Cancelling `token` makes every
    /// producer exit at its next send; [`Self::stop`] is still required to
    /// drain and release the collector. An emitter whose stream fails is
    /// logged and the others keep running.
    pub fn start(&self, token: CancellationToken) -> PluginResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PluginError::NoRuntime(e.to_string()))?;

        // Held until the tasks are installed so a concurrent `stop` that sees
        // RUNNING always finds them.
        let mut tasks = self.tasks.lock();
        if let Err(state) =
            self.state.compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        {
            return Err(if state == RUNNING {
                PluginError::AlreadyRunning(NAME.to_string())
            } else {
                PluginError::Terminated(NAME.to_string())
            });
        }

        let (sender, receiver) = mpsc::channel(self.config.channel_capacity);
        *self.channel.write() = Some(sender.downgrade());

        let token = token.child_token();
        let emitters = self.emitters.read().clone();
        let emitter_count = emitters.len();

        let producers = emitters
            .into_iter()
            .map(|RegisteredEmitter { plugin, emitter }| {
                let token = token.clone();
                let sender = sender.clone();
                let name = plugin.clone();
                let handle = runtime.spawn(async move {
                    match emitter.start_event_stream(token, sender).await {
                        Ok(()) => tracing::debug!(plugin = %name, "Event stream ended"),
                        Err(e) => {
                            tracing::warn!(plugin = %name, error = %e, "Event stream failed");
                        }
                    }
                });
                (plugin, handle)
            })
            .collect();

        let collector = runtime.spawn(collect(
            receiver,
            Arc::clone(&self.context),
            Arc::clone(&self.events_handled),
            Arc::clone(&self.events_failed),
        ));

        *tasks = Some(Tasks { token, sender, producers, collector });
        drop(tasks);

        tracing::info!(
            emitters = emitter_count,
            capacity = self.config.channel_capacity,
            "Event dispatcher started"
        );
        Ok(())
    }

    /// Stop every emitter, close the channel and wait for the collector to
    /// drain it.
    ///
    /// Only the first call after [`Self::start`] succeeds; any other call
    /// returns [`PluginError::NotRunning`].
    pub async fn stop(&self) -> PluginResult<()> {
        if self.state.compare_exchange(RUNNING, STOPPED, Ordering::SeqCst, Ordering::SeqCst).is_err()
        {
            return Err(PluginError::NotRunning(NAME.to_string()));
        }

        let tasks = self.tasks.lock().take();
        let Some(Tasks { token, sender, producers, collector }) = tasks else {
            return Ok(());
        };

        let emitters = self.emitters.read().clone();
        for RegisteredEmitter { plugin, emitter } in &emitters {
            if let Err(e) = emitter.stop_event_stream().await {
                tracing::warn!(plugin = %plugin, error = %e, "Failed to stop event stream");
            }
        }

        token.cancel();
        for (plugin, producer) in producers {
            if let Err(e) = producer.await {
                tracing::warn!(plugin = %plugin, error = %e, "Event producer task aborted");
            }
        }

        // Last strong sender owned by the dispatcher; the collector exits once
        // the buffer is empty.
        drop(sender);
        if let Err(e) = collector.await {
            tracing::warn!(error = %e, "Event collector task aborted");
        }

        tracing::info!(
            handled = self.events_handled.load(Ordering::SeqCst),
            failed = self.events_failed.load(Ordering::SeqCst),
            "Event dispatcher stopped"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    pub fn emitter_count(&self) -> usize {
        self.emitters.read().len()
    }

    /// Snapshot of the dispatcher's counters and channel.
    pub fn metrics(&self) -> DispatcherMetrics {
        let sender = self.channel.read().as_ref().and_then(mpsc::WeakSender::upgrade);
        let (channel_cap, channel_len) = match sender {
            Some(sender) => (sender.max_capacity(), sender.max_capacity() - sender.capacity()),
            None => (self.config.channel_capacity, 0),
        };

        DispatcherMetrics {
            running: self.is_running(),
            emitter_count: self.emitter_count(),
            events_handled: self.events_handled.load(Ordering::SeqCst),
            events_failed: self.events_failed.load(Ordering::SeqCst),
            channel_cap,
            channel_len,
        }
    }

    /// Weak handle onto the aggregation channel.
    ///
    /// `None` before [`Self::start`]. A sender upgraded from it keeps the
    /// channel open, so it must be dropped before [`Self::stop`] can finish.
    pub fn event_channel(&self) -> Option<mpsc::WeakSender<PluginEvent>> {
        self.channel.read().clone()
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.token.cancel();
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("config", &self.config)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

async fn collect(
    mut receiver: mpsc::Receiver<PluginEvent>,
    context: Arc<dyn PluginContext>,
    handled: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
) {
    while let Some(event) = receiver.recv().await {
        let event_type = event.event_type.clone();
        let source = event.source.clone();
        match context.emit_event(event).await {
            Ok(()) => {
                handled.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    event_type = %event_type,
                    source = %source,
                    error = %e,
                    "Failed to persist event"
                );
            }
        }
    }
}
