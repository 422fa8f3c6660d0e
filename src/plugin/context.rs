//! Host services handed to plugins.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::PluginResult;
use crate::core::{Event, EventRepository, PluginEvent};

/// Services the host exposes to plugins and the dispatcher.
#[async_trait]
pub trait PluginContext: Send + Sync {
    /// Directory the host is operating in.
    fn working_dir(&self) -> &Path;

    /// Persist an emitted event.
    async fn emit_event(&self, event: PluginEvent) -> PluginResult<()>;
}

/// [`PluginContext`] backed by an [`EventRepository`].
pub struct HostContext {
    working_dir: PathBuf,
    repository: Arc<dyn EventRepository>,
}

impl HostContext {
    pub fn new(working_dir: impl Into<PathBuf>, repository: Arc<dyn EventRepository>) -> Self {
        Self { working_dir: working_dir.into(), repository }
    }

    pub fn repository(&self) -> &Arc<dyn EventRepository> {
        &self.repository
    }
}

#[async_trait]
impl PluginContext for HostContext {
    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn emit_event(&self, event: PluginEvent) -> PluginResult<()> {
        let event = Event::from_plugin_event(event);
        tracing::trace!(id = %event.id, event_type = %event.event_type, "Persisting event");
        self.repository.save(&event).await
    }
}

/// Per-invocation context passed to [`super::Command::execute`].
pub struct CommandContext {
    plugin: Arc<dyn PluginContext>,
    stdout: Box<dyn Write + Send>,
    stdin: Box<dyn BufRead + Send>,
}

impl CommandContext {
    /// Context wired to the process stdout and stdin.
    pub fn new(plugin: Arc<dyn PluginContext>) -> Self {
        Self {
            plugin,
            stdout: Box::new(io::stdout()),
            stdin: Box::new(io::BufReader::new(io::stdin())),
        }
    }

    /// Context writing to `stdout` with empty input.
    pub fn with_output(plugin: Arc<dyn PluginContext>, stdout: impl Write + Send + 'static) -> Self {
        Self { plugin, stdout: Box::new(stdout), stdin: Box::new(io::empty()) }
    }

    pub fn with_stdin(mut self, stdin: impl BufRead + Send + 'static) -> Self {
        self.stdin = Box::new(stdin);
        self
    }

    pub fn stdout(&mut self) -> &mut (dyn Write + Send) {
        self.stdout.as_mut()
    }

    pub fn stdin(&mut self) -> &mut (dyn BufRead + Send) {
        self.stdin.as_mut()
    }

    pub fn working_dir(&self) -> &Path {
        self.plugin.working_dir()
    }

    pub fn plugin_context(&self) -> &Arc<dyn PluginContext> {
        &self.plugin
    }

    /// Persist an event through the host.
    ///
    /// The returned future does not borrow the context, so commands can await
    /// it while holding `&mut CommandContext`.
    pub fn emit_event(
        &self,
        event: PluginEvent,
    ) -> impl Future<Output = PluginResult<()>> + Send + 'static {
        let plugin = Arc::clone(&self.plugin);
        async move { plugin.emit_event(event).await }
    }
}

/// Cloneable in-memory writer for capturing command output.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured output as lossy UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
