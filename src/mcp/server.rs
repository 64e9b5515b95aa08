//! MCP server transport loop.
//!
//! This module implements the server lifecycle:
//!
//! 1. **Reading**: a dedicated task reads framed lines so a blocked read
//!    never stalls replies
//! 2. **Dispatch**: each message goes through the [`Dispatcher`]; registry
//!    work is run on a bounded worker pool and may complete out of order
//! 3. **Writing**: a single writer task owns the output stream, so
//!    messages are never interleaved
//! 4. **Shutdown**: a `shutdown` request or signal lets in-flight work
//!    finish; transport EOF drops outstanding results
//!
//! Reload events from the watcher are forwarded to the client as
//! `notifications/<family>/list_changed` once the session is ready.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::Config;
use crate::mcp::dispatcher::{Dispatcher, Job, Route, SessionState};
use crate::mcp::error::McpError;
use crate::mcp::metrics::RequestMetrics;
use crate::mcp::protocol::{
    parse_message, JsonRpcError, JsonRpcResponse, OutgoingNotification, RequestId,
};
use crate::mcp::transport::{self, Frame, FramedReader, FramedWriter};
use crate::reload::{ReloadEvent, Registries};

/// Lines buffered between the reader task and the dispatch loop.
const READ_BUFFER: usize = 64;

/// Tunables for [`McpServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    /// Maximum number of registry requests running at once.
    pub workers: usize,
    /// Per-request deadline. `None` means no deadline.
    pub request_timeout: Option<Duration>,
    /// Advertise `listChanged` and forward reload notifications.
    pub hot_reload: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            request_timeout: None,
            hot_reload: false,
        }
    }
}

impl ServerOptions {
    /// Options taken from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.workers,
            request_timeout: config.request_timeout(),
            hot_reload: config.hot_reload.enabled,
        }
    }
}

/// How the dispatch loop ended.
#[derive(Debug)]
enum Ending {
    /// `shutdown` request or signal: finish in-flight work.
    Graceful,
    /// Input closed: drop outstanding results.
    Eof,
    /// Reading failed.
    Failed(io::Error),
}

/// Sending half of the writer task.
#[derive(Debug, Clone)]
struct Outbox {
    lines: UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

impl Outbox {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn send<T: Serialize>(&self, message: &T) {
        if !self.is_open() {
            tracing::debug!("Transport closed, dropping outgoing message");
            return;
        }
        match transport::encode(message) {
            Ok(line) => {
                if self.lines.send(line).is_err() {
                    tracing::warn!("Writer has stopped, marking transport closed");
                    self.close();
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode outgoing message"),
        }
    }

    /// Answers request `id`. Returns the error kind for failed requests.
    fn reply(&self, id: RequestId, result: Result<Value, McpError>) -> Option<&'static str> {
        match result {
            Ok(value) => {
                self.send(&JsonRpcResponse::success(id, value));
                None
            }
            Err(error) => {
                let kind = error.kind();
                tracing::debug!(%id, kind, error = %error, "Request failed");
                self.send(&error.into_response(Some(id)));
                Some(kind)
            }
        }
    }
}

/// The MCP server: one session over one transport.
#[derive(Debug)]
pub struct McpServer {
    dispatcher: Dispatcher,
    options: ServerOptions,
    permits: Arc<Semaphore>,
    metrics: Arc<RequestMetrics>,
    reload_events: Option<UnboundedReceiver<ReloadEvent>>,
}

impl McpServer {
    /// Creates a server over the given registries.
    #[must_use]
    pub fn new(registries: Arc<Registries>, options: ServerOptions) -> Self {
        Self {
            dispatcher: Dispatcher::new(registries, options.hot_reload),
            permits: Arc::new(Semaphore::new(options.workers.max(1))),
            metrics: Arc::new(RequestMetrics::new()),
            options,
            reload_events: None,
        }
    }

    /// Forwards reload events to the client as list-changed notifications.
    #[must_use]
    pub fn with_reload_events(mut self, events: UnboundedReceiver<ReloadEvent>) -> Self {
        self.reload_events = Some(events);
        self
    }

    /// Request metrics for this session.
    #[must_use]
    pub fn metrics(&self) -> Arc<RequestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Current session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.dispatcher.state()
    }

    /// Serves stdin/stdout until the client disconnects, sends `shutdown`,
    /// or the process receives SIGINT/SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed or transport
    /// I/O fails.
    #[cfg(unix)]
    pub async fn run(self) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let shutdown = async move {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
        };

        let (reader, writer) = transport::stdio();
        self.serve_until(reader, writer, shutdown).await
    }

    /// Serves stdin/stdout until the client disconnects, sends `shutdown`,
    /// or the process receives Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    #[cfg(windows)]
    pub async fn run(self) -> io::Result<()> {
        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            } else {
                std::future::pending::<()>().await;
            }
        };

        let (reader, writer) = transport::stdio();
        self.serve_until(reader, writer, shutdown).await
    }

    /// Serves one session over the given transport halves.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub async fn serve<R, W>(self, reader: FramedReader<R>, writer: FramedWriter<W>) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.serve_until(reader, writer, std::future::pending()).await
    }

    /// Serves one session until it ends or `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub async fn serve_until<R, W, F>(
        mut self,
        reader: FramedReader<R>,
        writer: FramedWriter<W>,
        shutdown: F,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        let (mut lines, reader_task) = spawn_reader(reader);
        let (outbox, writer_task) = spawn_writer(writer);
        let mut in_flight = JoinSet::new();
        let mut reload_events = self.reload_events.take();
        tokio::pin!(shutdown);

        tracing::info!(workers = self.options.workers, "Serving session");

        let ending = loop {
            tokio::select! {
                incoming = lines.recv() => match incoming {
                    Some(Ok(Frame::Text(line))) => {
                        self.handle_line(&line, &outbox, &mut in_flight);
                        if self.dispatcher.state() == SessionState::Closed {
                            break Ending::Graceful;
                        }
                    }
                    Some(Ok(Frame::Malformed(len))) => {
                        tracing::warn!(len, "Rejected line that is not UTF-8");
                        outbox.send(&JsonRpcError::parse_error());
                    }
                    Some(Err(e)) => break Ending::Failed(e),
                    None => break Ending::Eof,
                },

                event = next_event(&mut reload_events) => match event {
                    Some(event) => self.forward_reload(event, &outbox),
                    None => reload_events = None,
                },

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }

                () = &mut shutdown => break Ending::Graceful,
            }
        };

        reader_task.abort();
        self.dispatcher.close();

        let result = match ending {
            Ending::Graceful => {
                tracing::info!(pending = in_flight.len(), "Waiting for in-flight requests");
                while let Some(joined) = in_flight.join_next().await {
                    log_join(joined);
                }
                Ok(())
            }
            Ending::Eof => {
                tracing::info!(dropped = in_flight.len(), "Client closed the transport");
                outbox.close();
                in_flight.shutdown().await;
                Ok(())
            }
            Ending::Failed(e) => {
                tracing::error!(error = %e, "Failed to read from transport");
                outbox.close();
                in_flight.shutdown().await;
                Err(e)
            }
        };

        let summary = self.metrics.snapshot();
        tracing::info!(
            requests = summary.request_count,
            errors = summary.error_count,
            average_ms = summary.average_response_ms,
            p90_ms = summary.response_ms.p90,
            "Session metrics"
        );

        drop(outbox);
        let written = writer_task
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));
        result.and(written)
    }

    fn handle_line(&mut self, line: &str, outbox: &Outbox, in_flight: &mut JoinSet<()>) {
        if line.trim().is_empty() {
            return;
        }

        let received = Instant::now();
        let message = match parse_message(line) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(code = error.error.code, "Rejected malformed message");
                outbox.send(&error);
                return;
            }
        };

        let method = message.method().to_string();
        match self.dispatcher.dispatch(message) {
            Route::Reply(id, result) => {
                let failed = outbox.reply(id, result);
                self.metrics.record(&method, None, received.elapsed(), failed);
            }
            Route::Work(job) => self.spawn_job(job, outbox.clone(), in_flight),
            Route::Ignore => {}
        }
    }

    fn spawn_job(&self, job: Job, outbox: Outbox, in_flight: &mut JoinSet<()>) {
        let permits = Arc::clone(&self.permits);
        let metrics = Arc::clone(&self.metrics);
        let timeout = self.options.request_timeout;
        let received = Instant::now();
        in_flight.spawn(async move {
            let id = job.id().clone();
            let method = job.method();
            let tool = job.tool().map(str::to_string);
            let result = match permits.acquire_owned().await {
                Ok(permit) => run_job(job, permit, timeout).await,
                Err(_) => Err(McpError::Internal("worker pool closed".to_string())),
            };
            let failed = outbox.reply(id, result);
            metrics.record(method, tool.as_deref(), received.elapsed(), failed);
        });
    }

    fn forward_reload(&self, event: ReloadEvent, outbox: &Outbox) {
        if !self.options.hot_reload || self.dispatcher.state() != SessionState::Ready {
            return;
        }
        tracing::debug!(family = event.family(), "Notifying client of list change");
        outbox.send(&OutgoingNotification::list_changed(event.family()));
    }
}

/// Runs `job` on the blocking pool. The permit is held until the handler
/// returns, even when the deadline has already been reported.
async fn run_job(
    job: Job,
    permit: OwnedSemaphorePermit,
    timeout: Option<Duration>,
) -> Result<Value, McpError> {
    let method = job.method();
    let task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        job.run()
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(method, ?limit, "Request exceeded deadline");
                return Err(McpError::Timeout(limit));
            }
        },
        None => task.await,
    };

    joined.unwrap_or_else(|e| {
        tracing::error!(method, error = %e, "Worker failed");
        Err(McpError::Internal(format!("{method} failed unexpectedly")))
    })
}

fn spawn_reader<R>(
    mut reader: FramedReader<R>,
) -> (mpsc::Receiver<io::Result<Frame>>, JoinHandle<()>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(READ_BUFFER);
    let task = tokio::spawn(async move {
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    if tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });
    (rx, task)
}

fn spawn_writer<W>(mut writer: FramedWriter<W>) -> (Outbox, JoinHandle<io::Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_raw(&line).await?;
        }
        Ok(())
    });
    let outbox = Outbox {
        lines: tx,
        open: Arc::new(AtomicBool::new(true)),
    };
    (outbox, task)
}

async fn next_event(events: &mut Option<UnboundedReceiver<ReloadEvent>>) -> Option<ReloadEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Request task panicked");
        }
    }
}
