//! Background request worker.
//!
//! A [`RequestWorker`] owns a dedicated thread running a single-threaded
//! tokio runtime. Commands are queued into that thread's event loop and
//! acknowledged once dequeued, so `seek` and `stop` return as soon as the
//! worker has taken them on, not when the HTTP exchange completes. Output is
//! delivered back through an unbounded FIFO channel of [`WorkerEvent`]s.

use std::error::Error as StdError;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::api::ChatRequest;
use crate::config::Config;
use crate::parser::{ResponseMode, StreamParser};
use crate::record::OutputRecord;

const WORKER_THREAD_NAME: &str = "seekchat-worker";
const NOT_RUNNING: &str = "request worker is not running";
const ABORTED: &str = "operation canceled";

/// What the worker reports back to its owner. `request` is the id returned by
/// the `seek` call the event belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Output { request: u64, record: OutputRecord },
    /// Sent once after `stop` aborted an in-flight request.
    Stopped { request: u64 },
}

impl WorkerEvent {
    pub fn request(&self) -> u64 {
        match self {
            WorkerEvent::Output { request, .. } | WorkerEvent::Stopped { request } => *request,
        }
    }
}

enum Command {
    Seek {
        prompt: String,
        accepted: oneshot::Sender<u64>,
    },
    Stop {
        accepted: oneshot::Sender<()>,
    },
    Shutdown,
}

/// One step of a connection's lifetime.
#[derive(Debug)]
enum Arrival {
    Data(Bytes),
    Rejected(StatusCode, Bytes),
    Failed(String),
    Finished,
}

struct Connection {
    request: u64,
    parser: StreamParser,
    arrivals: BoxStream<'static, Arrival>,
}

/// Cloneable, thread-safe front of a [`RequestWorker`].
///
/// Both operations block until the worker thread has accepted the command.
/// Do not call them from inside an async task; wrap them in
/// `tokio::task::spawn_blocking` there.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl WorkerHandle {
    /// Starts a new request for `prompt`, replacing any request still in
    /// flight, and returns its id.
    pub fn seek(&self, prompt: &str) -> Result<u64> {
        let (accepted, ack) = oneshot::channel();
        self.commands
            .send(Command::Seek {
                prompt: prompt.to_string(),
                accepted,
            })
            .map_err(|_| anyhow!(NOT_RUNNING))?;
        ack.blocking_recv().map_err(|_| anyhow!(NOT_RUNNING))
    }

    /// Aborts the request in flight, if any.
    pub fn stop(&self) -> Result<()> {
        let (accepted, ack) = oneshot::channel();
        self.commands
            .send(Command::Stop { accepted })
            .map_err(|_| anyhow!(NOT_RUNNING))?;
        ack.blocking_recv().map_err(|_| anyhow!(NOT_RUNNING))
    }
}

pub struct RequestWorker {
    handle: WorkerHandle,
    thread: Option<JoinHandle<()>>,
}

impl RequestWorker {
    /// Validates `config`, builds the HTTP client and starts the worker thread.
    pub fn spawn(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        config.validate()?;
        let client = build_client(&config)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build worker runtime")?;

        let worker = Worker::new(client, config, event_tx);
        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                debug!("request worker started");
                runtime.block_on(worker.run(command_rx));
                debug!("request worker exited");
            })
            .context("failed to spawn request worker thread")?;

        let worker = Self {
            handle: WorkerHandle {
                commands: command_tx,
            },
            thread: Some(thread),
        };
        Ok((worker, event_rx))
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn seek(&self, prompt: &str) -> Result<u64> {
        self.handle.seek(prompt)
    }

    pub fn stop(&self) -> Result<()> {
        self.handle.stop()
    }

    /// Stops any request in flight, ends the event loop and joins the thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.handle.stop()?;
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let _ = self.handle.commands.send(Command::Shutdown);
        thread
            .join()
            .map_err(|_| anyhow!("request worker thread panicked"))
    }
}

impl Drop for RequestWorker {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            warn!("{}", e);
        }
    }
}

fn build_client(config: &Config) -> Result<Client> {
    if config.accept_invalid_certs {
        warn!("TLS peer verification is disabled; responses can be intercepted");
    }
    Client::builder()
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
        .context("failed to build HTTP client")
}

/// Error text including every source in the chain.
fn describe(error: &reqwest::Error) -> String {
    let mut description = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}

/// Issues the POST lazily; nothing is sent until the stream is first polled.
fn open(client: &Client, config: &Config, body: &ChatRequest) -> BoxStream<'static, Arrival> {
    let pending = client
        .post(&config.endpoint)
        .bearer_auth(&config.api_key)
        .header(CONTENT_TYPE, "application/json")
        .json(body)
        .send();

    stream::once(pending)
        .flat_map(|result| match result {
            Ok(response) if response.status().is_success() => response
                .bytes_stream()
                .map(|chunk| match chunk {
                    Ok(bytes) => Arrival::Data(bytes),
                    Err(e) => Arrival::Failed(describe(&e)),
                })
                .chain(stream::once(async { Arrival::Finished }))
                .boxed(),
            Ok(response) => {
                let status = response.status();
                stream::once(async move {
                    let body = match response.bytes().await {
                        Ok(body) => body,
                        Err(e) => {
                            warn!(
                                %status,
                                error = %describe(&e),
                                "could not read rejection body"
                            );
                            Bytes::new()
                        }
                    };
                    Arrival::Rejected(status, body)
                })
                .boxed()
            }
            Err(e) => {
                let description = describe(&e);
                stream::once(async move { Arrival::Failed(description) }).boxed()
            }
        })
        .boxed()
}

/// Next arrival of the active connection; never resolves while idle.
async fn next_arrival(active: &mut Option<Connection>) -> (u64, Option<Arrival>) {
    match active {
        Some(connection) => (connection.request, connection.arrivals.next().await),
        None => std::future::pending().await,
    }
}

/// State owned by the worker thread.
struct Worker {
    client: Client,
    config: Config,
    events: mpsc::UnboundedSender<WorkerEvent>,
    /// Set by `stop`, cleared by `seek`. Only touched on the worker thread.
    stopped: bool,
    last_request: u64,
    active: Option<Connection>,
}

impl Worker {
    fn new(client: Client, config: Config, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            client,
            config,
            events,
            stopped: false,
            last_request: 0,
            active: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Seek { prompt, accepted }) => {
                        let request = self.seek(&prompt);
                        let _ = accepted.send(request);
                    }
                    Some(Command::Stop { accepted }) => {
                        self.stop();
                        let _ = accepted.send(());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                (request, arrival) = next_arrival(&mut self.active) => {
                    self.on_arrival(request, arrival.unwrap_or(Arrival::Finished));
                }
            }
        }

        if let Some(connection) = self.active.take() {
            debug!(request = connection.request, "releasing connection on teardown");
        }
    }

    fn seek(&mut self, prompt: &str) -> u64 {
        self.stopped = false;
        self.last_request += 1;
        let request = self.last_request;

        if let Some(mut previous) = self.active.take() {
            info!(
                request = previous.request,
                superseded_by = request,
                "abandoning in-flight request"
            );
            if let Some(record) = previous.parser.fail(ABORTED, true) {
                self.emit(previous.request, record);
            }
        }

        let body = ChatRequest::for_prompt(
            &self.config.model,
            &self.config.system_prompt,
            prompt,
            self.config.stream,
        );
        info!(
            request,
            endpoint = %self.config.endpoint,
            model = %self.config.model,
            stream = self.config.stream,
            prompt_len = prompt.len(),
            "dispatching chat request"
        );

        self.active = Some(Connection {
            request,
            parser: StreamParser::new(ResponseMode::from_stream_flag(self.config.stream)),
            arrivals: open(&self.client, &self.config, &body),
        });
        request
    }

    fn stop(&mut self) {
        let Some(mut connection) = self.active.take() else {
            debug!("stop requested with nothing in flight");
            return;
        };

        info!(request = connection.request, "stopping request");
        self.stopped = true;
        // Dropping the stream aborts the underlying connection.
        drop(connection.arrivals);

        if let Some(record) = connection.parser.fail(ABORTED, self.stopped) {
            self.emit(connection.request, record);
        }
        self.send(WorkerEvent::Stopped {
            request: connection.request,
        });
    }

    fn on_arrival(&mut self, request: u64, arrival: Arrival) {
        let Some(connection) = self.active.as_mut().filter(|c| c.request == request) else {
            debug!(request, "discarding arrival for superseded request");
            return;
        };
        if self.stopped {
            return;
        }

        let record = match arrival {
            Arrival::Data(bytes) => {
                debug!(request, bytes = bytes.len(), "data arrived");
                connection.parser.feed(&bytes)
            }
            Arrival::Rejected(status, body) => {
                warn!(request, %status, "server rejected request");
                connection.parser.reject(status, &body)
            }
            Arrival::Failed(description) => {
                warn!(request, error = %description, "request failed");
                connection.parser.fail(&description, self.stopped)
            }
            Arrival::Finished => connection.parser.finish(),
        };

        if connection.parser.is_finished() {
            let malformed = connection.parser.malformed_fragments();
            if malformed > 0 {
                warn!(request, malformed, "request finished with skipped fragments");
            }
            debug!(request, "request complete, releasing connection");
            self.active = None;
        }

        if let Some(record) = record {
            self.emit(request, record);
        }
    }

    fn emit(&self, request: u64, record: OutputRecord) {
        self.send(WorkerEvent::Output { request, record });
    }

    fn send(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped; discarding event");
        }
    }
}
