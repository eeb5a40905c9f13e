//! Background persistence actor.
//!
//! A dedicated worker thread owns a *mirror* of the project plus its own
//! undo history. The interactive side feeds it the same command batches
//! and undo/redo calls it applies to the primary project, so the mirror
//! tracks the primary without ever sharing memory with it.
//!
//! Messages are handled one at a time in send order. A `Save` or `Export`
//! therefore always observes every `Execute`, `Undo` and `Redo` sent before
//! it. Results come back through [`Pending`] handles the caller polls once
//! per tick (or waits on when it must).
//!
//! ```text
//! interactive thread                    worker thread
//! ------------------                    -------------
//! execute(batch) ──── Execute ────────▶ apply to mirror, record
//! save(req)      ──── Save ───────────▶ serialize mirror ──▶ SaveResult
//! tick: poll()   ◀──────────────────────────────────────────┘
//! shutdown()     ──── Stop ───────────▶ ack, exit loop
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{ExportOptions, ExportPipeline, ProjectSerializer};
use crate::command::Command;
use crate::history::History;
use crate::model::Project;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub path: PathBuf,
    /// Structural revision of the primary project when the save was issued.
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveResult {
    pub ok: bool,
    pub error: Option<String>,
    pub elapsed: Duration,
    pub revision: u64,
    /// The mirror failed to replay an earlier message and must be reset.
    pub mirror_diverged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub options: ExportOptions,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportResult {
    pub ok: bool,
    pub has_errors: bool,
    pub first_error: Option<String>,
    pub elapsed: Duration,
    pub revision: u64,
    /// The mirror failed to replay an earlier message and must be reset.
    pub mirror_diverged: bool,
}

enum Message {
    Reset {
        project: Box<Project>,
        history: History,
        dirty: bool,
    },
    Execute(Vec<Command>),
    Undo,
    Redo,
    Save(SaveRequest, SyncSender<SaveResult>),
    Export(ExportRequest, SyncSender<ExportResult>),
    Stop(SyncSender<()>),
}

// ---------------------------------------------------------------------------
// Pending
// ---------------------------------------------------------------------------

/// State of a [`Pending`] result.
#[derive(Debug, PartialEq, Eq)]
pub enum Poll<T> {
    Waiting,
    Ready(T),
    /// The worker went away without answering.
    Lost,
}

/// Handle to a result the worker will produce later.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    fn channel() -> (SyncSender<T>, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (tx, Self { rx })
    }

    /// Non-blocking check.
    pub fn poll(&self) -> Poll<T> {
        match self.rx.try_recv() {
            Ok(value) => Poll::Ready(value),
            Err(TryRecvError::Empty) => Poll::Waiting,
            Err(TryRecvError::Disconnected) => Poll::Lost,
        }
    }

    /// Block until the worker answers. `None` if it exited first.
    #[must_use]
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Actor handle
// ---------------------------------------------------------------------------

/// Interactive-side handle to the persistence worker.
///
/// Dropping the handle stops the worker and joins it. Sending any message
/// after [`shutdown`](Self::shutdown) panics: it is a contract violation,
/// not a recoverable condition.
pub struct PersistenceActor {
    tx: Option<Sender<Message>>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PersistenceActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceActor")
            .field("running", &self.tx.is_some())
            .finish()
    }
}

impl PersistenceActor {
    /// Start the worker with `project` as the initial mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn spawn(
        project: Project,
        serializer: Box<dyn ProjectSerializer>,
        exporter: Box<dyn ExportPipeline>,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mirror = Mirror {
            project,
            history: History::new(),
            dirty: false,
            diverged: false,
            serializer,
            exporter,
        };
        let join = thread::Builder::new()
            .name("tessera-persist".into())
            .spawn(move || worker_loop(&rx, mirror))?;
        Ok(Self {
            tx: Some(tx),
            join: Some(join),
        })
    }

    /// Replace the mirror with `project` and `history`. Both must be copies
    /// of the primary's so later undo/redo replays line up. `dirty` says
    /// whether `project` has changes not yet on disk.
    pub fn reset(&self, project: Project, history: History, dirty: bool) {
        self.send(Message::Reset {
            project: Box::new(project),
            history,
            dirty,
        });
    }

    /// Replay an applied batch on the mirror.
    pub fn execute(&self, commands: Vec<Command>) {
        self.send(Message::Execute(commands));
    }

    pub fn undo(&self) {
        self.send(Message::Undo);
    }

    pub fn redo(&self) {
        self.send(Message::Redo);
    }

    /// Serialize the mirror once every earlier message has been handled.
    pub fn save(&self, request: SaveRequest) -> Pending<SaveResult> {
        let (tx, pending) = Pending::channel();
        self.send(Message::Save(request, tx));
        pending
    }

    /// Export the mirror once every earlier message has been handled.
    pub fn export(&self, request: ExportRequest) -> Pending<ExportResult> {
        let (tx, pending) = Pending::channel();
        self.send(Message::Export(request, tx));
        pending
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    /// Send `Stop`, wait for the acknowledgment and join the worker.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let (ack_tx, ack) = Pending::channel();
        if tx.send(Message::Stop(ack_tx)).is_ok() && ack.wait().is_none() {
            tracing::error!("persistence worker exited before acknowledging stop");
        }
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!("persistence worker panicked");
        }
        tracing::debug!("persistence worker stopped");
    }

    /// # Panics
    ///
    /// Panics if the worker was already stopped or has died. Either means
    /// the caller broke the shutdown protocol and later saves would be lost.
    fn send(&self, message: Message) {
        let Some(tx) = &self.tx else {
            panic!("message sent to persistence worker after stop");
        };
        if tx.send(message).is_err() {
            panic!("persistence worker is gone; message queue rejected a write");
        }
    }
}

impl Drop for PersistenceActor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Mirror {
    project: Project,
    history: History,
    /// Changes applied since the last successful save.
    dirty: bool,
    diverged: bool,
    serializer: Box<dyn ProjectSerializer>,
    exporter: Box<dyn ExportPipeline>,
}

fn worker_loop(rx: &Receiver<Message>, mut mirror: Mirror) {
    while let Ok(message) = rx.recv() {
        if let Message::Stop(ack) = message {
            if mirror.dirty {
                tracing::warn!("persistence worker stopped with unsaved changes");
            }
            let _ = ack.send(());
            return;
        }
        mirror.handle(message);
    }
    tracing::debug!("persistence queue closed without stop");
}

impl Mirror {
    fn handle(&mut self, message: Message) {
        match message {
            Message::Reset {
                project,
                history,
                dirty,
            } => {
                self.project = *project;
                self.history = history;
                self.dirty = dirty;
                self.diverged = false;
                tracing::debug!(dirty, position = self.history.position(), "mirror reset");
            }
            Message::Execute(commands) => {
                let outcome = self.history.execute(&mut self.project, commands);
                self.replayed("execute", outcome.map(|()| true));
            }
            Message::Undo => {
                let outcome = self.history.undo(&mut self.project);
                self.replayed("undo", outcome.map(|applied| applied.is_some()));
            }
            Message::Redo => {
                let outcome = self.history.redo(&mut self.project);
                self.replayed("redo", outcome.map(|applied| applied.is_some()));
            }
            Message::Save(request, reply) => {
                let _ = reply.send(self.save(request));
            }
            Message::Export(request, reply) => {
                let _ = reply.send(self.export(request));
            }
            Message::Stop(_) => unreachable!("stop is handled by the worker loop"),
        }
    }

    fn replayed(&mut self, op: &'static str, outcome: Result<bool, crate::command::ApplyError>) {
        match outcome {
            Ok(changed) => self.dirty |= changed,
            Err(err) => {
                tracing::error!(op, error = %err, "mirror replay failed; mirror diverged");
                self.diverged = true;
            }
        }
    }

    fn save(&mut self, request: SaveRequest) -> SaveResult {
        let started = Instant::now();
        if self.diverged {
            return SaveResult {
                ok: false,
                error: Some("mirror diverged from the primary project".into()),
                elapsed: started.elapsed(),
                revision: request.revision,
                mirror_diverged: true,
            };
        }
        let outcome = self.serializer.save(&self.project, &request.path);
        let elapsed = started.elapsed();
        match outcome {
            Ok(()) => {
                let had_changes = std::mem::replace(&mut self.dirty, false);
                tracing::info!(
                    path = %request.path.display(),
                    revision = request.revision,
                    had_changes,
                    elapsed_us = elapsed.as_micros(),
                    "project saved"
                );
                SaveResult {
                    ok: true,
                    error: None,
                    elapsed,
                    revision: request.revision,
                    mirror_diverged: false,
                }
            }
            Err(err) => {
                tracing::warn!(path = %request.path.display(), error = %err, "save failed");
                SaveResult {
                    ok: false,
                    error: Some(err.to_string()),
                    elapsed,
                    revision: request.revision,
                    mirror_diverged: false,
                }
            }
        }
    }

    fn export(&self, request: ExportRequest) -> ExportResult {
        let started = Instant::now();
        if self.diverged {
            return ExportResult {
                ok: false,
                has_errors: true,
                first_error: Some("mirror diverged from the primary project".into()),
                elapsed: started.elapsed(),
                revision: request.revision,
                mirror_diverged: true,
            };
        }
        let outcome = self.exporter.export(&self.project, &request.options);
        let elapsed = started.elapsed();
        match outcome {
            Ok(outcome) => ExportResult {
                ok: true,
                has_errors: outcome.has_errors,
                first_error: outcome.first_error().map(str::to_owned),
                elapsed,
                revision: request.revision,
                mirror_diverged: false,
            },
            Err(err) => {
                tracing::warn!(error = %err, "export failed");
                ExportResult {
                    ok: false,
                    has_errors: true,
                    first_error: Some(err.to_string()),
                    elapsed,
                    revision: request.revision,
                    mirror_diverged: false,
                }
            }
        }
    }
}
