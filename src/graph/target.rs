//! One node in the target graph: emits creation, log, and completion
//! envelopes onto the session's status bus.

use crate::graph::vertex::{Digest, LogStream, SolveStatus, Vertex, VertexLog};
use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// A unit of build work being tracked by the session.
///
/// Every operation sends on the session's bounded bus and may block when the
/// logger falls behind; status is never dropped. A target must be completed
/// (which consumes it) before the session shuts down.
pub struct Target {
    bus: mpsc::Sender<SolveStatus>,
    vertex: Vertex,
    cached: AtomicBool,
}

impl Target {
    pub(crate) async fn create(
        bus: mpsc::Sender<SolveStatus>,
        name: &str,
        parent: Option<Digest>,
    ) -> Target {
        assert!(!name.trim().is_empty(), "target name must not be empty");

        let vertex = Vertex {
            digest: Digest::from_name(name),
            name: name.to_string(),
            started: SystemTime::now(),
            completed: None,
            cached: false,
            error: String::new(),
            inputs: parent.into_iter().collect(),
        };
        let target = Target {
            bus,
            vertex,
            cached: AtomicBool::new(false),
        };
        target
            .send(SolveStatus::for_vertex(target.vertex.clone()))
            .await;
        target
    }

    /// Creates a child target whose display edge points at this node. Its
    /// log output lands in the log file of this node's root-level ancestor.
    pub async fn target(&self, name: &str) -> Target {
        Target::create(self.bus.clone(), name, Some(self.vertex.digest)).await
    }

    pub fn digest(&self) -> Digest {
        self.vertex.digest
    }

    pub fn name(&self) -> &str {
        &self.vertex.name
    }

    /// Marks the eventual completion message as a cache hit. Has no effect on
    /// a completion that was already sent.
    pub fn set_cached(&self, cached: bool) {
        self.cached.store(cached, Ordering::SeqCst);
    }

    /// Emits the completion envelope. Consuming `self` makes a second
    /// completion unrepresentable.
    pub async fn complete(self, error: Option<&anyhow::Error>) {
        let mut vertex = self.vertex.clone();
        vertex.completed = Some(SystemTime::now());
        vertex.cached = self.cached.load(Ordering::SeqCst);
        vertex.error = error.map(|err| format!("{err:?}")).unwrap_or_default();
        self.send(SolveStatus::for_vertex(vertex)).await;
    }

    /// Runs `body` and guarantees exactly one completion on every exit path:
    /// success, error, and panic (the panic is resumed after completion is
    /// recorded).
    pub async fn run<T, F>(self, body: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a Target) -> BoxFuture<'a, Result<T>>,
    {
        let outcome = AssertUnwindSafe(body(&self)).catch_unwind().await;
        match outcome {
            Ok(Ok(value)) => {
                self.complete(None).await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.complete(Some(&err)).await;
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let err = anyhow::anyhow!("target body panicked: {message}");
                self.complete(Some(&err)).await;
                resume_unwind(panic);
            }
        }
    }

    /// Emits one stdout log line for this target.
    pub async fn println(&self, line: impl AsRef<str>) {
        self.log(LogStream::Stdout, line.as_ref()).await;
    }

    /// Emits one stderr log line for this target.
    pub async fn eprintln(&self, line: impl AsRef<str>) {
        self.log(LogStream::Stderr, line.as_ref()).await;
    }

    async fn log(&self, stream: LogStream, line: &str) {
        let mut data = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            data.push(b'\n');
        }
        self.send(SolveStatus::for_log(VertexLog {
            vertex: self.vertex.digest,
            stream,
            data,
            timestamp: SystemTime::now(),
        }))
        .await;
    }

    async fn send(&self, status: SolveStatus) {
        // Guaranteed delivery: a full bus applies back-pressure, it never
        // drops. The bus only closes once the session has shut down, at which
        // point emitting further status is a calling-code bug.
        if self.bus.send(status).await.is_err() {
            panic!("status bus is closed; the session was shut down while targets were active");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
