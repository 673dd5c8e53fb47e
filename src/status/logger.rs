//! Single authoritative consumer of the status bus: writes redacted per-target
//! log files and republishes every envelope to the renderer channel.

use crate::graph::vertex::{Digest, SolveStatus, Vertex, VertexLog};
use crate::runtime::telemetry::Telemetry;
use crate::status::redact::SecretsRedactor;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

enum LogSink {
    Open(File),
    /// Opening the file failed once; the disk copy stays disabled for this
    /// target so every line does not retry the same failing open.
    Failed,
}

pub(crate) struct StatusLoggerParams {
    pub bus_rx: mpsc::Receiver<SolveStatus>,
    pub render_tx: mpsc::Sender<SolveStatus>,
    pub redactor: Arc<SecretsRedactor>,
    pub telemetry: Arc<Telemetry>,
    pub log_dir: PathBuf,
}

/// Drains the bus until every sender is gone, then closes all log files and
/// drops the renderer sender, signalling the renderer to finish.
pub(crate) struct StatusLogger {
    bus_rx: mpsc::Receiver<SolveStatus>,
    render_tx: mpsc::Sender<SolveStatus>,
    redactor: Arc<SecretsRedactor>,
    telemetry: Arc<Telemetry>,
    log_dir: PathBuf,
    /// vertex digest -> digest of its root-level ancestor (the log-file scope).
    scopes: HashMap<Digest, Digest>,
    scope_names: HashMap<Digest, String>,
    files: HashMap<Digest, LogSink>,
}

impl StatusLogger {
    pub(crate) fn new(params: StatusLoggerParams) -> Self {
        Self {
            bus_rx: params.bus_rx,
            render_tx: params.render_tx,
            redactor: params.redactor,
            telemetry: params.telemetry,
            log_dir: params.log_dir,
            scopes: HashMap::new(),
            scope_names: HashMap::new(),
            files: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(status) = self.bus_rx.recv().await {
            let status = self.process(status).await;
            if status.is_empty() {
                continue;
            }
            self.telemetry.record_status_forwarded();
            if self.render_tx.send(status).await.is_err() {
                tracing::warn!("renderer channel closed early; dropping status update");
            }
        }

        self.close_files().await;
        tracing::debug!("status logger drained; shutting down");
    }

    async fn process(&mut self, mut status: SolveStatus) -> SolveStatus {
        for vertex in &status.vertexes {
            self.register(vertex);
        }
        for log in &mut status.logs {
            log.data = self.redactor.redact(&log.data);
            self.append(log).await;
        }
        status
    }

    /// Records the log-file scope for a newly announced vertex: itself when it
    /// is root-level, otherwise the scope of its parent, which the model
    /// invariant guarantees was announced first.
    fn register(&mut self, vertex: &Vertex) {
        if self.scopes.contains_key(&vertex.digest) {
            if vertex.is_completed() {
                self.telemetry.record_target_completed();
            } else {
                tracing::warn!(
                    digest = %vertex.digest,
                    name = %vertex.name,
                    "duplicate target digest announced; display rows will merge"
                );
            }
            return;
        }

        let scope = vertex
            .inputs
            .first()
            .and_then(|parent| self.scopes.get(parent))
            .copied()
            .unwrap_or(vertex.digest);
        self.scopes.insert(vertex.digest, scope);
        if scope == vertex.digest {
            self.scope_names.insert(scope, vertex.name.clone());
        }

        if vertex.is_completed() {
            self.telemetry.record_target_completed();
        } else {
            self.telemetry.record_target_created();
        }
    }

    async fn append(&mut self, log: &VertexLog) {
        let Some(scope) = self.scopes.get(&log.vertex).copied() else {
            tracing::warn!(
                vertex = %log.vertex,
                "log line for an unannounced vertex; skipping disk copy"
            );
            return;
        };

        if !self.files.contains_key(&scope) {
            let sink = self.open_sink(scope).await;
            self.files.insert(scope, sink);
        }

        if let Some(LogSink::Open(file)) = self.files.get_mut(&scope) {
            match file.write_all(&log.data).await {
                Ok(()) => self.telemetry.record_log_bytes(log.data.len() as u64),
                Err(err) => {
                    self.telemetry.record_write_failure();
                    tracing::warn!(
                        vertex = %log.vertex,
                        error = %err,
                        "failed to append to target log file; build continues"
                    );
                }
            }
        }
    }

    async fn open_sink(&mut self, scope: Digest) -> LogSink {
        let name = self
            .scope_names
            .get(&scope)
            .map(String::as_str)
            .unwrap_or("target");
        let path = self.log_dir.join(log_file_name(name, &scope));
        match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(file) => LogSink::Open(file),
            Err(err) => {
                self.telemetry.record_write_failure();
                tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "failed to open target log file; disk copy disabled for this target"
                );
                LogSink::Failed
            }
        }
    }

    async fn close_files(&mut self) {
        for (scope, sink) in self.files.iter_mut() {
            if let LogSink::Open(file) = sink {
                if let Err(err) = file.flush().await {
                    tracing::warn!(scope = %scope, error = %err, "failed to flush log file");
                }
            }
        }
        self.files.clear();
    }
}

/// Deterministic file name for a root-level target: sanitized name plus a
/// short digest suffix.
fn log_file_name(name: &str, digest: &Digest) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{sanitized}.{}.log", digest.short())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::vertex::LogStream;
    use std::time::{Duration, SystemTime};
    use tokio::time::timeout;

    fn vertex(name: &str, parent: Option<Digest>) -> Vertex {
        Vertex {
            digest: Digest::from_name(name),
            name: name.to_string(),
            started: SystemTime::now(),
            completed: None,
            cached: false,
            error: String::new(),
            inputs: parent.into_iter().collect(),
        }
    }

    fn log_line(digest: Digest, line: &str) -> VertexLog {
        VertexLog {
            vertex: digest,
            stream: LogStream::Stdout,
            data: format!("{line}\n").into_bytes(),
            timestamp: SystemTime::now(),
        }
    }

    struct Pipeline {
        bus_tx: mpsc::Sender<SolveStatus>,
        render_rx: mpsc::Receiver<SolveStatus>,
        telemetry: Arc<Telemetry>,
        handle: tokio::task::JoinHandle<()>,
        log_dir: PathBuf,
        _tmp: tempfile::TempDir,
    }

    fn spawn_logger(secrets: Vec<&str>) -> Pipeline {
        let tmp = tempfile::tempdir().expect("temp log dir");
        let log_dir = tmp.path().to_path_buf();
        let (bus_tx, bus_rx) = mpsc::channel(16);
        let (render_tx, render_rx) = mpsc::channel(16);
        let telemetry = Arc::new(Telemetry::default());
        let logger = StatusLogger::new(StatusLoggerParams {
            bus_rx,
            render_tx,
            redactor: Arc::new(SecretsRedactor::new(secrets)),
            telemetry: telemetry.clone(),
            log_dir: log_dir.clone(),
        });
        let handle = tokio::spawn(logger.run());
        Pipeline {
            bus_tx,
            render_rx,
            telemetry,
            handle,
            log_dir,
            _tmp: tmp,
        }
    }

    fn read_scope_log(dir: &PathBuf, name: &str) -> String {
        let expected = log_file_name(name, &Digest::from_name(name));
        std::fs::read_to_string(dir.join(expected)).expect("scope log file should exist")
    }

    async fn shutdown(pipeline: Pipeline) -> (Arc<Telemetry>, PathBuf, tempfile::TempDir) {
        drop(pipeline.bus_tx);
        drop(pipeline.render_rx);
        timeout(Duration::from_secs(2), pipeline.handle)
            .await
            .expect("logger should stop after the bus closes")
            .expect("logger task should not panic");
        (pipeline.telemetry, pipeline.log_dir, pipeline._tmp)
    }

    #[tokio::test]
    async fn nested_targets_share_the_root_level_log_file() {
        let mut pipeline = spawn_logger(vec![]);
        let root = vertex("package", None);
        let child = vertex("compile", Some(root.digest));
        let grandchild = vertex("link", Some(child.digest));

        for v in [&root, &child, &grandchild] {
            pipeline
                .bus_tx
                .send(SolveStatus::for_vertex(v.clone()))
                .await
                .expect("bus send should succeed");
        }
        pipeline
            .bus_tx
            .send(SolveStatus::for_log(log_line(root.digest, "from root")))
            .await
            .expect("bus send should succeed");
        pipeline
            .bus_tx
            .send(SolveStatus::for_log(log_line(grandchild.digest, "from leaf")))
            .await
            .expect("bus send should succeed");

        for _ in 0..5 {
            pipeline
                .render_rx
                .recv()
                .await
                .expect("every envelope is forwarded");
        }

        let (telemetry, log_dir, _tmp) = shutdown(pipeline).await;
        let entries: Vec<_> = std::fs::read_dir(&log_dir)
            .expect("log dir should exist")
            .collect();
        assert_eq!(entries.len(), 1, "one root-level target, one log file");

        let contents = read_scope_log(&log_dir, "package");
        assert!(contents.contains("from root"));
        assert!(contents.contains("from leaf"));
        assert_eq!(telemetry.targets_created(), 3);
    }

    #[tokio::test]
    async fn distinct_roots_get_distinct_files() {
        let Pipeline {
            bus_tx,
            mut render_rx,
            telemetry: _,
            handle,
            log_dir,
            _tmp,
        } = spawn_logger(vec![]);
        let build = vertex("build", None);
        let lint = vertex("lint", None);

        for v in [&build, &lint] {
            bus_tx
                .send(SolveStatus::for_vertex(v.clone()))
                .await
                .expect("bus send should succeed");
        }
        bus_tx
            .send(SolveStatus::for_log(log_line(build.digest, "building")))
            .await
            .expect("bus send should succeed");
        bus_tx
            .send(SolveStatus::for_log(log_line(lint.digest, "linting")))
            .await
            .expect("bus send should succeed");

        // Drain the renderer side so the logger never blocks on a full channel.
        let drain = tokio::spawn(async move { while render_rx.recv().await.is_some() {} });

        drop(bus_tx);
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("logger should stop")
            .expect("logger task should not panic");
        drain.await.expect("drain task should not panic");

        assert!(read_scope_log(&log_dir, "build").contains("building"));
        assert!(read_scope_log(&log_dir, "lint").contains("linting"));
    }

    #[tokio::test]
    async fn secrets_are_redacted_on_disk_and_toward_the_renderer() {
        let mut pipeline = spawn_logger(vec!["abc123"]);
        let deploy = vertex("deploy", None);
        pipeline
            .bus_tx
            .send(SolveStatus::for_vertex(deploy.clone()))
            .await
            .expect("bus send should succeed");
        pipeline
            .bus_tx
            .send(SolveStatus::for_log(log_line(deploy.digest, "using abc123")))
            .await
            .expect("bus send should succeed");

        let _creation = pipeline.render_rx.recv().await.expect("creation forwarded");
        let forwarded = pipeline.render_rx.recv().await.expect("log forwarded");
        let line = String::from_utf8(forwarded.logs[0].data.clone()).expect("utf-8 log line");
        assert!(line.contains("<redacted>"), "renderer copy is redacted");
        assert!(!line.contains("abc123"));

        let (_telemetry, log_dir, _tmp) = shutdown(pipeline).await;
        let contents = read_scope_log(&log_dir, "deploy");
        assert!(contents.contains("using <redacted>"));
        assert!(!contents.contains("abc123"));
    }

    #[tokio::test]
    async fn logs_for_unannounced_vertexes_are_skipped_on_disk() {
        let pipeline = spawn_logger(vec![]);
        pipeline
            .bus_tx
            .send(SolveStatus::for_log(log_line(
                Digest::from_name("ghost"),
                "nobody announced me",
            )))
            .await
            .expect("bus send should succeed");

        let (telemetry, log_dir, _tmp) = shutdown(pipeline).await;
        let entries: Vec<_> = std::fs::read_dir(&log_dir)
            .expect("log dir should exist")
            .collect();
        assert!(entries.is_empty(), "no file for an unannounced vertex");
        assert_eq!(telemetry.log_bytes_written(), 0);
    }

    #[tokio::test]
    async fn drains_everything_queued_before_the_close() {
        let Pipeline {
            bus_tx,
            mut render_rx,
            telemetry,
            handle,
            log_dir,
            _tmp,
        } = spawn_logger(vec![]);
        let build = vertex("build", None);
        bus_tx
            .send(SolveStatus::for_vertex(build.clone()))
            .await
            .expect("bus send should succeed");
        for index in 0..10 {
            bus_tx
                .send(SolveStatus::for_log(log_line(
                    build.digest,
                    &format!("line {index}"),
                )))
                .await
                .expect("bus send should succeed");
        }
        let mut completed = build.clone();
        completed.completed = Some(SystemTime::now());
        bus_tx
            .send(SolveStatus::for_vertex(completed))
            .await
            .expect("bus send should succeed");

        let drain = tokio::spawn(async move {
            let mut count = 0;
            while render_rx.recv().await.is_some() {
                count += 1;
            }
            count
        });

        drop(bus_tx);
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("logger should stop")
            .expect("logger task should not panic");
        let forwarded = drain.await.expect("drain task should not panic");
        assert_eq!(forwarded, 12, "creation + 10 logs + completion");
        assert_eq!(telemetry.statuses_forwarded(), 12);
        assert_eq!(telemetry.targets_completed(), 1);

        let contents = read_scope_log(&log_dir, "build");
        for index in 0..10 {
            assert!(contents.contains(&format!("line {index}")));
        }
    }

    #[test]
    fn log_file_names_are_sanitized() {
        let digest = Digest::from_name("go build/linux");
        let name = log_file_name("go build/linux", &digest);
        assert_eq!(name, format!("go-build-linux.{}.log", digest.short()));
    }
}
