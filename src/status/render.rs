//! Live terminal display of the target graph, with a flat fallback for
//! non-interactive environments.
//!
//! The renderer is the single consumer of the channel fed by the status
//! logger: it merges vertex updates into a digest-keyed table, routes log
//! lines to their owning row, and returns only once the channel is closed and
//! drained (or the session's cancellation token fires during abnormal
//! shutdown).

use crate::graph::vertex::{Digest, SolveStatus, Vertex};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SPINNER_TICK: Duration = Duration::from_millis(120);
const DRAW_RATE_HZ: u8 = 12;

/// How the session renders progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Live vertex-keyed display when stdout is a terminal, plain otherwise.
    Auto,
    /// Force the flat, append-only textual log.
    Plain,
}

pub(crate) struct DisplayParams {
    pub root_name: String,
    pub rx: mpsc::Receiver<SolveStatus>,
    pub mode: RenderMode,
    pub shutdown: CancellationToken,
}

pub(crate) async fn display_status(params: DisplayParams) {
    let DisplayParams {
        root_name,
        rx,
        mode,
        shutdown,
    } = params;

    let interactive = match mode {
        RenderMode::Plain => false,
        RenderMode::Auto => !ProgressDrawTarget::stdout().is_hidden(),
    };

    if interactive {
        InteractiveDisplay::new(&root_name).run(rx, shutdown).await;
    } else {
        PlainDisplay::new(&root_name).run(rx, shutdown).await;
    }
}

/// Insertion-ordered merge of vertex updates, keyed by digest.
///
/// A vertex appearing in multiple envelopes updates its existing row in place,
/// last write wins; it is never duplicated as a separate row.
#[derive(Default)]
pub(crate) struct StatusModel {
    order: Vec<Digest>,
    rows: HashMap<Digest, Vertex>,
}

impl StatusModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Merges one update; returns whether this created a new row.
    pub(crate) fn merge_vertex(&mut self, vertex: Vertex) -> bool {
        let is_new = !self.rows.contains_key(&vertex.digest);
        if is_new {
            self.order.push(vertex.digest);
        }
        self.rows.insert(vertex.digest, vertex);
        is_new
    }

    pub(crate) fn get(&self, digest: &Digest) -> Option<&Vertex> {
        self.rows.get(digest)
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &Vertex> {
        self.order.iter().filter_map(|digest| self.rows.get(digest))
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

fn completion_label(vertex: &Vertex) -> String {
    if !vertex.error.is_empty() {
        let first_line = vertex.error.lines().next().unwrap_or_default();
        format!("ERROR: {first_line}")
    } else if vertex.cached {
        "CACHED".to_string()
    } else {
        let elapsed = vertex
            .completed
            .and_then(|completed| completed.duration_since(vertex.started).ok())
            .unwrap_or_default();
        format!("done {:.1}s", elapsed.as_secs_f64())
    }
}

fn log_lines(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .lines()
        .map(str::to_string)
        .collect()
}

struct InteractiveDisplay {
    multi: MultiProgress,
    style: ProgressStyle,
    model: StatusModel,
    bars: HashMap<Digest, ProgressBar>,
}

impl InteractiveDisplay {
    fn new(root_name: &str) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stdout_with_hz(DRAW_RATE_HZ));
        let style = ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {msg}")
            .expect("valid progress bar template");
        let _ = multi.println(format!("=> {root_name}"));
        Self {
            multi,
            style,
            model: StatusModel::new(),
            bars: HashMap::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SolveStatus>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                status = rx.recv() => match status {
                    Some(status) => self.apply(status),
                    None => break,
                },
            }
        }
        self.finish(shutdown.is_cancelled());
    }

    fn apply(&mut self, status: SolveStatus) {
        for vertex in status.vertexes {
            let digest = vertex.digest;
            let is_new = self.model.merge_vertex(vertex);
            if is_new {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(self.style.clone());
                bar.enable_steady_tick(SPINNER_TICK);
                self.bars.insert(digest, bar);
            }
            let merged = self
                .model
                .get(&digest)
                .expect("merged vertex is always present");
            if let Some(bar) = self.bars.get(&digest) {
                bar.set_prefix(merged.name.clone());
                if merged.is_completed() {
                    bar.finish_with_message(completion_label(merged));
                } else {
                    bar.set_message("running");
                }
            }
        }

        for log in status.logs {
            let label = self
                .model
                .get(&log.vertex)
                .map(|vertex| vertex.name.clone())
                .unwrap_or_else(|| log.vertex.short());
            for line in log_lines(&log.data) {
                match self.bars.get(&log.vertex) {
                    Some(bar) => bar.println(format!("{label} | {line}")),
                    None => {
                        let _ = self.multi.println(format!("{label} | {line}"));
                    }
                }
            }
        }
    }

    fn finish(&self, interrupted: bool) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                if interrupted {
                    bar.abandon_with_message("interrupted");
                } else {
                    bar.finish();
                }
            }
        }
    }
}

struct PlainDisplay {
    model: StatusModel,
}

impl PlainDisplay {
    fn new(root_name: &str) -> Self {
        println!("=> {root_name}");
        Self {
            model: StatusModel::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SolveStatus>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                status = rx.recv() => match status {
                    Some(status) => self.apply(status),
                    None => break,
                },
            }
        }
    }

    fn apply(&mut self, status: SolveStatus) {
        for vertex in status.vertexes {
            let digest = vertex.digest;
            let is_new = self.model.merge_vertex(vertex);
            let merged = self
                .model
                .get(&digest)
                .expect("merged vertex is always present");
            if merged.is_completed() {
                println!("=> {} {}", merged.name, completion_label(merged));
            } else if is_new {
                println!("=> {}", merged.name);
            }
        }

        for log in status.logs {
            let label = self
                .model
                .get(&log.vertex)
                .map(|vertex| vertex.name.clone())
                .unwrap_or_else(|| log.vertex.short());
            for line in log_lines(&log.data) {
                println!("{label} | {line}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn vertex(name: &str) -> Vertex {
        Vertex {
            digest: Digest::from_name(name),
            name: name.to_string(),
            started: SystemTime::now(),
            completed: None,
            cached: false,
            error: String::new(),
            inputs: Vec::new(),
        }
    }

    #[test]
    fn each_vertex_appears_exactly_once() {
        let mut model = StatusModel::new();
        assert!(model.merge_vertex(vertex("build")));
        assert!(model.merge_vertex(vertex("lint")));

        let mut update = vertex("build");
        update.completed = Some(SystemTime::now());
        assert!(!model.merge_vertex(update));

        assert_eq!(model.len(), 2);
        let names: Vec<_> = model.rows().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["build", "lint"], "insertion order is preserved");
        assert!(model
            .get(&Digest::from_name("build"))
            .expect("row exists")
            .is_completed());
    }

    #[test]
    fn repeated_completion_keeps_the_later_fields() {
        let mut model = StatusModel::new();
        model.merge_vertex(vertex("deploy"));

        let mut first = vertex("deploy");
        first.completed = Some(SystemTime::now());
        first.error = "transient".to_string();
        model.merge_vertex(first);

        let mut second = vertex("deploy");
        second.completed = Some(SystemTime::now());
        second.cached = true;
        model.merge_vertex(second);

        assert_eq!(model.len(), 1);
        let row = model.get(&Digest::from_name("deploy")).expect("row exists");
        assert!(row.cached);
        assert!(row.error.is_empty(), "later envelope wins per field");
    }

    #[test]
    fn completion_labels_cover_all_outcomes() {
        let mut ok = vertex("ok");
        ok.completed = Some(ok.started + Duration::from_millis(1500));
        assert_eq!(completion_label(&ok), "done 1.5s");

        let mut cached = vertex("cached");
        cached.completed = Some(SystemTime::now());
        cached.cached = true;
        assert_eq!(completion_label(&cached), "CACHED");

        let mut failed = vertex("failed");
        failed.completed = Some(SystemTime::now());
        failed.error = "disk full\nbacktrace...".to_string();
        assert_eq!(completion_label(&failed), "ERROR: disk full");
    }

    #[test]
    fn log_lines_split_and_tolerate_missing_trailing_newline() {
        assert_eq!(log_lines(b"one\ntwo\n"), vec!["one", "two"]);
        assert_eq!(log_lines(b"bare"), vec!["bare"]);
        assert!(log_lines(b"").is_empty());
    }
}
