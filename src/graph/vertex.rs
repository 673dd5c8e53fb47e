//! Passive data model for the display graph: vertices, captured log lines,
//! and the `SolveStatus` envelopes transported on the status bus.

use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;
use std::time::SystemTime;

/// Content-derived identity of a vertex, computed from the target's name.
///
/// Digests are display identity only: two targets with the same name share a
/// digest and merge into one rendered row. Nothing in the pipeline relies on
/// uniqueness.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_name(name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Full hex encoding of the digest.
    pub fn encoded(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 2);
        for byte in &self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Short prefix used in log-file names and display labels.
    pub fn short(&self) -> String {
        let mut out = String::with_capacity(8);
        for byte in &self.0[..4] {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.encoded())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

/// Output stream a captured log line originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

/// One node in the display graph: a target's identity, lifecycle timestamps,
/// and result.
#[derive(Clone, Debug)]
pub struct Vertex {
    pub digest: Digest,
    pub name: String,
    pub started: SystemTime,
    /// Set once at completion; `None` while the target is still running.
    pub completed: Option<SystemTime>,
    pub cached: bool,
    /// Debug-formatted error, empty when the target succeeded.
    pub error: String,
    /// Parent digests, used only to draw display edges.
    pub inputs: Vec<Digest>,
}

impl Vertex {
    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }
}

/// One captured line of target output.
#[derive(Clone, Debug)]
pub struct VertexLog {
    pub vertex: Digest,
    pub stream: LogStream,
    pub data: Vec<u8>,
    pub timestamp: SystemTime,
}

/// Transport envelope on the status bus: a batch of vertex updates and log
/// lines. Consumers merge vertexes by digest, last write wins.
#[derive(Clone, Debug, Default)]
pub struct SolveStatus {
    pub vertexes: Vec<Vertex>,
    pub logs: Vec<VertexLog>,
}

impl SolveStatus {
    pub fn for_vertex(vertex: Vertex) -> Self {
        Self {
            vertexes: vec![vertex],
            logs: Vec::new(),
        }
    }

    pub fn for_log(log: VertexLog) -> Self {
        Self {
            vertexes: Vec::new(),
            logs: vec![log],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertexes.is_empty() && self.logs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_per_name() {
        assert_eq!(Digest::from_name("build"), Digest::from_name("build"));
        assert_ne!(Digest::from_name("build"), Digest::from_name("lint"));
    }

    #[test]
    fn digest_encodings_have_expected_shapes() {
        let digest = Digest::from_name("build");
        assert_eq!(digest.encoded().len(), 64);
        assert_eq!(digest.short().len(), 8);
        assert!(digest.encoded().starts_with(&digest.short()));
        assert_eq!(format!("{digest}"), format!("sha256:{}", digest.encoded()));
    }

    #[test]
    fn envelope_constructors_carry_one_entry() {
        let vertex = Vertex {
            digest: Digest::from_name("build"),
            name: "build".into(),
            started: SystemTime::now(),
            completed: None,
            cached: false,
            error: String::new(),
            inputs: Vec::new(),
        };
        let status = SolveStatus::for_vertex(vertex.clone());
        assert_eq!(status.vertexes.len(), 1);
        assert!(status.logs.is_empty());
        assert!(!status.is_empty());

        let status = SolveStatus::for_log(VertexLog {
            vertex: vertex.digest,
            stream: LogStream::Stdout,
            data: b"hello\n".to_vec(),
            timestamp: SystemTime::now(),
        });
        assert!(status.vertexes.is_empty());
        assert_eq!(status.logs.len(), 1);
        assert_eq!(status.logs[0].stream.as_str(), "stdout");
    }
}
