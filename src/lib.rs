//! Concurrent build-status engine.
//!
//! Build scripts declare named, possibly nested targets, run them
//! concurrently, and observe progress, logs, and completion through one
//! terminal display. Per-target logs are persisted to a session-scoped log
//! directory with registered secrets redacted from every sink.

pub mod graph;
pub mod runtime;
pub mod status;

pub use graph::session::Session;
pub use graph::target::Target;
pub use graph::vertex::{Digest, LogStream, SolveStatus, Vertex, VertexLog};
pub use runtime::config::{Config, ConfigBuilder, ConfigParams, DEFAULT_STATUS_CHANNEL_CAPACITY};
pub use runtime::env::{import_env_from_reader, EnvRegistry, EnvVar, ENV_IMPORT_PREFIX};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use status::redact::{SecretsRedactor, REDACTION_MASK};
pub use status::render::RenderMode;
