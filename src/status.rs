//! The status pipeline: secret redaction, the bus-draining logger, and the
//! terminal renderer.

pub mod logger;
pub mod redact;
pub mod render;
