//! The public target-graph API: sessions, targets, and the vertex data model.

pub mod session;
pub mod target;
pub mod vertex;
