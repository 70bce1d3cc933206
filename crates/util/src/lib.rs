//! Small utilities shared by every crate in the workspace.

pub mod log;
