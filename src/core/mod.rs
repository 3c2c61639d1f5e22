// TailSleuth - core/mod.rs
//
// Core layer: data model, the log-file and analyser capabilities, and the
// snapshot file format.
// Dependencies: util only.
// Must NOT depend on: app, platform.

pub mod analyser;
pub mod log_file;
pub mod model;
pub mod snapshot_format;
