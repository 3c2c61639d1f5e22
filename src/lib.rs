// TailSleuth - lib.rs
//
// Library entry point.  The binary in `main.rs` and the integration tests use
// the same public modules.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
