// TailSleuth - app/mod.rs
//
// Application layer: scheduling, change coalescing, live analyses and
// snapshot persistence.
// Dependencies: core, util, and the `platform::fs` capability.
// Must NOT depend on: platform directory or config resolution.

pub mod analysis;
pub mod change_notifier;
pub mod registry;
pub mod scheduler;
pub mod snapshot_writer;
