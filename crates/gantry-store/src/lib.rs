//! In-memory adapters for the Gantry ports.
//!
//! These back a single-process coordinator: everything lives behind
//! `tokio` locks, runs and workflows are kept in maps, and the event
//! bus fans out over channels with NATS-style subject matching.

pub mod artifacts;
pub mod bus;
pub mod runs;
pub mod workflows;

pub use artifacts::MemArtifactStore;
pub use bus::MemEventBus;
pub use runs::MemRunRepository;
pub use workflows::MemWorkflowRepository;
