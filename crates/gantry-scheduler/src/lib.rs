//! Workflow coordination for Gantry.
//!
//! Sequences a DAG of jobs respecting declared `needs` edges, expands
//! static matrix axes and the dynamic fan-out axis into parallel
//! instances, and gates execution on upstream success.

pub mod collector;
pub mod coordinator;
pub mod dag;
pub mod fanout;
pub mod matrix;
pub mod queue;
pub mod triggers;
