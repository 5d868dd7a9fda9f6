//! Event schema: the contract between producers and the sync worker.

pub mod envelope;
pub mod model;

pub use envelope::EventEnvelope;
pub use model::*;
