//! GridFlow - condition-gated operation graphs bridged to HPC batch schedulers

pub mod environment;
pub mod error;
pub mod graph;
pub mod lock;
pub mod models;
pub mod schedulers;
