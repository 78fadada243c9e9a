//! Route handlers, one module per resource

pub mod alerts;
pub mod health;
pub mod machines;
pub mod stats;
pub mod telemetry;
