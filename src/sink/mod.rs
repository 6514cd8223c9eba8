pub mod alerts;
pub mod metrics;
