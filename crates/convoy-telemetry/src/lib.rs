pub mod common;
pub mod error;
pub mod recorder;
pub mod telemetry;

pub use telemetry::init_telemetry;
