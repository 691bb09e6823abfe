pub mod progress;
pub mod storage;
pub mod telemetry;
