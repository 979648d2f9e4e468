//! Adapter implementations for pipeline ports.

pub mod memory;
pub mod postgres;

mod timing;

pub use timing::TokioSleeper;
