//! Connection health bookkeeping.
//!
//! Three small managers keep per-peer connection hygiene out of the
//! transport itself: [`RetryManager`] budgets attempts with leaky-bucket
//! decay, [`TimeoutManager`] bounds how long an attempt may stay pending,
//! and [`BandwidthManager`] adapts data channel limits to link quality.

pub mod bandwidth;
pub mod retry;
pub mod timeout;

pub use crate::health::bandwidth::BandwidthManager;
pub use crate::health::bandwidth::BandwidthPolicy;
pub use crate::health::bandwidth::QualitySample;
pub use crate::health::retry::RetryManager;
pub use crate::health::timeout::TimeoutManager;
