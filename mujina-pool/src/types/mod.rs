//! Small value types shared across the pool core.

mod debounced_alarm;
mod difficulty;

pub use debounced_alarm::{AlarmStatus, DebouncedAlarm};
pub use difficulty::Difficulty;
