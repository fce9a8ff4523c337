//! Shared test harnesses.

pub mod primary;
mod secondary;
pub mod upstream;
pub mod util;
