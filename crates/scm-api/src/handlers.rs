//! Request handlers.

pub mod health;
pub mod processing;

pub use health::*;
pub use processing::*;
