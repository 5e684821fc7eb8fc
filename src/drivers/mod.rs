//! Built-in storage drivers.

pub mod mock;

pub use mock::{MockDriver, MockOptions};
