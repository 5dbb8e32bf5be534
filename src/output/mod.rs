//! Presentation of processed frames.

pub mod window_output;

pub use window_output::{WindowConfig, WindowRenderer};
