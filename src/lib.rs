//! Iris: GPU shader video player
//!
//! Decodes video with ffmpeg, applies GPU fragment shader effects, and
//! displays the result in a window.

pub mod effect;
pub mod frame;
pub mod media;
pub mod output;
pub mod player;
pub mod shader;
pub mod utils;
pub mod watch;
