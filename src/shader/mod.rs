//! Shader program building and the GPU effect stage.

mod gpu_context;
mod pipeline;
mod program;

pub use gpu_context::GpuContext;
pub use pipeline::GpuEffectStage;
pub use program::{build_program, ShaderProgram};

use crate::frame::VideoFrame;
use anyhow::Result;
use thiserror::Error;

/// Shader build failures, carrying the backend diagnostic.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("vertex stage failed to compile: {0}")]
    VertexCompile(String),
    #[error("fragment stage failed to compile: {0}")]
    FragmentCompile(String),
    #[error("program link failed: {0}")]
    Link(String),
}

/// GPU side of the render loop.
///
/// Installs built programs and renders decoded frames through the installed
/// one. Exactly one program is installed at a time; installing a new one
/// drops the previous pipeline.
pub trait EffectStage {
    /// Fragment body of the currently installed program.
    fn installed_body(&self) -> Option<&str>;

    /// Installs a built program, replacing the previous one.
    fn install(&mut self, program: ShaderProgram);

    /// Uploads `frame`, draws the full-screen quad through the installed
    /// program, and returns the processed frame. `time` is the playback
    /// position in seconds, exposed to shaders as a uniform.
    fn render(&mut self, frame: &VideoFrame, time: f32) -> Result<VideoFrame>;
}
