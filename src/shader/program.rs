//! Shader program builder: assembles, translates, and validates the
//! vertex/fragment pair for an effect body.

use super::ShaderError;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;

/// Fixed vertex stage in WGSL.
///
/// Maps the unit quad's corners to clip space and derives the texture
/// coordinate as `position * 0.5 + 0.5`.
const VERTEX_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) coord: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.coord = in.position * 0.5 + vec2<f32>(0.5, 0.5);
    return out;
}
"#;

/// A compiled shader program, compared by content to decide rebuilds.
///
/// Holds the effect body it was built from together with the translated
/// WGSL for both stages. Values are immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderProgram {
    fragment_body: String,
    vertex_wgsl: &'static str,
    fragment_wgsl: String,
}

impl ShaderProgram {
    /// The effect body this program was built from, verbatim.
    pub fn fragment_body(&self) -> &str {
        &self.fragment_body
    }

    pub fn vertex_wgsl(&self) -> &str {
        self.vertex_wgsl
    }

    pub fn fragment_wgsl(&self) -> &str {
        &self.fragment_wgsl
    }

    /// Entry point of the translated fragment stage.
    pub fn fragment_entry(&self) -> &'static str {
        "main"
    }

    pub fn vertex_entry(&self) -> &'static str {
        "vs_main"
    }
}

/// Wraps an effect body in the fragment stage scaffolding.
///
/// The wrapper samples the video texture at `(coord.x, 1.0 - coord.y)` into
/// `color` (the flip compensates for the decoder's top-left origin), exposes
/// the combined sampler as `video` for bodies that resample, and provides a
/// `Globals` uniform block with `time`, `width`, `height`, `seed`. A blank
/// body becomes the passthrough assignment.
fn assemble_fragment(body: &str) -> String {
    let body = if body.trim().is_empty() {
        "out_color = color;"
    } else {
        body
    };

    format!(
        r#"#version 450

layout(set = 0, binding = 0) uniform texture2D frame_tex;
layout(set = 0, binding = 1) uniform sampler frame_samp;

#define video sampler2D(frame_tex, frame_samp)

layout(set = 0, binding = 2) uniform Globals {{
    float time;
    float width;
    float height;
    float seed;
}};

layout(location = 0) in vec2 coord;
layout(location = 0) out vec4 out_color;

void main() {{
    vec4 color = texture(video, vec2(coord.x, 1.0 - coord.y));
    {body}
}}
"#
    )
}

/// Builds a program for the given effect body.
///
/// Pure translation: parses the fixed vertex stage, parses and validates the
/// assembled fragment stage with naga's GLSL front end, and emits WGSL. No
/// GPU objects are created here; installation happens at the effect stage.
pub fn build_program(fragment_body: &str) -> Result<ShaderProgram, ShaderError> {
    naga::front::wgsl::parse_str(VERTEX_SHADER)
        .map_err(|e| ShaderError::VertexCompile(e.to_string()))?;

    let glsl = assemble_fragment(fragment_body);

    let mut frontend = Frontend::default();
    let options = Options::from(ShaderStage::Fragment);
    let module = frontend.parse(&options, &glsl).map_err(|errors| {
        let log: Vec<String> = errors
            .errors
            .iter()
            .map(|e| format!("{:?}", e.kind))
            .collect();
        ShaderError::FragmentCompile(log.join("\n"))
    })?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let info = validator
        .validate(&module)
        .map_err(|e| ShaderError::Link(format!("{:?}", e)))?;

    let fragment_wgsl =
        naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
            .map_err(|e| ShaderError::Link(format!("{:?}", e)))?;

    Ok(ShaderProgram {
        fragment_body: fragment_body.to_string(),
        vertex_wgsl: VERTEX_SHADER,
        fragment_wgsl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{builtin_body, Effect};

    #[test]
    fn test_all_builtin_bodies_build() {
        for effect in [
            Effect::None,
            Effect::Grayscale,
            Effect::Sepia,
            Effect::Blur,
            Effect::Invert,
        ] {
            let result = build_program(builtin_body(effect));
            assert!(
                result.is_ok(),
                "{} failed to build: {:?}",
                effect.name(),
                result.err()
            );
        }
    }

    #[test]
    fn test_blank_body_is_passthrough() {
        let program = build_program("   \n").unwrap();
        assert!(!program.fragment_wgsl().is_empty());
        assert_eq!(program.fragment_body(), "   \n");
    }

    #[test]
    fn test_body_may_reference_globals_and_video() {
        let body = "\
vec4 shifted = texture(video, vec2(coord.x + 0.002 * seed, 1.0 - coord.y));
float pulse = 0.5 + 0.5 * sin(time);
out_color = vec4(mix(color.rgb, shifted.rgb, pulse) * (width / width), color.a);";
        build_program(body).expect("body using uniforms failed to build");
    }

    #[test]
    fn test_malformed_body_reports_fragment_error() {
        let err = build_program("this is not shader code;").unwrap_err();
        match err {
            ShaderError::FragmentCompile(log) => assert!(!log.is_empty()),
            other => panic!("expected fragment compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_programs_compare_by_content() {
        let a = build_program(builtin_body(Effect::Invert)).unwrap();
        let b = build_program(builtin_body(Effect::Invert)).unwrap();
        let c = build_program(builtin_body(Effect::Sepia)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
