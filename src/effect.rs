//! Effect registry: the closed set of named effects and their fragment bodies.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Named pixel effect applied to every displayed frame.
///
/// All variants except `Custom` carry fixed built-in shader source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Effect {
    /// Passthrough (identity)
    None,
    Grayscale,
    Sepia,
    Blur,
    Invert,
    /// User-supplied fragment body staged via `EffectState::stage_custom`
    Custom,
}

impl Effect {
    /// Human-readable name, matching the CLI value.
    pub fn name(&self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Grayscale => "grayscale",
            Effect::Sepia => "sepia",
            Effect::Blur => "blur",
            Effect::Invert => "invert",
            Effect::Custom => "custom",
        }
    }
}

const GRAYSCALE_BODY: &str = "\
float luma = dot(color.rgb, vec3(0.299, 0.587, 0.114));
out_color = vec4(luma, luma, luma, color.a);";

const SEPIA_BODY: &str = "\
float r = dot(color.rgb, vec3(0.393, 0.769, 0.189));
float g = dot(color.rgb, vec3(0.349, 0.686, 0.168));
float b = dot(color.rgb, vec3(0.272, 0.534, 0.131));
out_color = vec4(r, g, b, color.a);";

const BLUR_BODY: &str = "\
vec4 sum = texture(video, vec2(coord.x - 0.01, 1.0 - coord.y)) * 0.2;
sum += texture(video, vec2(coord.x, 1.0 - coord.y)) * 0.6;
sum += texture(video, vec2(coord.x + 0.01, 1.0 - coord.y)) * 0.2;
out_color = sum;";

const INVERT_BODY: &str = "out_color = vec4(1.0 - color.rgb, color.a);";

/// Returns the fixed fragment body for a built-in effect.
///
/// Pure lookup: the same effect always yields the same source. `None` and
/// `Custom` yield the empty body, which the program builder treats as
/// passthrough.
pub fn builtin_body(effect: Effect) -> &'static str {
    match effect {
        Effect::None | Effect::Custom => "",
        Effect::Grayscale => GRAYSCALE_BODY,
        Effect::Sepia => SEPIA_BODY,
        Effect::Blur => BLUR_BODY,
        Effect::Invert => INVERT_BODY,
    }
}

/// Active effect selection plus the staged custom source.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectState {
    active: Effect,
    custom_source: String,
}

impl EffectState {
    pub fn new(initial: Effect) -> Self {
        Self {
            active: initial,
            custom_source: String::new(),
        }
    }

    pub fn active(&self) -> Effect {
        self.active
    }

    pub fn custom_source(&self) -> &str {
        &self.custom_source
    }

    /// Switches the active effect.
    ///
    /// Selecting a built-in effect discards any staged custom source;
    /// selecting `Custom` keeps whatever is currently staged.
    pub fn select(&mut self, effect: Effect) {
        if effect != Effect::Custom {
            self.custom_source.clear();
        }
        self.active = effect;
    }

    /// Stages source text for the `Custom` effect without activating it.
    pub fn stage_custom(&mut self, source: String) {
        self.custom_source = source;
    }

    /// Returns the fragment body for the active effect.
    pub fn fragment_body(&self) -> &str {
        match self.active {
            Effect::Custom => &self.custom_source,
            other => builtin_body(other),
        }
    }
}

impl Default for EffectState {
    fn default() -> Self {
        Self::new(Effect::None)
    }
}

/// Named custom shader bodies loadable from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct PresetFile {
    pub shaders: BTreeMap<String, String>,
}

impl PresetFile {
    /// Loads and parses a preset file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read preset file {:?}", path))?;
        let presets: PresetFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse preset file {:?}", path))?;
        Ok(presets)
    }

    /// Looks up a preset body by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.shaders.get(name).map(String::as_str)
    }
}
