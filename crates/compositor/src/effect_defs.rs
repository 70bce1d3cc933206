//! The effects shipped with the layer.
//!
//! Each [EffectDef] says which shader draws the effect, what parameters it
//! has and how to build a stage for it. Use [get_def] to look one up by type
//! name.

use std::path::Path;

use crate::errors::StageError;
use crate::lut;
use crate::params::Parameter;
use crate::stage::{EffectStage, StageContext};

pub type StageFactory =
    fn(&'static EffectDef, &mut StageContext<'_>) -> Result<EffectStage, StageError>;

#[derive(Debug)]
pub struct EffectDef {
    pub name: &'static str,
    pub description: &'static str,
    /// Sample and render through the non-sRGB view of each image.
    pub uses_perceptual_encoding: bool,
    /// Name of the built-in shader that draws this effect.
    pub shader: &'static str,
    pub schema: fn() -> Vec<Parameter>,
    /// Config options that aren't numeric parameters, like a file path.
    pub options: &'static [&'static str],
    pub factory: StageFactory,
}

impl EffectDef {
    /// The effect's parameters at their defaults.
    pub fn parameters(&self) -> Vec<Parameter> {
        (self.schema)()
    }
}

pub fn get_def(effect_type: &str) -> Option<&'static EffectDef> {
    DEFS.iter().find(|d| d.name == effect_type)
}

pub fn is_builtin(effect_type: &str) -> bool {
    get_def(effect_type).is_some()
}

pub fn all() -> &'static [EffectDef] {
    &DEFS
}

static DEFS: [EffectDef; 7] = [
    EffectDef {
        name: "passthrough",
        description: "Copies the image unchanged",
        uses_perceptual_encoding: false,
        shader: "copy",
        schema: Vec::new,
        options: &[],
        factory: pass_through_stage,
    },
    EffectDef {
        name: "cas",
        description: "Contrast adaptive sharpening",
        uses_perceptual_encoding: false,
        shader: "cas",
        schema: cas_schema,
        options: &[],
        factory: shader_stage,
    },
    EffectDef {
        name: "dls",
        description: "Denoised luma sharpening",
        uses_perceptual_encoding: false,
        shader: "dls",
        schema: dls_schema,
        options: &[],
        factory: shader_stage,
    },
    EffectDef {
        name: "fxaa",
        description: "Fast approximate anti-aliasing",
        uses_perceptual_encoding: true,
        shader: "fxaa",
        schema: fxaa_schema,
        options: &[],
        factory: shader_stage,
    },
    EffectDef {
        name: "smaa",
        description: "Subpixel morphological anti-aliasing",
        uses_perceptual_encoding: true,
        shader: "smaa",
        schema: smaa_schema,
        options: &[],
        factory: shader_stage,
    },
    EffectDef {
        name: "deband",
        description: "Removes color banding",
        uses_perceptual_encoding: false,
        shader: "deband",
        schema: deband_schema,
        options: &[],
        factory: shader_stage,
    },
    EffectDef {
        name: "lut",
        description: "Color grading through a .cube lookup table",
        uses_perceptual_encoding: false,
        shader: "lut",
        schema: Vec::new,
        options: &[LUT_FILE_OPTION],
        factory: lut_stage,
    },
];

const LUT_FILE_OPTION: &str = "lutFile";

fn cas_schema() -> Vec<Parameter> {
    vec![Parameter::float("sharpness", 0.4, 0.0, 1.0).with_step(0.01)]
}

fn dls_schema() -> Vec<Parameter> {
    vec![
        Parameter::float("sharpness", 0.5, 0.0, 1.0).with_step(0.01),
        Parameter::float("denoise", 0.17, 0.0, 1.0).with_step(0.01),
    ]
}

fn fxaa_schema() -> Vec<Parameter> {
    vec![
        Parameter::float("qualitySubpix", 0.75, 0.0, 1.0).with_label("Subpixel quality"),
        Parameter::float("qualityEdgeThreshold", 0.125, 0.0, 0.5)
            .with_label("Edge threshold"),
        Parameter::float("qualityEdgeThresholdMin", 0.0312, 0.0, 0.1)
            .with_label("Edge threshold minimum"),
    ]
}

fn smaa_schema() -> Vec<Parameter> {
    vec![
        Parameter::int("edgeDetection", 0, 0, 1)
            .with_label("Edge detection")
            .with_choices(&["luma", "color"]),
        Parameter::float("threshold", 0.05, 0.0, 0.5).with_step(0.01),
        Parameter::int("maxSearchSteps", 32, 0, 112).with_label("Max search steps"),
        Parameter::int("maxSearchStepsDiag", 16, 0, 20)
            .with_label("Max diagonal search steps"),
        Parameter::int("cornerRounding", 25, 0, 100).with_label("Corner rounding"),
    ]
}

fn deband_schema() -> Vec<Parameter> {
    vec![
        Parameter::float("avgdiff", 3.4, 0.0, 255.0).with_label("Average difference"),
        Parameter::float("maxdiff", 6.8, 0.0, 255.0).with_label("Maximum difference"),
        Parameter::float("middiff", 3.3, 0.0, 255.0).with_label("Middle difference"),
        Parameter::float("range", 16.0, 1.0, 64.0).with_step(1.0),
        Parameter::int("iterations", 4, 1, 16),
    ]
}

fn pass_through_stage(
    _: &'static EffectDef,
    ctx: &mut StageContext<'_>,
) -> Result<EffectStage, StageError> {
    Ok(EffectStage::pass_through(&ctx.effect.instance_name, &ctx.io))
}

fn shader_stage(
    def: &'static EffectDef,
    ctx: &mut StageContext<'_>,
) -> Result<EffectStage, StageError> {
    EffectStage::built_in(ctx, def, None)
}

fn lut_stage(def: &'static EffectDef, ctx: &mut StageContext<'_>) -> Result<EffectStage, StageError> {
    let path = ctx
        .effect
        .options
        .get(LUT_FILE_OPTION)
        .ok_or_else(|| StageError::MissingOption {
            effect: ctx.effect.instance_name.clone(),
            option: LUT_FILE_OPTION.to_owned(),
        })?;
    let table = lut::load_cube(Path::new(path))?;
    let texture = ctx.device.create_lut(table.size, &table.rgba)?;
    EffectStage::built_in(ctx, def, Some(texture))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_is_found_by_name() {
        for name in ["passthrough", "cas", "dls", "fxaa", "smaa", "deband", "lut"] {
            let def = get_def(name).unwrap_or_else(|| panic!("{name} is missing"));
            assert_eq!(def.name, name);
        }
        assert!(get_def("bloom").is_none());
        assert!(!is_builtin("myfx"));
    }

    #[test]
    fn anti_aliasing_uses_the_perceptual_view() {
        assert!(get_def("smaa").unwrap().uses_perceptual_encoding);
        assert!(get_def("fxaa").unwrap().uses_perceptual_encoding);
        assert!(!get_def("cas").unwrap().uses_perceptual_encoding);
    }

    #[test]
    fn schemas_start_at_their_defaults() {
        for def in all() {
            let params = def.parameters();
            assert!(params.iter().all(|p| !p.changed()), "{} has changed params", def.name);

            let mut names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), params.len(), "{} repeats a parameter", def.name);
        }
    }

    #[test]
    fn cas_has_a_single_sharpness_knob() {
        let params = get_def("cas").unwrap().parameters();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "sharpness");
        assert_eq!(params[0].value_strings(), ["0.4"]);
    }
}
