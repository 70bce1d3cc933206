//! Turns the active effect list into wired-up [EffectStage]s.
//!
//! Building never fails as a whole: an effect that can't be built is marked as
//! failed on the registry and its slot gets a pass-through instead, so the
//! chain always ends up with a complete image in the presentable images.

use serde::Serialize;

use crate::device::Device;
use crate::effect_defs;
use crate::effect_registry::{EffectKind, EffectRegistry};
use crate::errors::StageError;
use crate::image_chain::{SlotRef, VirtualImageChain};
use crate::stage::{EffectStage, StageContext, StageIo};

/// Name of the stages the builder makes up itself.
pub const PASS_THROUGH_NAME: &str = "passthrough";

#[derive(Debug)]
pub struct BuiltPipeline {
    stages: Vec<EffectStage>,
    /// Copies slot 0 straight to the presentable images, for when effects
    /// are toggled off.
    default_pass_through: EffectStage,
}

/// A stage as shown to people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagePlan {
    pub name: String,
    pub kind: &'static str,
    pub input: SlotRef,
    pub output: SlotRef,
}

impl BuiltPipeline {
    pub fn stages(&self) -> &[EffectStage] {
        &self.stages
    }

    pub fn default_pass_through(&self) -> &EffectStage {
        &self.default_pass_through
    }

    pub fn plan(&self) -> Vec<StagePlan> {
        self.stages
            .iter()
            .map(|s| StagePlan {
                name: s.name().to_owned(),
                kind: s.kind_name(),
                input: s.input(),
                output: s.output(),
            })
            .collect()
    }

    pub fn destroy(self, device: &mut dyn Device) {
        for stage in self.stages {
            stage.destroy(device);
        }
        self.default_pass_through.destroy(device);
    }
}

/// Build one stage per name in `enabled`, in order. Names that are failed,
/// disabled or unknown get a pass-through in their slot.
pub fn build(
    device: &mut dyn Device,
    registry: &EffectRegistry,
    enabled: &[String],
    chain: &VirtualImageChain,
) -> BuiltPipeline {
    let io = move |input: SlotRef, output: SlotRef| StageIo {
        input,
        output,
        src: chain.images(input),
        dst: chain.images(output),
        extent: chain.desc().extent,
    };

    let first = chain.slot_ref(0);
    let default_pass_through =
        EffectStage::pass_through(PASS_THROUGH_NAME, &io(first, SlotRef::Presentable));

    let mut enabled = enabled;
    if enabled.len() > chain.slot_count() {
        util::log_warning!(
            "{} effects are enabled but there is only room for {}, dropping {:?}",
            enabled.len(),
            chain.slot_count(),
            &enabled[chain.slot_count()..]
        );
        enabled = &enabled[..chain.slot_count()];
    }

    if enabled.is_empty() {
        return BuiltPipeline {
            stages: vec![EffectStage::pass_through(
                PASS_THROUGH_NAME,
                &io(first, SlotRef::Presentable),
            )],
            default_pass_through,
        };
    }

    let mut stages = Vec::with_capacity(enabled.len() + 1);
    for (i, name) in enabled.iter().enumerate() {
        let output = if i + 1 == enabled.len() {
            chain.final_slot()
        } else {
            chain.slot_ref(i + 1)
        };
        stages.push(build_stage(device, registry, name, io(chain.slot_ref(i), output)));
    }

    if !chain.aliasing() {
        stages.push(EffectStage::pass_through(
            PASS_THROUGH_NAME,
            &io(chain.final_slot(), SlotRef::Presentable),
        ));
    }

    util::log_debug!(
        "Built {} stages: {:?}",
        stages.len(),
        stages.iter().map(EffectStage::name).collect::<Vec<_>>()
    );

    BuiltPipeline {
        stages,
        default_pass_through,
    }
}

fn build_stage(
    device: &mut dyn Device,
    registry: &EffectRegistry,
    name: &str,
    io: StageIo<'_>,
) -> EffectStage {
    let Some(effect) = registry.get_effect(name) else {
        util::log_warning!("Effect '{name}' isn't loaded, passing its slot through");
        return EffectStage::pass_through(name, &io);
    };
    if effect.failed() || !effect.enabled {
        return EffectStage::pass_through(name, &io);
    }

    let mut ctx = StageContext {
        device,
        effect: &effect,
        io,
    };
    let result = match effect.kind {
        EffectKind::BuiltIn => match effect_defs::get_def(&effect.effect_type) {
            Some(def) => (def.factory)(def, &mut ctx),
            None => Err(StageError::MissingModule(name.to_owned())),
        },
        EffectKind::UserShader => EffectStage::user_shader(&mut ctx),
    };

    match result {
        Ok(stage) => stage,
        Err(e) => {
            util::log_error!("Failed to build effect '{name}', passing its slot through: {e}");
            registry.mark_failed(name, e.to_string());
            EffectStage::pass_through(name, &io)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::device::{Extent, Format, Image};
    use crate::headless::{DeviceCall, HeadlessDevice, HeadlessProbe};
    use crate::image_chain::ChainDesc;
    use crate::shader_compiler::{CompileOutput, CompiledModule, MockShaderCompiler};
    use crate::stage::StageKind;
    use crate::test_support::temp_file;

    struct Fixture {
        device: HeadlessDevice,
        probe: HeadlessProbe,
        registry: EffectRegistry,
    }

    fn fixture(config: &str) -> Fixture {
        let mut compiler = MockShaderCompiler::new();
        compiler.expect_compile().returning(|path, _| CompileOutput {
            success: true,
            parameters: Vec::new(),
            preprocessor_macros: Vec::new(),
            error: None,
            module: Some(Arc::new(CompiledModule {
                source: path.to_owned(),
                code: vec![1, 2, 3],
                entry_point: "main".to_owned(),
            })),
        });
        let registry = EffectRegistry::new(Arc::new(compiler));
        registry.initialize(&Config::parse(config, None));
        let device = HeadlessDevice::new();
        let probe = device.probe();
        Fixture {
            device,
            probe,
            registry,
        }
    }

    fn chain(f: &mut Fixture, images: u64, slot_count: usize, aliasing: bool) -> VirtualImageChain {
        let presentable: Vec<_> = (500..500 + images).map(Image).collect();
        VirtualImageChain::allocate(&mut f.device, &presentable, ChainDesc {
            extent: Extent::new(1280, 720),
            format: Format::Bgra8Unorm,
            slot_count,
            aliasing,
        })
        .unwrap()
    }

    fn wiring(pipeline: &BuiltPipeline) -> Vec<(&str, &str, SlotRef, SlotRef)> {
        pipeline
            .stages()
            .iter()
            .map(|s| (s.name(), s.kind_name(), s.input(), s.output()))
            .collect()
    }

    fn build_active(f: &mut Fixture, chain: &VirtualImageChain) -> BuiltPipeline {
        let active = f.registry.get_active_effects();
        build(&mut f.device, &f.registry, &active, chain)
    }

    #[test]
    fn empty_selection_is_a_single_pass_through() {
        let mut f = fixture("effects =\n");
        let chain = chain(&mut f, 3, 10, true);
        let pipeline = build_active(&mut f, &chain);

        assert_eq!(wiring(&pipeline), [(
            "passthrough",
            "passthrough",
            SlotRef::Slot(0),
            SlotRef::Presentable
        )]);
        assert!(pipeline.default_pass_through().is_pass_through());
    }

    #[test]
    fn fxaa_then_cas_on_an_aliasing_chain() {
        let mut f = fixture("effects = fxaa:cas\nmaxEffects = 10\n");
        let chain = chain(&mut f, 3, 10, true);
        assert_eq!(chain.total_images(), 30);

        let pipeline = build_active(&mut f, &chain);
        assert_eq!(wiring(&pipeline), [
            ("fxaa", "builtin", SlotRef::Slot(0), SlotRef::Slot(1)),
            ("cas", "builtin", SlotRef::Slot(1), SlotRef::Presentable),
        ]);
        assert_eq!(f.probe.pipeline_labels(), ["pipeline/fxaa", "pipeline/cas"]);
    }

    #[test]
    fn a_failing_effect_becomes_a_pass_through() {
        let mut f = fixture("effects = fxaa:cas\n");
        f.probe.fail_pipeline("pipeline/fxaa");
        let chain = chain(&mut f, 3, 10, true);

        let pipeline = build_active(&mut f, &chain);
        assert_eq!(wiring(&pipeline), [
            ("fxaa", "passthrough", SlotRef::Slot(0), SlotRef::Slot(1)),
            ("cas", "builtin", SlotRef::Slot(1), SlotRef::Presentable),
        ]);
        assert!(f.registry.has_effect_failed("fxaa"));
        assert!(!f.registry.get_effect("fxaa").unwrap().enabled);
        assert_eq!(f.registry.get_enabled_effects(), ["cas"]);

        let rebuilt = build_active(&mut f, &chain);
        assert_eq!(wiring(&rebuilt), wiring(&pipeline));
        assert_eq!(f.probe.pipeline_labels(), ["pipeline/cas", "pipeline/cas"]);
    }

    #[test]
    fn disabled_and_unknown_names_pass_through() {
        let mut f = fixture("effects = cas:fxaa\ndisabledEffects = fxaa\n");
        let chain = chain(&mut f, 2, 4, true);

        let enabled = ["ghost".to_owned(), "fxaa".to_owned(), "cas".to_owned()];
        let pipeline = build(&mut f.device, &f.registry, &enabled, &chain);
        let kinds: Vec<_> = pipeline.stages().iter().map(EffectStage::kind_name).collect();
        assert_eq!(kinds, ["passthrough", "passthrough", "builtin"]);
        assert_eq!(f.probe.pipeline_labels(), ["pipeline/cas"]);
    }

    #[test]
    fn non_aliasing_chain_gets_a_trailing_copy() {
        let mut f = fixture("effects = cas\n");
        let chain = chain(&mut f, 2, 2, false);

        let pipeline = build_active(&mut f, &chain);
        assert_eq!(wiring(&pipeline), [
            ("cas", "builtin", SlotRef::Slot(0), SlotRef::Slot(2)),
            ("passthrough", "passthrough", SlotRef::Slot(2), SlotRef::Presentable),
        ]);
    }

    #[test]
    fn selections_beyond_the_slot_budget_are_truncated() {
        let mut f = fixture("effects = cas:dls:deband\n");
        let chain = chain(&mut f, 2, 2, true);

        let pipeline = build_active(&mut f, &chain);
        let names: Vec<_> = pipeline.stages().iter().map(EffectStage::name).collect();
        assert_eq!(names, ["cas", "dls"]);
        assert_eq!(pipeline.stages()[1].output(), SlotRef::Presentable);
    }

    #[test]
    fn perceptual_effects_bind_the_unorm_views() {
        let mut f = fixture("effects = smaa:cas\n");
        let chain = chain(&mut f, 1, 2, true);
        let _pipeline = build_active(&mut f, &chain);

        let slot0 = chain.images(SlotRef::Slot(0));
        let slot1 = chain.images(SlotRef::Slot(1));
        let inputs: Vec<_> = f
            .probe
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::CreateDescriptorSet { inputs, .. } => Some(inputs),
                _ => None,
            })
            .collect();
        assert_eq!(inputs, [vec![slot0.perceptual_views[0]], vec![slot1.views[0]]]);
    }

    #[test]
    fn parameters_are_pushed_as_constants() {
        let mut f = fixture("effects = cas\ncas#sharpness = 0.25\n");
        let chain = chain(&mut f, 1, 1, true);
        let pipeline = build_active(&mut f, &chain);

        let StageKind::BuiltIn { gpu, .. } = pipeline.stages()[0].kind() else {
            panic!("cas should be a built-in stage");
        };
        assert_eq!(gpu.push_constants(), 0.25f32.to_ne_bytes());
    }

    #[test]
    fn user_shaders_build_from_their_module() {
        let shader = temp_file("builder_user.fx", "// shader\n");
        let mut f = fixture(&format!("effects = mine\nmine = {}\n", shader.display()));
        let chain = chain(&mut f, 2, 3, true);

        let pipeline = build_active(&mut f, &chain);
        assert_eq!(pipeline.stages()[0].kind_name(), "shader");
        assert_eq!(f.probe.pipeline_labels(), ["pipeline/mine"]);
    }

    #[test]
    fn lut_loads_its_table() {
        let cube = temp_file(
            "builder.cube",
            "LUT_3D_SIZE 2\n0 0 0\n1 0 0\n0 1 0\n1 1 0\n0 0 1\n1 0 1\n0 1 1\n1 1 1\n",
        );
        let mut f = fixture(&format!("effects = lut\nlut#lutFile = {}\n", cube.display()));
        let chain = chain(&mut f, 2, 1, true);

        let pipeline = build_active(&mut f, &chain);
        assert_eq!(pipeline.stages()[0].kind_name(), "builtin");
        assert_eq!(f.probe.live_luts(), 1);

        pipeline.destroy(&mut f.device);
        assert_eq!(f.probe.live_luts(), 0);
    }

    #[test]
    fn lut_without_a_table_fails_cleanly() {
        let mut f = fixture("effects = lut:cas\n");
        let chain = chain(&mut f, 2, 2, true);

        let pipeline = build_active(&mut f, &chain);
        assert!(pipeline.stages()[0].is_pass_through());
        let error = f.registry.get_effect_error("lut").unwrap();
        assert!(error.contains("lutFile"), "{error}");
    }

    #[test]
    fn destroy_releases_every_stage_object() {
        let mut f = fixture("effects = fxaa:cas:deband\n");
        let chain = chain(&mut f, 3, 3, true);

        let pipeline = build_active(&mut f, &chain);
        assert_eq!(f.probe.live_pipelines(), 3);
        assert_eq!(f.probe.live_descriptor_sets(), 9);

        pipeline.destroy(&mut f.device);
        assert_eq!(f.probe.live_pipelines(), 0);
        assert_eq!(f.probe.live_descriptor_sets(), 0);
    }
}
