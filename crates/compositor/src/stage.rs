//! One step of the effect pipeline.
//!
//! An [EffectStage] reads one [ImageSet] and writes another, once per
//! presentable image. It's either a plain copy, a built-in effect or a
//! compiled user shader; all three record through [EffectStage::record].

use std::sync::Arc;

use crate::device::{
    CommandBuffer, DescriptorSet, Device, DrawEffect, EffectPipelineDesc, Extent, GpuPipeline,
    LutTexture, ShaderSource,
};
use crate::effect_defs::EffectDef;
use crate::effect_registry::EffectConfig;
use crate::errors::StageError;
use crate::image_chain::{ImageSet, SlotRef};
use crate::params::pack_push_constants;
use crate::shader_compiler::CompiledModule;

/// The images a stage is wired to.
#[derive(Debug, Clone, Copy)]
pub struct StageIo<'a> {
    pub input: SlotRef,
    pub output: SlotRef,
    pub src: &'a ImageSet,
    pub dst: &'a ImageSet,
    pub extent: Extent,
}

/// Everything a stage needs while it's being created.
pub struct StageContext<'a> {
    pub device: &'a mut dyn Device,
    pub effect: &'a EffectConfig,
    pub io: StageIo<'a>,
}

#[derive(Debug)]
pub enum StageKind {
    PassThrough,
    BuiltIn {
        def: &'static EffectDef,
        gpu: GpuStage,
    },
    UserShader {
        module: Arc<CompiledModule>,
        gpu: GpuStage,
    },
}

#[derive(Debug)]
pub struct EffectStage {
    name: String,
    input: SlotRef,
    output: SlotRef,
    src: ImageSet,
    dst: ImageSet,
    extent: Extent,
    kind: StageKind,
}

impl EffectStage {
    /// A stage that copies its input to its output unchanged.
    pub fn pass_through(name: &str, io: &StageIo<'_>) -> Self {
        Self::with_kind(name, io, StageKind::PassThrough)
    }

    pub fn built_in(
        ctx: &mut StageContext<'_>,
        def: &'static EffectDef,
        lut: Option<LutTexture>,
    ) -> Result<Self, StageError> {
        let gpu = GpuStage::create(
            ctx,
            ShaderSource::BuiltIn(def.shader),
            def.uses_perceptual_encoding,
            lut,
        )?;
        Ok(Self::with_kind(
            &ctx.effect.instance_name,
            &ctx.io,
            StageKind::BuiltIn { def, gpu },
        ))
    }

    pub fn user_shader(ctx: &mut StageContext<'_>) -> Result<Self, StageError> {
        let module = ctx
            .effect
            .module
            .clone()
            .ok_or_else(|| StageError::MissingModule(ctx.effect.instance_name.clone()))?;
        let gpu = GpuStage::create(ctx, ShaderSource::Module(Arc::clone(&module)), false, None)?;
        Ok(Self::with_kind(
            &ctx.effect.instance_name,
            &ctx.io,
            StageKind::UserShader { module, gpu },
        ))
    }

    fn with_kind(name: &str, io: &StageIo<'_>, kind: StageKind) -> Self {
        Self {
            name: name.to_owned(),
            input: io.input,
            output: io.output,
            src: io.src.clone(),
            dst: io.dst.clone(),
            extent: io.extent,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> SlotRef {
        self.input
    }

    pub fn output(&self) -> SlotRef {
        self.output
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self.kind, StageKind::PassThrough)
    }

    /// Short name of the stage's kind for logs and plans.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            StageKind::PassThrough => "passthrough",
            StageKind::BuiltIn { .. } => "builtin",
            StageKind::UserShader { .. } => "shader",
        }
    }

    /// Record this stage's work for presentable image `index`.
    pub fn record(&self, device: &mut dyn Device, buffer: CommandBuffer, index: usize) {
        match &self.kind {
            StageKind::PassThrough => {
                let (src, dst) = (self.src.images[index], self.dst.images[index]);
                // A zero-slot aliasing chain hands the app the presentable
                // images directly, nothing to copy then.
                if src != dst {
                    device.cmd_copy_image(buffer, src, dst, self.extent);
                }
            }
            StageKind::BuiltIn { gpu, .. } | StageKind::UserShader { gpu, .. } => {
                device.cmd_draw_effect(buffer, &DrawEffect {
                    pipeline: gpu.pipeline,
                    descriptor_set: gpu.descriptor_sets[index],
                    target: self.dst.view(index, gpu.perceptual),
                    extent: self.extent,
                    push_constants: &gpu.push_constants,
                });
            }
        }
    }

    pub fn destroy(self, device: &mut dyn Device) {
        match self.kind {
            StageKind::PassThrough => {}
            StageKind::BuiltIn { gpu, .. } | StageKind::UserShader { gpu, .. } => {
                gpu.destroy(device)
            }
        }
    }
}

/// The GPU objects behind a drawing stage.
#[derive(Debug)]
pub struct GpuStage {
    pipeline: GpuPipeline,
    /// One per presentable image.
    descriptor_sets: Vec<DescriptorSet>,
    push_constants: Vec<u8>,
    /// Binds the perceptual views instead of the linear ones.
    perceptual: bool,
    lut: Option<LutTexture>,
}

impl GpuStage {
    /// Takes ownership of `lut` and releases it if creation fails.
    fn create(
        ctx: &mut StageContext<'_>,
        shader: ShaderSource,
        perceptual: bool,
        lut: Option<LutTexture>,
    ) -> Result<Self, StageError> {
        let push_constants = pack_push_constants(&ctx.effect.parameters);
        let label = format!("pipeline/{}", ctx.effect.instance_name);

        let mut stage = GpuStage {
            pipeline: GpuPipeline(0),
            descriptor_sets: Vec::new(),
            push_constants,
            perceptual,
            lut,
        };

        let desc = EffectPipelineDesc {
            label: &label,
            shader,
            target_format: ctx.io.dst.view_format(perceptual),
            push_constant_size: stage.push_constants.len() as u32,
            input_count: 1 + u32::from(stage.lut.is_some()),
        };
        stage.pipeline = match ctx.device.create_effect_pipeline(&desc) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                if let Some(lut) = stage.lut.take() {
                    ctx.device.destroy_lut(lut);
                }
                return Err(e.into());
            }
        };

        for i in 0..ctx.io.src.len() {
            let mut inputs = vec![ctx.io.src.view(i, perceptual)];
            inputs.extend(stage.lut.map(|lut| lut.view));
            match ctx.device.create_descriptor_set(stage.pipeline, &inputs) {
                Ok(set) => stage.descriptor_sets.push(set),
                Err(e) => {
                    stage.destroy(ctx.device);
                    return Err(e.into());
                }
            }
        }

        Ok(stage)
    }

    fn destroy(self, device: &mut dyn Device) {
        for set in self.descriptor_sets {
            device.destroy_descriptor_set(set);
        }
        device.destroy_effect_pipeline(self.pipeline);
        if let Some(lut) = self.lut {
            device.destroy_lut(lut);
        }
    }

    pub fn push_constants(&self) -> &[u8] {
        &self.push_constants
    }
}
