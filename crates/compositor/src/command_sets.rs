//! The two pre-recorded command buffer sets of a swapchain.
//!
//! One set runs every stage, the other only copies the application's image
//! through. Both have one command buffer per presentable image and are
//! recorded once per rebuild; presenting just picks one.

use crate::device::{CommandBuffer, Device};
use crate::errors::DeviceResult;
use crate::pipeline_builder::BuiltPipeline;
use crate::stage::EffectStage;

#[derive(Debug)]
pub struct CommandSets {
    effects: Vec<CommandBuffer>,
    pass_through: Vec<CommandBuffer>,
}

impl CommandSets {
    pub fn record(
        device: &mut dyn Device,
        pipeline: &BuiltPipeline,
        image_count: usize,
    ) -> DeviceResult<Self> {
        let effects = record_set(device, pipeline.stages(), image_count)?;
        let pass_through = match record_set(
            device,
            std::slice::from_ref(pipeline.default_pass_through()),
            image_count,
        ) {
            Ok(buffers) => buffers,
            Err(e) => {
                device.free_command_buffers(&effects);
                return Err(e);
            }
        };
        Ok(Self {
            effects,
            pass_through,
        })
    }

    /// The command buffer to submit for presentable image `index`.
    pub fn select(&self, effects_active: bool, index: usize) -> Option<CommandBuffer> {
        let set = if effects_active {
            &self.effects
        } else {
            &self.pass_through
        };
        set.get(index).copied()
    }

    pub fn effects(&self) -> &[CommandBuffer] {
        &self.effects
    }

    pub fn pass_through(&self) -> &[CommandBuffer] {
        &self.pass_through
    }

    pub fn free(self, device: &mut dyn Device) {
        device.free_command_buffers(&self.effects);
        device.free_command_buffers(&self.pass_through);
    }
}

fn record_set(
    device: &mut dyn Device,
    stages: &[EffectStage],
    image_count: usize,
) -> DeviceResult<Vec<CommandBuffer>> {
    let buffers = device.allocate_command_buffers(image_count as u32)?;
    for (index, &buffer) in buffers.iter().enumerate() {
        if let Err(e) = record_one(device, stages, buffer, index) {
            device.free_command_buffers(&buffers);
            return Err(e);
        }
    }
    Ok(buffers)
}

fn record_one(
    device: &mut dyn Device,
    stages: &[EffectStage],
    buffer: CommandBuffer,
    index: usize,
) -> DeviceResult<()> {
    device.begin_command_buffer(buffer)?;
    for stage in stages {
        stage.record(device, buffer, index);
    }
    device.end_command_buffer(buffer)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::device::{Extent, Format, Image};
    use crate::effect_registry::EffectRegistry;
    use crate::headless::{DeviceCall, HeadlessDevice};
    use crate::image_chain::{ChainDesc, SlotRef, VirtualImageChain};
    use crate::pipeline_builder;
    use crate::shader_compiler::MockShaderCompiler;

    fn setup(effects: &str, aliasing: bool) -> (HeadlessDevice, BuiltPipeline, VirtualImageChain) {
        let registry = EffectRegistry::new(Arc::new(MockShaderCompiler::new()));
        registry.initialize(&Config::parse(&format!("effects = {effects}\n"), None));

        let mut device = HeadlessDevice::new();
        let presentable: Vec<_> = (900..903).map(Image).collect();
        let chain = VirtualImageChain::allocate(&mut device, &presentable, ChainDesc {
            extent: Extent::new(320, 200),
            format: Format::Rgba8Unorm,
            slot_count: 4,
            aliasing,
        })
        .unwrap();
        let enabled = registry.get_enabled_effects();
        let pipeline = pipeline_builder::build(&mut device, &registry, &enabled, &chain);
        (device, pipeline, chain)
    }

    #[test]
    fn one_buffer_per_image_in_each_set() {
        let (mut device, pipeline, _chain) = setup("cas:fxaa", true);
        let sets = CommandSets::record(&mut device, &pipeline, 3).unwrap();

        assert_eq!(sets.effects().len(), 3);
        assert_eq!(sets.pass_through().len(), 3);
        for i in 0..3 {
            assert_eq!(sets.select(true, i), Some(sets.effects()[i]));
            assert_eq!(sets.select(false, i), Some(sets.pass_through()[i]));
        }
        assert_eq!(sets.select(true, 3), None);
    }

    #[test]
    fn effects_set_draws_every_stage() {
        let (mut device, pipeline, _chain) = setup("cas:fxaa", true);
        let probe = device.probe();
        probe.clear_calls();
        let sets = CommandSets::record(&mut device, &pipeline, 3).unwrap();

        let first = sets.effects()[0];
        let draws = probe.count(|c| matches!(c, DeviceCall::DrawEffect { buffer, .. } if *buffer == first));
        assert_eq!(draws, 2);

        let off = sets.pass_through()[0];
        let copies = probe.count(|c| matches!(c, DeviceCall::CopyImage { buffer, .. } if *buffer == off));
        assert_eq!(copies, 1);
    }

    #[test]
    fn pass_through_set_copies_slot_zero_to_the_presentable_image() {
        let (mut device, pipeline, chain) = setup("cas", false);
        let probe = device.probe();
        probe.clear_calls();
        let sets = CommandSets::record(&mut device, &pipeline, 3).unwrap();

        let off = sets.pass_through()[1];
        let copy = probe.calls().into_iter().find_map(|c| match c {
            DeviceCall::CopyImage { buffer, src, dst } if buffer == off => Some((src, dst)),
            _ => None,
        });
        assert_eq!(
            copy,
            Some((chain.images(SlotRef::Slot(0)).images[1], Image(901)))
        );
    }

    #[test]
    fn recording_failure_frees_what_was_allocated() {
        let (mut device, pipeline, _chain) = setup("cas", true);
        let probe = device.probe();
        probe.fail_call("end_command_buffer");

        let err = CommandSets::record(&mut device, &pipeline, 3).unwrap_err();
        assert_eq!(err.call, "end_command_buffer");
        assert_eq!(probe.live_command_buffers(), 0);
    }

    #[test]
    fn free_returns_both_sets() {
        let (mut device, pipeline, _chain) = setup("cas", true);
        let probe = device.probe();
        let sets = CommandSets::record(&mut device, &pipeline, 3).unwrap();
        assert_eq!(probe.live_command_buffers(), 6);

        sets.free(&mut device);
        assert_eq!(probe.live_command_buffers(), 0);
    }
}
