//! The layer's side of one application swapchain.
//!
//! A [LogicalSwapchain] owns everything the layer created for a swapchain:
//! the virtual image chain, the stages, both command buffer sets and one
//! semaphore per presentable image.

use serde::Serialize;

use crate::command_sets::CommandSets;
use crate::device::{
    CommandBuffer, Device, DeviceCaps, Image, ImageUsage, Semaphore, SwapchainDesc,
    SwapchainHandle,
};
use crate::effect_registry::EffectRegistry;
use crate::errors::DeviceResult;
use crate::image_chain::{ChainDesc, VirtualImageChain};
use crate::pipeline_builder::{self, BuiltPipeline, StagePlan};

/// How a swapchain's chain is sized and what it starts out showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSizing {
    pub slot_count: usize,
    /// Only install a pass-through until the window stops resizing.
    pub pass_through_only: bool,
}

impl ChainSizing {
    /// Room for the whole selection, and never less than `max_effects`.
    pub fn for_selection(selected: usize, max_effects: usize) -> Self {
        Self {
            slot_count: selected.max(max_effects),
            pass_through_only: false,
        }
    }
}

/// The swapchain sizing and stage plan, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SwapchainPlan {
    pub present_images: usize,
    pub slot_count: usize,
    pub total_images: usize,
    pub aliasing: bool,
    pub pass_through_only: bool,
    pub stages: Vec<StagePlan>,
}

#[derive(Debug)]
struct Recorded {
    pipeline: BuiltPipeline,
    commands: CommandSets,
}

#[derive(Debug)]
pub struct LogicalSwapchain {
    handle: SwapchainHandle,
    desc: SwapchainDesc,
    chain: VirtualImageChain,
    recorded: Option<Recorded>,
    semaphores: Vec<Semaphore>,
    pass_through_only: bool,
}

/// What the driver is asked for instead of what the application asked for.
/// The layer renders and copies into the presentable images itself.
pub fn driver_desc(app_desc: &SwapchainDesc, caps: &DeviceCaps) -> SwapchainDesc {
    SwapchainDesc {
        usage: app_desc.usage
            | ImageUsage::TRANSFER_DST
            | ImageUsage::COLOR_ATTACHMENT
            | ImageUsage::SAMPLED,
        mutable_format: caps.mutable_format,
        ..app_desc.clone()
    }
}

impl LogicalSwapchain {
    /// Create the driver swapchain and everything the layer needs around it.
    /// On failure nothing is left behind.
    pub fn create(
        device: &mut dyn Device,
        app_desc: &SwapchainDesc,
        caps: &DeviceCaps,
        sizing: ChainSizing,
        registry: &EffectRegistry,
    ) -> DeviceResult<Self> {
        let desc = driver_desc(app_desc, caps);
        let handle = device.create_swapchain(&desc)?;

        let presentable = match device.swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(handle);
                return Err(e);
            }
        };

        let chain_desc = ChainDesc {
            extent: desc.extent,
            format: desc.format,
            slot_count: sizing.slot_count,
            aliasing: caps.mutable_format,
        };
        let chain = match VirtualImageChain::allocate(device, &presentable, chain_desc) {
            Ok(chain) => chain,
            Err(e) => {
                device.destroy_swapchain(handle);
                return Err(e);
            }
        };

        let mut swapchain = LogicalSwapchain {
            handle,
            desc,
            chain,
            recorded: None,
            semaphores: Vec::new(),
            pass_through_only: sizing.pass_through_only,
        };

        let result = swapchain
            .create_semaphores(device)
            .and_then(|()| swapchain.rebuild(device, registry, sizing.pass_through_only));
        if let Err(e) = result {
            swapchain.destroy(device);
            return Err(e);
        }

        util::log_info!(
            "Swapchain {:?}: {} images, {} slots, {} virtual images{}",
            handle,
            presentable.len(),
            sizing.slot_count,
            swapchain.chain.total_images(),
            if sizing.pass_through_only { " (pass-through while resizing)" } else { "" }
        );
        Ok(swapchain)
    }

    fn create_semaphores(&mut self, device: &mut dyn Device) -> DeviceResult<()> {
        for _ in 0..self.chain.present_image_count() {
            self.semaphores.push(device.create_semaphore()?);
        }
        Ok(())
    }

    /// Build the stages and command buffers again from the registry's active
    /// effects. The new set replaces the old one only once it is recorded,
    /// so on error the swapchain keeps presenting what it had. The caller
    /// makes sure the GPU isn't using the old set anymore.
    pub fn rebuild(
        &mut self,
        device: &mut dyn Device,
        registry: &EffectRegistry,
        pass_through_only: bool,
    ) -> DeviceResult<()> {
        let active = if pass_through_only {
            Vec::new()
        } else {
            registry.get_active_effects()
        };
        let pipeline = pipeline_builder::build(device, registry, &active, &self.chain);
        let commands =
            match CommandSets::record(device, &pipeline, self.chain.present_image_count()) {
                Ok(commands) => commands,
                Err(e) => {
                    pipeline.destroy(device);
                    return Err(e);
                }
            };

        if let Some(old) = self.recorded.replace(Recorded { pipeline, commands }) {
            old.commands.free(device);
            old.pipeline.destroy(device);
        }
        self.pass_through_only = pass_through_only;
        Ok(())
    }

    pub fn handle(&self) -> SwapchainHandle {
        self.handle
    }

    pub fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }

    pub fn image_count(&self) -> usize {
        self.chain.present_image_count()
    }

    /// What the application gets back when it asks for the swapchain's
    /// images.
    pub fn app_images(&self) -> Vec<Image> {
        self.chain.app_images().to_vec()
    }

    pub fn pass_through_only(&self) -> bool {
        self.pass_through_only
    }

    pub fn command_buffer(&self, effects_active: bool, index: usize) -> Option<CommandBuffer> {
        self.recorded
            .as_ref()?
            .commands
            .select(effects_active, index)
    }

    /// Signalled when the layer's work for image `index` is done.
    pub fn semaphore(&self, index: usize) -> Option<Semaphore> {
        self.semaphores.get(index).copied()
    }

    pub fn pipeline(&self) -> Option<&BuiltPipeline> {
        self.recorded.as_ref().map(|r| &r.pipeline)
    }

    pub fn plan(&self) -> SwapchainPlan {
        SwapchainPlan {
            present_images: self.chain.present_image_count(),
            slot_count: self.chain.slot_count(),
            total_images: self.chain.total_images(),
            aliasing: self.chain.aliasing(),
            pass_through_only: self.pass_through_only,
            stages: self.pipeline().map(BuiltPipeline::plan).unwrap_or_default(),
        }
    }

    /// Release everything, including the driver swapchain.
    pub fn destroy(mut self, device: &mut dyn Device) {
        if let Some(recorded) = self.recorded.take() {
            recorded.commands.free(device);
            recorded.pipeline.destroy(device);
        }
        for semaphore in self.semaphores.drain(..) {
            device.destroy_semaphore(semaphore);
        }
        self.chain.release(device);
        device.destroy_swapchain(self.handle);
    }
}
