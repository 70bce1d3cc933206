//! A [Device] that doesn't talk to a GPU.
//!
//! Handles are handed out sequentially and every call is recorded, so tests
//! and the `fxctl` planner can inspect exactly what the compositor asked the
//! driver to do. A [HeadlessProbe] shares that record and can make individual
//! calls fail.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::{
    CommandBuffer, DescriptorSet, Device, DeviceMemory, DrawEffect, EffectPipelineDesc,
    Extent, Format, GpuPipeline, Image, ImageDesc, ImageView, LutTexture, MemoryRequirements,
    PresentInfo, Queue, Semaphore, SubmitInfo, SwapchainDesc, SwapchainHandle,
};
use crate::errors::{DeviceError, DeviceResult};

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateSwapchain {
        swapchain: SwapchainHandle,
        desc: SwapchainDesc,
    },
    DestroySwapchain(SwapchainHandle),
    CreateImage {
        image: Image,
        format: Format,
        mutable_format: bool,
    },
    AllocateMemory {
        memory: DeviceMemory,
        size: u64,
    },
    BindImageMemory {
        image: Image,
        memory: DeviceMemory,
        offset: u64,
    },
    CreateImageView {
        view: ImageView,
        image: Image,
        format: Format,
    },
    DestroyImageView(ImageView),
    DestroyImage(Image),
    FreeMemory(DeviceMemory),
    CreateLut {
        lut: LutTexture,
        size: u32,
    },
    DestroyLut(LutTexture),
    CreatePipeline {
        pipeline: GpuPipeline,
        label: String,
        target_format: Format,
        push_constant_size: u32,
    },
    DestroyPipeline(GpuPipeline),
    CreateDescriptorSet {
        set: DescriptorSet,
        pipeline: GpuPipeline,
        inputs: Vec<ImageView>,
    },
    DestroyDescriptorSet(DescriptorSet),
    AllocateCommandBuffers(Vec<CommandBuffer>),
    FreeCommandBuffers(Vec<CommandBuffer>),
    BeginCommandBuffer(CommandBuffer),
    EndCommandBuffer(CommandBuffer),
    CopyImage {
        buffer: CommandBuffer,
        src: Image,
        dst: Image,
    },
    DrawEffect {
        buffer: CommandBuffer,
        pipeline: GpuPipeline,
        descriptor_set: DescriptorSet,
        target: ImageView,
        push_constants: Vec<u8>,
    },
    CreateSemaphore(Semaphore),
    DestroySemaphore(Semaphore),
    Submit {
        queue: Queue,
        wait: Vec<Semaphore>,
        command_buffers: Vec<CommandBuffer>,
        signal: Vec<Semaphore>,
    },
    Present {
        queue: Queue,
        wait: Vec<Semaphore>,
        swapchains: Vec<(SwapchainHandle, u32)>,
    },
    WaitIdle(Queue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Image,
    View,
    Memory,
    Pipeline,
    DescriptorSet,
    CommandBuffer,
    Semaphore,
    Lut,
}

#[derive(Debug, Default)]
struct Shared {
    calls: Vec<DeviceCall>,
    failing_calls: HashSet<String>,
    failing_pipelines: HashSet<String>,
    live: HashMap<Kind, HashSet<u64>>,
}

impl Shared {
    fn check(&self, call: &'static str) -> DeviceResult<()> {
        if self.failing_calls.contains(call) {
            Err(DeviceError::new(call, DeviceError::INITIALIZATION_FAILED))
        } else {
            Ok(())
        }
    }

    fn created(&mut self, kind: Kind, handle: u64) {
        self.live.entry(kind).or_default().insert(handle);
    }

    fn destroyed(&mut self, kind: Kind, handle: u64) {
        if let Some(set) = self.live.get_mut(&kind) {
            set.remove(&handle);
        }
    }

    fn live(&self, kind: Kind) -> usize {
        self.live.get(&kind).map_or(0, HashSet::len)
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_handle: u64,
    swapchains: HashMap<SwapchainHandle, Vec<Image>>,
    images: HashMap<Image, ImageDesc>,
    shared: Arc<Mutex<Shared>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto this device's call record.
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn record(&self, call: DeviceCall) {
        lock(&self.shared).calls.push(call);
    }

    fn check(&self, call: &'static str) -> DeviceResult<()> {
        lock(&self.shared).check(call)
    }

    fn created(&self, kind: Kind, handle: u64) {
        lock(&self.shared).created(kind, handle);
    }

    fn destroyed(&self, kind: Kind, handle: u64) {
        lock(&self.shared).destroyed(kind, handle);
    }
}

impl Device for HeadlessDevice {
    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> DeviceResult<SwapchainHandle> {
        self.check("create_swapchain")?;
        let swapchain = SwapchainHandle(self.next());
        let images: Vec<Image> = (0..desc.min_image_count.max(1))
            .map(|_| Image(self.next()))
            .collect();
        self.swapchains.insert(swapchain, images);
        self.record(DeviceCall::CreateSwapchain {
            swapchain,
            desc: desc.clone(),
        });
        Ok(swapchain)
    }

    fn swapchain_images(&mut self, swapchain: SwapchainHandle) -> DeviceResult<Vec<Image>> {
        self.check("swapchain_images")?;
        self.swapchains
            .get(&swapchain)
            .cloned()
            .ok_or(DeviceError::new("swapchain_images", DeviceError::DEVICE_LOST))
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        self.swapchains.remove(&swapchain);
        self.record(DeviceCall::DestroySwapchain(swapchain));
    }

    fn create_image(&mut self, desc: &ImageDesc) -> DeviceResult<Image> {
        self.check("create_image")?;
        let image = Image(self.next());
        self.images.insert(image, desc.clone());
        self.created(Kind::Image, image.0);
        self.record(DeviceCall::CreateImage {
            image,
            format: desc.format,
            mutable_format: desc.mutable_format,
        });
        Ok(image)
    }

    fn image_memory_requirements(&self, image: Image) -> MemoryRequirements {
        let size = self.images.get(&image).map_or(0, |desc| {
            let Extent { width, height } = desc.extent;
            u64::from(width) * u64::from(height) * desc.format.bytes_per_pixel()
        });
        MemoryRequirements {
            size,
            alignment: 256,
        }
    }

    fn allocate_memory(&mut self, size: u64) -> DeviceResult<DeviceMemory> {
        self.check("allocate_memory")?;
        let memory = DeviceMemory(self.next());
        self.created(Kind::Memory, memory.0);
        self.record(DeviceCall::AllocateMemory { memory, size });
        Ok(memory)
    }

    fn bind_image_memory(
        &mut self,
        image: Image,
        memory: DeviceMemory,
        offset: u64,
    ) -> DeviceResult<()> {
        self.check("bind_image_memory")?;
        self.record(DeviceCall::BindImageMemory {
            image,
            memory,
            offset,
        });
        Ok(())
    }

    fn create_image_view(&mut self, image: Image, format: Format) -> DeviceResult<ImageView> {
        self.check("create_image_view")?;
        let view = ImageView(self.next());
        self.created(Kind::View, view.0);
        self.record(DeviceCall::CreateImageView {
            view,
            image,
            format,
        });
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: ImageView) {
        self.destroyed(Kind::View, view.0);
        self.record(DeviceCall::DestroyImageView(view));
    }

    fn destroy_image(&mut self, image: Image) {
        self.images.remove(&image);
        self.destroyed(Kind::Image, image.0);
        self.record(DeviceCall::DestroyImage(image));
    }

    fn free_memory(&mut self, memory: DeviceMemory) {
        self.destroyed(Kind::Memory, memory.0);
        self.record(DeviceCall::FreeMemory(memory));
    }

    fn create_lut(&mut self, size: u32, rgba: &[f32]) -> DeviceResult<LutTexture> {
        self.check("create_lut")?;
        let expected = (size as usize).pow(3) * 4;
        if rgba.len() != expected {
            return Err(DeviceError::new("create_lut", DeviceError::INITIALIZATION_FAILED));
        }
        let lut = LutTexture {
            image: Image(self.next()),
            memory: DeviceMemory(self.next()),
            view: ImageView(self.next()),
        };
        self.created(Kind::Lut, lut.image.0);
        self.record(DeviceCall::CreateLut { lut, size });
        Ok(lut)
    }

    fn destroy_lut(&mut self, lut: LutTexture) {
        self.destroyed(Kind::Lut, lut.image.0);
        self.record(DeviceCall::DestroyLut(lut));
    }

    fn create_effect_pipeline(
        &mut self,
        desc: &EffectPipelineDesc<'_>,
    ) -> DeviceResult<GpuPipeline> {
        self.check("create_effect_pipeline")?;
        if lock(&self.shared).failing_pipelines.contains(desc.label) {
            return Err(DeviceError::new(
                "create_effect_pipeline",
                DeviceError::INITIALIZATION_FAILED,
            ));
        }
        let pipeline = GpuPipeline(self.next());
        self.created(Kind::Pipeline, pipeline.0);
        self.record(DeviceCall::CreatePipeline {
            pipeline,
            label: desc.label.to_owned(),
            target_format: desc.target_format,
            push_constant_size: desc.push_constant_size,
        });
        Ok(pipeline)
    }

    fn destroy_effect_pipeline(&mut self, pipeline: GpuPipeline) {
        self.destroyed(Kind::Pipeline, pipeline.0);
        self.record(DeviceCall::DestroyPipeline(pipeline));
    }

    fn create_descriptor_set(
        &mut self,
        pipeline: GpuPipeline,
        inputs: &[ImageView],
    ) -> DeviceResult<DescriptorSet> {
        self.check("create_descriptor_set")?;
        let set = DescriptorSet(self.next());
        self.created(Kind::DescriptorSet, set.0);
        self.record(DeviceCall::CreateDescriptorSet {
            set,
            pipeline,
            inputs: inputs.to_vec(),
        });
        Ok(set)
    }

    fn destroy_descriptor_set(&mut self, set: DescriptorSet) {
        self.destroyed(Kind::DescriptorSet, set.0);
        self.record(DeviceCall::DestroyDescriptorSet(set));
    }

    fn allocate_command_buffers(&mut self, count: u32) -> DeviceResult<Vec<CommandBuffer>> {
        self.check("allocate_command_buffers")?;
        let buffers: Vec<_> = (0..count).map(|_| CommandBuffer(self.next())).collect();
        for buffer in &buffers {
            self.created(Kind::CommandBuffer, buffer.0);
        }
        self.record(DeviceCall::AllocateCommandBuffers(buffers.clone()));
        Ok(buffers)
    }

    fn free_command_buffers(&mut self, buffers: &[CommandBuffer]) {
        for buffer in buffers {
            self.destroyed(Kind::CommandBuffer, buffer.0);
        }
        self.record(DeviceCall::FreeCommandBuffers(buffers.to_vec()));
    }

    fn begin_command_buffer(&mut self, buffer: CommandBuffer) -> DeviceResult<()> {
        self.check("begin_command_buffer")?;
        self.record(DeviceCall::BeginCommandBuffer(buffer));
        Ok(())
    }

    fn end_command_buffer(&mut self, buffer: CommandBuffer) -> DeviceResult<()> {
        self.check("end_command_buffer")?;
        self.record(DeviceCall::EndCommandBuffer(buffer));
        Ok(())
    }

    fn cmd_copy_image(&mut self, buffer: CommandBuffer, src: Image, dst: Image, _: Extent) {
        self.record(DeviceCall::CopyImage { buffer, src, dst });
    }

    fn cmd_draw_effect(&mut self, buffer: CommandBuffer, draw: &DrawEffect<'_>) {
        self.record(DeviceCall::DrawEffect {
            buffer,
            pipeline: draw.pipeline,
            descriptor_set: draw.descriptor_set,
            target: draw.target,
            push_constants: draw.push_constants.to_vec(),
        });
    }

    fn create_semaphore(&mut self) -> DeviceResult<Semaphore> {
        self.check("create_semaphore")?;
        let semaphore = Semaphore(self.next());
        self.created(Kind::Semaphore, semaphore.0);
        self.record(DeviceCall::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: Semaphore) {
        self.destroyed(Kind::Semaphore, semaphore.0);
        self.record(DeviceCall::DestroySemaphore(semaphore));
    }

    fn queue_submit(&mut self, queue: Queue, submit: &SubmitInfo<'_>) -> DeviceResult<()> {
        self.check("queue_submit")?;
        self.record(DeviceCall::Submit {
            queue,
            wait: submit.wait.to_vec(),
            command_buffers: submit.command_buffers.to_vec(),
            signal: submit.signal.to_vec(),
        });
        Ok(())
    }

    fn queue_present(&mut self, queue: Queue, present: &PresentInfo<'_>) -> DeviceResult<()> {
        self.check("queue_present")?;
        self.record(DeviceCall::Present {
            queue,
            wait: present.wait.to_vec(),
            swapchains: present.swapchains.to_vec(),
        });
        Ok(())
    }

    fn queue_wait_idle(&mut self, queue: Queue) -> DeviceResult<()> {
        self.check("queue_wait_idle")?;
        self.record(DeviceCall::WaitIdle(queue));
        Ok(())
    }
}

/// Shared view of a [HeadlessDevice]'s record.
#[derive(Debug, Clone)]
pub struct HeadlessProbe {
    shared: Arc<Mutex<Shared>>,
}

impl HeadlessProbe {
    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.shared).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.shared).calls.clear();
    }

    /// Make every call to the [Device] method `call` fail from now on.
    pub fn fail_call(&self, call: &str) {
        lock(&self.shared).failing_calls.insert(call.to_owned());
    }

    /// Make pipeline creation fail for pipelines with this debug label.
    pub fn fail_pipeline(&self, label: &str) {
        lock(&self.shared).failing_pipelines.insert(label.to_owned());
    }

    pub fn clear_failures(&self) {
        let mut shared = lock(&self.shared);
        shared.failing_calls.clear();
        shared.failing_pipelines.clear();
    }

    /// Labels of every pipeline created so far, in order.
    pub fn pipeline_labels(&self) -> Vec<String> {
        lock(&self.shared)
            .calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::CreatePipeline { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        lock(&self.shared).calls.iter().filter(|c| pred(c)).count()
    }

    pub fn live_images(&self) -> usize {
        lock(&self.shared).live(Kind::Image)
    }

    pub fn live_views(&self) -> usize {
        lock(&self.shared).live(Kind::View)
    }

    pub fn live_memory(&self) -> usize {
        lock(&self.shared).live(Kind::Memory)
    }

    pub fn live_pipelines(&self) -> usize {
        lock(&self.shared).live(Kind::Pipeline)
    }

    pub fn live_descriptor_sets(&self) -> usize {
        lock(&self.shared).live(Kind::DescriptorSet)
    }

    pub fn live_command_buffers(&self) -> usize {
        lock(&self.shared).live(Kind::CommandBuffer)
    }

    pub fn live_semaphores(&self) -> usize {
        lock(&self.shared).live(Kind::Semaphore)
    }

    pub fn live_luts(&self) -> usize {
        lock(&self.shared).live(Kind::Lut)
    }
}
