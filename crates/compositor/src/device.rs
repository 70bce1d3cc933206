//! The seam between the compositor and the graphics driver.
//!
//! Everything the compositor does on the GPU goes through a [Device]. The
//! handles it deals in are opaque integers minted by the driver; the compositor
//! never looks inside them, it only hands them back.
//!
//! Calls that create something return a [DeviceResult]. Destruction and
//! command recording can't fail at this level.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::DeviceResult;
use crate::shader_compiler::CompiledModule;

macro_rules! handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            pub struct $name(pub u64);
        )*
    };
}

handles! {
    /// An image, either one the driver made for a swapchain or one of ours.
    Image,
    ImageView,
    DeviceMemory,
    CommandBuffer,
    Semaphore,
    /// A compiled graphics pipeline that draws one effect.
    GpuPipeline,
    DescriptorSet,
    SwapchainHandle,
    Queue,
}

/// Pixel formats the compositor knows how to pair up. Formats with an sRGB
/// twin can be viewed either way when the device allows mutable formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Format {
    Rgba8Unorm,
    Rgba8Srgb,
    #[default]
    Bgra8Unorm,
    Bgra8Srgb,
    A2b10g10r10Unorm,
    Rgba16Float,
}

impl Format {
    pub fn is_srgb(self) -> bool {
        matches!(self, Format::Rgba8Srgb | Format::Bgra8Srgb)
    }

    /// The format whose views decode to linear values when sampled.
    pub fn linear(self) -> Format {
        match self {
            Format::Rgba8Unorm => Format::Rgba8Srgb,
            Format::Bgra8Unorm => Format::Bgra8Srgb,
            other => other,
        }
    }

    /// The format whose views return the stored (gamma encoded) values as-is.
    pub fn perceptual(self) -> Format {
        match self {
            Format::Rgba8Srgb => Format::Rgba8Unorm,
            Format::Bgra8Srgb => Format::Bgra8Unorm,
            other => other,
        }
    }

    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Format::Rgba16Float => 8,
            _ => 4,
        }
    }

    pub fn parse(s: &str) -> Option<Format> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgba8unorm" | "rgba8" => Some(Format::Rgba8Unorm),
            "rgba8srgb" => Some(Format::Rgba8Srgb),
            "bgra8unorm" | "bgra8" => Some(Format::Bgra8Unorm),
            "bgra8srgb" => Some(Format::Bgra8Srgb),
            "a2b10g10r10unorm" | "rgb10a2" => Some(Format::A2b10g10r10Unorm),
            "rgba16float" | "rgba16f" => Some(Format::Rgba16Float),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// How an image may be used, as a set of bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageUsage(pub u32);

impl ImageUsage {
    pub const TRANSFER_SRC: ImageUsage = ImageUsage(1 << 0);
    pub const TRANSFER_DST: ImageUsage = ImageUsage(1 << 1);
    pub const SAMPLED: ImageUsage = ImageUsage(1 << 2);
    pub const STORAGE: ImageUsage = ImageUsage(1 << 3);
    pub const COLOR_ATTACHMENT: ImageUsage = ImageUsage(1 << 4);

    pub fn contains(self, other: ImageUsage) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ImageUsage {
    type Output = ImageUsage;

    fn bitor(self, rhs: Self) -> Self::Output {
        ImageUsage(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: Extent,
    pub format: Format,
    pub usage: ImageUsage,
    /// Views of this image may use the sRGB twin of `format`.
    pub mutable_format: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
}

/// What the application asked for when creating a swapchain. The layer hands a
/// modified copy of this to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapchainDesc {
    pub extent: Extent,
    pub format: Format,
    pub min_image_count: u32,
    pub usage: ImageUsage,
    pub mutable_format: bool,
    /// Set when this swapchain replaces an older one, which is what a window
    /// resize looks like from down here.
    pub old_swapchain: Option<SwapchainHandle>,
}

/// The code an effect pipeline runs.
#[derive(Debug, Clone)]
pub enum ShaderSource {
    /// One of the shaders shipped with the layer, by name.
    BuiltIn(&'static str),
    /// Output of the shader compiler.
    Module(Arc<CompiledModule>),
}

#[derive(Debug, Clone)]
pub struct EffectPipelineDesc<'a> {
    /// Debug label, e.g. `pipeline/cas`.
    pub label: &'a str,
    pub shader: ShaderSource,
    pub target_format: Format,
    /// How many bytes of push constants the draw will supply.
    pub push_constant_size: u32,
    /// How many images the descriptor sets of this pipeline bind.
    pub input_count: u32,
}

/// One full-screen draw of an effect into `target`.
#[derive(Debug, Clone, Copy)]
pub struct DrawEffect<'a> {
    pub pipeline: GpuPipeline,
    pub descriptor_set: DescriptorSet,
    pub target: ImageView,
    pub extent: Extent,
    pub push_constants: &'a [u8],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub wait: &'a [Semaphore],
    pub command_buffers: &'a [CommandBuffer],
    pub signal: &'a [Semaphore],
}

#[derive(Debug, Clone, Copy)]
pub struct PresentInfo<'a> {
    pub wait: &'a [Semaphore],
    pub swapchains: &'a [(SwapchainHandle, u32)],
}

/// A 3D lookup table living on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LutTexture {
    pub image: Image,
    pub memory: DeviceMemory,
    pub view: ImageView,
}

/// The driver entry points the compositor calls.
pub trait Device: Send {
    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> DeviceResult<SwapchainHandle>;
    fn swapchain_images(&mut self, swapchain: SwapchainHandle) -> DeviceResult<Vec<Image>>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle);

    fn create_image(&mut self, desc: &ImageDesc) -> DeviceResult<Image>;
    fn image_memory_requirements(&self, image: Image) -> MemoryRequirements;
    fn allocate_memory(&mut self, size: u64) -> DeviceResult<DeviceMemory>;
    fn bind_image_memory(&mut self, image: Image, memory: DeviceMemory, offset: u64)
    -> DeviceResult<()>;
    fn create_image_view(&mut self, image: Image, format: Format) -> DeviceResult<ImageView>;
    fn destroy_image_view(&mut self, view: ImageView);
    fn destroy_image(&mut self, image: Image);
    fn free_memory(&mut self, memory: DeviceMemory);

    /// Upload a `size`³ RGBA lookup table.
    fn create_lut(&mut self, size: u32, rgba: &[f32]) -> DeviceResult<LutTexture>;
    fn destroy_lut(&mut self, lut: LutTexture);

    fn create_effect_pipeline(&mut self, desc: &EffectPipelineDesc<'_>)
    -> DeviceResult<GpuPipeline>;
    fn destroy_effect_pipeline(&mut self, pipeline: GpuPipeline);
    fn create_descriptor_set(
        &mut self,
        pipeline: GpuPipeline,
        inputs: &[ImageView],
    ) -> DeviceResult<DescriptorSet>;
    fn destroy_descriptor_set(&mut self, set: DescriptorSet);

    fn allocate_command_buffers(&mut self, count: u32) -> DeviceResult<Vec<CommandBuffer>>;
    fn free_command_buffers(&mut self, buffers: &[CommandBuffer]);
    fn begin_command_buffer(&mut self, buffer: CommandBuffer) -> DeviceResult<()>;
    fn end_command_buffer(&mut self, buffer: CommandBuffer) -> DeviceResult<()>;
    fn cmd_copy_image(&mut self, buffer: CommandBuffer, src: Image, dst: Image, extent: Extent);
    fn cmd_draw_effect(&mut self, buffer: CommandBuffer, draw: &DrawEffect<'_>);

    fn create_semaphore(&mut self) -> DeviceResult<Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: Semaphore);

    fn queue_submit(&mut self, queue: Queue, submit: &SubmitInfo<'_>) -> DeviceResult<()>;
    fn queue_present(&mut self, queue: Queue, present: &PresentInfo<'_>) -> DeviceResult<()>;
    fn queue_wait_idle(&mut self, queue: Queue) -> DeviceResult<()>;
}

/// What the layer learned about a device when it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    /// Swapchain images can be created with a mutable format, so the last
    /// effect may render straight into them.
    pub mutable_format: bool,
    /// The queue the application presents on.
    pub present_queue: Queue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_pairs_map_both_ways() {
        assert_eq!(Format::Bgra8Unorm.linear(), Format::Bgra8Srgb);
        assert_eq!(Format::Bgra8Srgb.perceptual(), Format::Bgra8Unorm);
        assert_eq!(Format::Rgba8Srgb.linear(), Format::Rgba8Srgb);
        assert!(Format::Rgba8Srgb.is_srgb());
        assert!(!Format::Rgba8Srgb.perceptual().is_srgb());
    }

    #[test]
    fn formats_without_a_twin_map_to_themselves() {
        for format in [Format::A2b10g10r10Unorm, Format::Rgba16Float] {
            assert_eq!(format.linear(), format);
            assert_eq!(format.perceptual(), format);
        }
    }

    #[test]
    fn usage_bits_combine() {
        let usage = ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST;
        assert!(usage.contains(ImageUsage::SAMPLED));
        assert!(usage.contains(ImageUsage::TRANSFER_DST));
        assert!(!usage.contains(ImageUsage::STORAGE));
    }

    #[test]
    fn format_names_parse() {
        assert_eq!(Format::parse("BGRA8SRGB"), Some(Format::Bgra8Srgb));
        assert_eq!(Format::parse("rgba16f"), Some(Format::Rgba16Float));
        assert_eq!(Format::parse("yuv"), None);
    }
}
