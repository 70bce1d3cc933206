//! The private images effects read from and write to.
//!
//! For a swapchain with `n` presentable images and `s` slots the chain holds
//! `s` groups of `n` images (one more group when the presentable images can't
//! be rendered to in both formats). Stage `i` reads slot `i` and writes slot
//! `i + 1`; slot 0 is what the application renders into. Every image lives in
//! one shared memory allocation.

use serde::{Deserialize, Serialize};

use crate::device::{
    Device, DeviceMemory, Extent, Format, Image, ImageDesc, ImageUsage, ImageView,
};
use crate::errors::DeviceResult;

/// One side of a stage: a slot of the chain or the presentable images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotRef {
    Slot(usize),
    Presentable,
}

/// One image per presentable image, with the views stages bind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet {
    pub images: Vec<Image>,
    /// Views in the linear (sRGB decoding) format.
    pub views: Vec<ImageView>,
    /// Views in the perceptual format. Empty when the device can't view an
    /// image in two formats, in which case [ImageSet::view] falls back to
    /// `views`.
    pub perceptual_views: Vec<ImageView>,
    pub format: Format,
}

impl ImageSet {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn view(&self, index: usize, perceptual: bool) -> ImageView {
        if perceptual && !self.perceptual_views.is_empty() {
            self.perceptual_views[index]
        } else {
            self.views[index]
        }
    }

    pub fn view_format(&self, perceptual: bool) -> Format {
        if self.perceptual_views.is_empty() {
            self.format
        } else if perceptual {
            self.format.perceptual()
        } else {
            self.format.linear()
        }
    }

    fn create_views(
        &mut self,
        device: &mut dyn Device,
        mutable_format: bool,
    ) -> DeviceResult<()> {
        for &image in &self.images {
            if mutable_format {
                self.views.push(device.create_image_view(image, self.format.linear())?);
                self.perceptual_views
                    .push(device.create_image_view(image, self.format.perceptual())?);
            } else {
                self.views.push(device.create_image_view(image, self.format)?);
            }
        }
        Ok(())
    }

    fn destroy_views(&mut self, device: &mut dyn Device) {
        for view in self.views.drain(..).chain(self.perceptual_views.drain(..)) {
            device.destroy_image_view(view);
        }
    }
}

/// How many images a chain allocates.
pub fn total_image_count(present_image_count: usize, slot_count: usize, aliasing: bool) -> usize {
    if aliasing {
        present_image_count * slot_count
    } else {
        present_image_count * (slot_count + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainDesc {
    pub extent: Extent,
    pub format: Format,
    pub slot_count: usize,
    /// The presentable images can be viewed in both formats, so the last
    /// stage renders straight into them.
    pub aliasing: bool,
}

#[derive(Debug)]
pub struct VirtualImageChain {
    desc: ChainDesc,
    slots: Vec<ImageSet>,
    presentable: ImageSet,
    memory: Option<DeviceMemory>,
}

const VIRTUAL_IMAGE_USAGE: ImageUsage = ImageUsage(
    ImageUsage::TRANSFER_SRC.0
        | ImageUsage::TRANSFER_DST.0
        | ImageUsage::SAMPLED.0
        | ImageUsage::COLOR_ATTACHMENT.0,
);

impl VirtualImageChain {
    /// Create every image of the chain and back them with one allocation.
    /// Anything created before a failing call is released again.
    pub fn allocate(
        device: &mut dyn Device,
        presentable_images: &[Image],
        desc: ChainDesc,
    ) -> DeviceResult<Self> {
        let mut chain = VirtualImageChain {
            desc,
            slots: Vec::new(),
            presentable: ImageSet {
                images: presentable_images.to_vec(),
                format: desc.format,
                ..Default::default()
            },
            memory: None,
        };

        match chain.allocate_inner(device) {
            Ok(()) => Ok(chain),
            Err(e) => {
                chain.release(device);
                Err(e)
            }
        }
    }

    fn allocate_inner(&mut self, device: &mut dyn Device) -> DeviceResult<()> {
        let count = self.presentable.len();
        let groups = self.allocated_slot_count();

        let image_desc = ImageDesc {
            extent: self.desc.extent,
            format: self.desc.format,
            usage: VIRTUAL_IMAGE_USAGE,
            mutable_format: self.desc.aliasing,
        };

        let mut offsets = Vec::with_capacity(count * groups);
        let mut size = 0u64;
        for _ in 0..groups {
            self.slots.push(ImageSet {
                format: self.desc.format,
                ..Default::default()
            });
            let slot = self.slots.len() - 1;
            for _ in 0..count {
                let image = device.create_image(&image_desc)?;
                self.slots[slot].images.push(image);

                let req = device.image_memory_requirements(image);
                let alignment = req.alignment.max(1);
                size = size.div_ceil(alignment) * alignment;
                offsets.push((image, size));
                size += req.size;
            }
        }

        if !offsets.is_empty() {
            let memory = device.allocate_memory(size)?;
            self.memory = Some(memory);
            for (image, offset) in offsets {
                device.bind_image_memory(image, memory, offset)?;
            }
        }

        for set in &mut self.slots {
            set.create_views(device, self.desc.aliasing)?;
        }
        // Only the last stage of an aliasing chain renders into these.
        if self.desc.aliasing {
            self.presentable.create_views(device, true)?;
        }

        util::log_debug!(
            "Allocated {} virtual images ({} slots x {} images, {} bytes)",
            count * groups,
            groups,
            count,
            size
        );
        Ok(())
    }

    /// Destroy every view and image this chain created and free its memory.
    /// The presentable images belong to the driver and are left alone.
    pub fn release(&mut self, device: &mut dyn Device) {
        for set in &mut self.slots {
            set.destroy_views(device);
            for image in set.images.drain(..) {
                device.destroy_image(image);
            }
        }
        self.slots.clear();
        self.presentable.destroy_views(device);
        if let Some(memory) = self.memory.take() {
            device.free_memory(memory);
        }
    }

    pub fn desc(&self) -> &ChainDesc {
        &self.desc
    }

    pub fn present_image_count(&self) -> usize {
        self.presentable.len()
    }

    /// How many stages the chain has room for.
    pub fn slot_count(&self) -> usize {
        self.desc.slot_count
    }

    /// Slot groups actually allocated, including the extra final one of a
    /// non-aliasing chain.
    pub fn allocated_slot_count(&self) -> usize {
        if self.desc.aliasing {
            self.desc.slot_count
        } else {
            self.desc.slot_count + 1
        }
    }

    pub fn aliasing(&self) -> bool {
        self.desc.aliasing
    }

    pub fn total_images(&self) -> usize {
        total_image_count(self.present_image_count(), self.slot_count(), self.aliasing())
    }

    /// Where stage `index` reads from. Slot `slot_count` of an aliasing chain
    /// is the presentable images.
    pub fn slot_ref(&self, index: usize) -> SlotRef {
        if index < self.slots.len() {
            SlotRef::Slot(index)
        } else {
            SlotRef::Presentable
        }
    }

    /// Where the last effect writes: the presentable images, or the extra slot
    /// that gets copied into them.
    pub fn final_slot(&self) -> SlotRef {
        self.slot_ref(self.slot_count())
    }

    pub fn images(&self, slot: SlotRef) -> &ImageSet {
        match slot {
            SlotRef::Slot(i) => self.slots.get(i).unwrap_or(&self.presentable),
            SlotRef::Presentable => &self.presentable,
        }
    }

    /// What the application renders into.
    pub fn app_images(&self) -> &[Image] {
        &self.images(self.slot_ref(0)).images
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DeviceCall, HeadlessDevice};

    fn desc(slot_count: usize, aliasing: bool) -> ChainDesc {
        ChainDesc {
            extent: Extent::new(640, 480),
            format: Format::Bgra8Unorm,
            slot_count,
            aliasing,
        }
    }

    fn presentable(n: u64) -> Vec<Image> {
        (1000..1000 + n).map(Image).collect()
    }

    #[test]
    fn image_counts_follow_aliasing_support() {
        for slots in 0..6 {
            for n in 1..5 {
                assert_eq!(total_image_count(n, slots, true), n * slots);
                assert_eq!(total_image_count(n, slots, false), n * (slots + 1));
            }
        }
    }

    #[test]
    fn slices_are_disjoint_and_sized() {
        let mut device = HeadlessDevice::new();
        let chain =
            VirtualImageChain::allocate(&mut device, &presentable(3), desc(10, true)).unwrap();

        assert_eq!(chain.total_images(), 30);
        assert_eq!(chain.allocated_slot_count(), 10);

        let mut seen = std::collections::HashSet::new();
        for i in 0..10 {
            let set = chain.images(SlotRef::Slot(i));
            assert_eq!(set.len(), 3);
            for image in &set.images {
                assert!(seen.insert(*image), "image {image:?} is in two slots");
            }
        }
        assert_eq!(seen.len(), 30);
    }

    #[test]
    fn one_allocation_backs_every_image() {
        let mut device = HeadlessDevice::new();
        let probe = device.probe();
        let _chain =
            VirtualImageChain::allocate(&mut device, &presentable(2), desc(2, false)).unwrap();

        let calls = probe.calls();
        let allocs = calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::AllocateMemory { .. }))
            .count();
        let binds = calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::BindImageMemory { .. }))
            .count();
        assert_eq!(allocs, 1);
        assert_eq!(binds, 6);
    }

    #[test]
    fn aliasing_chain_ends_at_the_presentable_images() {
        let mut device = HeadlessDevice::new();
        let chain =
            VirtualImageChain::allocate(&mut device, &presentable(2), desc(3, true)).unwrap();

        assert_eq!(chain.final_slot(), SlotRef::Presentable);
        let present = chain.images(SlotRef::Presentable);
        assert_eq!(present.views.len(), 2);
        assert_eq!(present.perceptual_views.len(), 2);
        assert_eq!(present.view_format(true), Format::Bgra8Unorm);
        assert_eq!(present.view_format(false), Format::Bgra8Srgb);
    }

    #[test]
    fn non_aliasing_chain_has_an_extra_slot() {
        let mut device = HeadlessDevice::new();
        let chain =
            VirtualImageChain::allocate(&mut device, &presentable(2), desc(3, false)).unwrap();

        assert_eq!(chain.total_images(), 8);
        assert_eq!(chain.final_slot(), SlotRef::Slot(3));
        assert!(chain.images(SlotRef::Presentable).views.is_empty());
        assert!(chain.images(SlotRef::Slot(1)).perceptual_views.is_empty());
    }

    #[test]
    fn zero_slots_with_aliasing_hands_out_the_presentable_images() {
        let mut device = HeadlessDevice::new();
        let images = presentable(3);
        let chain = VirtualImageChain::allocate(&mut device, &images, desc(0, true)).unwrap();

        assert_eq!(chain.total_images(), 0);
        assert_eq!(chain.slot_ref(0), SlotRef::Presentable);
        assert_eq!(chain.app_images(), images.as_slice());
    }

    #[test]
    fn release_destroys_everything_it_created() {
        let mut device = HeadlessDevice::new();
        let probe = device.probe();
        let mut chain =
            VirtualImageChain::allocate(&mut device, &presentable(2), desc(2, true)).unwrap();
        chain.release(&mut device);

        assert_eq!(probe.live_images(), 0);
        assert_eq!(probe.live_views(), 0);
        assert_eq!(probe.live_memory(), 0);
    }

    #[test]
    fn failed_allocation_cleans_up() {
        let mut device = HeadlessDevice::new();
        let probe = device.probe();
        probe.fail_call("allocate_memory");

        let err = VirtualImageChain::allocate(&mut device, &presentable(2), desc(2, true))
            .unwrap_err();
        assert_eq!(err.call, "allocate_memory");
        assert_eq!(probe.live_images(), 0);
    }
}
