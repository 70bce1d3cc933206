//! The seam to the interactive overlay.
//!
//! The overlay runs on its own thread. It edits the [EffectRegistry] directly
//! and asks for everything else through [OverlayCommand]s, which the layer
//! picks up on the next present. It may also draw on top of each frame
//! through an [OverlayHook].

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::device::{Device, Queue, Semaphore, SwapchainHandle};
use crate::effect_registry::EffectRegistry;
use crate::errors::DeviceResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayCommand {
    /// Rebuild every swapchain from the registry as it is now.
    Apply,
    /// Load another config file and rebuild from it.
    SwitchConfig(PathBuf),
    /// Write the registry's state back to the config file.
    Save,
}

/// Draws the overlay into a presentable image.
pub trait OverlayHook: Send {
    /// Submit the overlay's work for `image_index` after `wait` is signalled.
    /// Returns the semaphore the present should wait on instead, or `None`
    /// if nothing was submitted.
    fn render(
        &mut self,
        device: &mut dyn Device,
        queue: Queue,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: Semaphore,
    ) -> DeviceResult<Option<Semaphore>>;

    /// Called before the layer destroys a swapchain.
    fn swapchain_destroyed(&mut self, _device: &mut dyn Device, _swapchain: SwapchainHandle) {}
}

/// What the overlay thread holds on to.
#[derive(Clone)]
pub struct OverlayHandle {
    registry: Arc<EffectRegistry>,
    commands: Sender<OverlayCommand>,
}

impl OverlayHandle {
    pub(crate) fn new(registry: Arc<EffectRegistry>, commands: Sender<OverlayCommand>) -> Self {
        Self { registry, commands }
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    pub fn apply(&self) {
        self.send(OverlayCommand::Apply);
    }

    pub fn switch_config(&self, path: impl Into<PathBuf>) {
        self.send(OverlayCommand::SwitchConfig(path.into()));
    }

    pub fn save(&self) {
        self.send(OverlayCommand::Save);
    }

    fn send(&self, command: OverlayCommand) {
        // The layer is gone, nobody is left to act on it.
        _ = self.commands.send(command);
    }
}
