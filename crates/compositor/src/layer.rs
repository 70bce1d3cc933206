//! The entry points the driver dispatch calls into.
//!
//! A [Layer] keeps a registry of devices, each with its swapchains, behind one
//! coarse lock that is held for the duration of every entry point. It has no
//! thread of its own: hot reloads, config switches and resize handling all
//! happen inside [Layer::queue_present].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::config::{Config, LayerSettings};
use crate::device::{
    Device, DeviceCaps, Image, PresentInfo, Queue, Semaphore, SubmitInfo, SwapchainDesc,
    SwapchainHandle,
};
use crate::effect_registry::EffectRegistry;
use crate::errors::LayerError;
use crate::hot_reload::{Clock, HotReload, ReloadCause, SystemClock};
use crate::input::KeyboardSource;
use crate::overlay::{OverlayCommand, OverlayHandle, OverlayHook};
use crate::shader_compiler::ShaderCompiler;
use crate::swapchain::{ChainSizing, LogicalSwapchain, SwapchainPlan};

/// Opaque id the dispatch layer uses for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DeviceId(pub u64);

/// Swapchains are known by the handle the driver gave them.
pub type SwapchainId = SwapchainHandle;

/// One present call of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentRequest {
    pub queue: Queue,
    /// Signalled when the application's rendering is done.
    pub wait_semaphores: Vec<Semaphore>,
    pub swapchains: Vec<(SwapchainId, u32)>,
}

struct LogicalDevice {
    device: Box<dyn Device>,
    caps: DeviceCaps,
    swapchains: HashMap<SwapchainId, LogicalSwapchain>,
    overlay: Option<Box<dyn OverlayHook>>,
}

struct LayerState {
    config: Config,
    settings: LayerSettings,
    devices: HashMap<DeviceId, LogicalDevice>,
    hot_reload: HotReload,
}

pub struct Layer {
    state: Mutex<LayerState>,
    registry: Arc<EffectRegistry>,
    keyboard: Arc<dyn KeyboardSource>,
    clock: Arc<dyn Clock>,
    commands_tx: Sender<OverlayCommand>,
    commands_rx: Receiver<OverlayCommand>,
}

impl Layer {
    /// Start up from the config file found by [crate::config::discover].
    pub fn new(
        compiler: Arc<dyn ShaderCompiler>,
        keyboard: Arc<dyn KeyboardSource>,
    ) -> Result<Self, LayerError> {
        let config = Config::load_discovered()?;
        Ok(Self::with_config(config, compiler, keyboard))
    }

    pub fn with_config(
        config: Config,
        compiler: Arc<dyn ShaderCompiler>,
        keyboard: Arc<dyn KeyboardSource>,
    ) -> Self {
        for issue in config.issues() {
            util::log_warning!("{issue}");
        }

        let settings = LayerSettings::from_config(&config);
        let registry = Arc::new(EffectRegistry::new(compiler));
        registry.initialize(&config);

        let hot_reload = HotReload::new(&settings, config.path().map(ToOwned::to_owned));
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();

        Self {
            state: Mutex::new(LayerState {
                config,
                settings,
                devices: HashMap::new(),
                hot_reload,
            }),
            registry,
            keyboard,
            clock: Arc::new(SystemClock),
            commands_tx,
            commands_rx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> MutexGuard<'_, LayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> Arc<EffectRegistry> {
        Arc::clone(&self.registry)
    }

    /// Everything the overlay thread needs.
    pub fn overlay_handle(&self) -> OverlayHandle {
        OverlayHandle::new(self.registry(), self.commands_tx.clone())
    }

    pub fn settings(&self) -> LayerSettings {
        self.lock().settings.clone()
    }

    pub fn config_path(&self) -> Option<PathBuf> {
        self.lock().config.path().map(ToOwned::to_owned)
    }

    pub fn effects_active(&self) -> bool {
        self.lock().hot_reload.effects_active()
    }

    pub fn register_device(&self, id: DeviceId, device: Box<dyn Device>, caps: DeviceCaps) {
        util::log_debug!("Registered device {id:?} ({caps:?})");
        let previous = self.lock().devices.insert(id, LogicalDevice {
            device,
            caps,
            swapchains: HashMap::new(),
            overlay: None,
        });
        if previous.is_some() {
            util::log_warning!("Device {id:?} was registered twice, dropping the old one");
        }
    }

    pub fn set_overlay(&self, id: DeviceId, overlay: Box<dyn OverlayHook>) -> Result<(), LayerError> {
        let mut state = self.lock();
        let device = state
            .devices
            .get_mut(&id)
            .ok_or(LayerError::UnknownDevice(id))?;
        device.overlay = Some(overlay);
        Ok(())
    }

    /// Forget a device, destroying whatever the layer still holds for it once
    /// its queue is idle.
    pub fn destroy_device(&self, id: DeviceId) -> Result<(), LayerError> {
        let mut dev = self
            .lock()
            .devices
            .remove(&id)
            .ok_or(LayerError::UnknownDevice(id))?;

        if let Err(e) = dev.device.queue_wait_idle(dev.caps.present_queue) {
            util::log_error!("Waiting for device {id:?} to go idle failed: {e}");
        }
        let LogicalDevice {
            device,
            swapchains,
            overlay,
            ..
        } = &mut dev;
        for (handle, swapchain) in swapchains.drain() {
            if let Some(hook) = overlay.as_mut() {
                hook.swapchain_destroyed(device.as_mut(), handle);
            }
            swapchain.destroy(device.as_mut());
        }
        Ok(())
    }

    /// Create a swapchain along with its virtual images and effect stages.
    /// A swapchain replacing an older one while effects are showing only gets
    /// a pass-through until resizing settles.
    pub fn create_swapchain(
        &self,
        id: DeviceId,
        desc: &SwapchainDesc,
    ) -> Result<SwapchainId, LayerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let LayerState {
            devices,
            hot_reload,
            settings,
            ..
        } = &mut *state;
        let dev = devices.get_mut(&id).ok_or(LayerError::UnknownDevice(id))?;

        let resizing = desc.old_swapchain.is_some()
            && hot_reload.effects_active()
            && !self.registry.get_enabled_effects().is_empty();
        let sizing = ChainSizing {
            pass_through_only: resizing,
            ..ChainSizing::for_selection(
                self.registry.get_selected_effects().len(),
                settings.max_effects,
            )
        };

        let swapchain = LogicalSwapchain::create(
            dev.device.as_mut(),
            desc,
            &dev.caps,
            sizing,
            &self.registry,
        )?;
        if resizing {
            hot_reload.note_resize(now);
        }

        let handle = swapchain.handle();
        dev.swapchains.insert(handle, swapchain);
        Ok(handle)
    }

    /// The images the application renders into.
    pub fn swapchain_images(
        &self,
        id: DeviceId,
        swapchain: SwapchainId,
    ) -> Result<Vec<Image>, LayerError> {
        let state = self.lock();
        let dev = state.devices.get(&id).ok_or(LayerError::UnknownDevice(id))?;
        let swapchain = dev
            .swapchains
            .get(&swapchain)
            .ok_or(LayerError::UnknownSwapchain(swapchain))?;
        Ok(swapchain.app_images())
    }

    pub fn destroy_swapchain(&self, id: DeviceId, swapchain: SwapchainId) -> Result<(), LayerError> {
        let mut state = self.lock();
        let dev = state
            .devices
            .get_mut(&id)
            .ok_or(LayerError::UnknownDevice(id))?;
        let logical = dev
            .swapchains
            .remove(&swapchain)
            .ok_or(LayerError::UnknownSwapchain(swapchain))?;

        if let Some(hook) = dev.overlay.as_mut() {
            hook.swapchain_destroyed(dev.device.as_mut(), swapchain);
        }
        logical.destroy(dev.device.as_mut());
        Ok(())
    }

    pub fn swapchain_plan(
        &self,
        id: DeviceId,
        swapchain: SwapchainId,
    ) -> Result<SwapchainPlan, LayerError> {
        let state = self.lock();
        let dev = state.devices.get(&id).ok_or(LayerError::UnknownDevice(id))?;
        dev.swapchains
            .get(&swapchain)
            .map(LogicalSwapchain::plan)
            .ok_or(LayerError::UnknownSwapchain(swapchain))
    }

    /// Check every trigger, rebuild what needs rebuilding, then submit the
    /// effect (or pass-through) work for each image and present.
    pub fn queue_present(&self, id: DeviceId, request: &PresentRequest) -> Result<(), LayerError> {
        let now = self.clock.now();
        let commands: Vec<_> = self.commands_rx.try_iter().collect();

        let mut state = self.lock();
        let triggers = state
            .hot_reload
            .poll(now, self.keyboard.as_ref(), commands);

        if triggers.toggled {
            util::log_info!(
                "Effects {}",
                if state.hot_reload.effects_active() { "on" } else { "off" }
            );
        }
        if triggers.save {
            self.save_config(&mut state);
        }
        if let Some(cause) = triggers.reload {
            self.reload(&mut state, cause)?;
        } else if triggers.resize_settled {
            util::log_debug!("Resizing settled, restoring effects");
            self.rebuild_all(&mut state, true)?;
        }

        let effects_active = state.hot_reload.effects_active();
        let dev = state
            .devices
            .get_mut(&id)
            .ok_or(LayerError::UnknownDevice(id))?;
        present_frame(dev, request, effects_active)
    }

    fn save_config(&self, state: &mut LayerState) {
        self.registry.persist_into(&mut state.config);
        match state.config.save() {
            Ok(()) => {
                state.hot_reload.rearm_watch();
                util::log_info!("Saved the effect settings to {:?}", state.config.path());
            }
            Err(e) => util::log_error!("Failed to save the effect settings: {e}"),
        }
    }

    fn reload(&self, state: &mut LayerState, cause: ReloadCause) -> Result<(), LayerError> {
        match &cause {
            ReloadCause::SwitchConfig(path) => {
                let config = match Config::load(path) {
                    Ok(config) => config,
                    Err(e) => {
                        util::log_error!("Not switching configs: {e}");
                        return Ok(());
                    }
                };
                state.settings = LayerSettings::from_config(&config);
                state
                    .hot_reload
                    .switch_config(&state.settings, Some(path.clone()));
                state.config = config;
                self.registry.initialize(&state.config);
            }
            ReloadCause::Hotkey | ReloadCause::ConfigChanged => {
                if let Some(path) = state.config.path().map(ToOwned::to_owned) {
                    match Config::load(&path) {
                        Ok(config) => state.config = config,
                        Err(e) => util::log_warning!("Keeping the previous config: {e}"),
                    }
                }
                state.settings = LayerSettings::from_config(&state.config);
                state.hot_reload.apply_settings(&state.settings);
                self.registry.initialize(&state.config);
            }
            ReloadCause::Apply => {}
        }

        util::log_info!("Reloading effects ({cause:?})");
        self.rebuild_all(state, false)
    }

    /// Rebuild the stages of every swapchain of every device, or only of those
    /// showing a resize pass-through. A swapchain that fails to rebuild keeps
    /// its previous stages; the rest are still rebuilt and the first error is
    /// returned.
    fn rebuild_all(&self, state: &mut LayerState, resized_only: bool) -> Result<(), LayerError> {
        let mut first_error = None;
        for dev in state.devices.values_mut() {
            let LogicalDevice {
                device,
                caps,
                swapchains,
                ..
            } = dev;
            if resized_only && !swapchains.values().any(LogicalSwapchain::pass_through_only) {
                continue;
            }
            if swapchains.is_empty() {
                continue;
            }

            if let Err(e) = device.queue_wait_idle(caps.present_queue) {
                util::log_error!("Not rebuilding the effects of a device: {e}");
                first_error.get_or_insert(e);
                continue;
            }
            for (handle, swapchain) in swapchains.iter_mut() {
                if resized_only && !swapchain.pass_through_only() {
                    continue;
                }
                if let Err(e) = swapchain.rebuild(device.as_mut(), &self.registry, false) {
                    util::log_error!("Keeping the previous effects of swapchain {handle:?}: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Submit each swapchain's work and present. The application's semaphores
/// are waited on by the first submission only.
fn present_frame(
    dev: &mut LogicalDevice,
    request: &PresentRequest,
    effects_active: bool,
) -> Result<(), LayerError> {
    let LogicalDevice {
        device,
        swapchains,
        overlay,
        ..
    } = dev;

    let mut present_wait = Vec::with_capacity(request.swapchains.len());
    for (i, &(handle, index)) in request.swapchains.iter().enumerate() {
        let swapchain = swapchains
            .get(&handle)
            .ok_or(LayerError::UnknownSwapchain(handle))?;
        let slot = index as usize;
        let (Some(buffer), Some(signal)) = (
            swapchain.command_buffer(effects_active, slot),
            swapchain.semaphore(slot),
        ) else {
            return Err(LayerError::ImageIndexOutOfRange {
                index,
                count: swapchain.image_count(),
            });
        };

        let wait: &[Semaphore] = if i == 0 { &request.wait_semaphores } else { &[] };
        device.queue_submit(request.queue, &SubmitInfo {
            wait,
            command_buffers: &[buffer],
            signal: &[signal],
        })?;

        let mut last = signal;
        if let Some(hook) = overlay.as_mut() {
            if let Some(drawn) = hook.render(device.as_mut(), request.queue, handle, index, signal)? {
                last = drawn;
            }
        }
        present_wait.push(last);
    }

    device.queue_present(request.queue, &PresentInfo {
        wait: &present_wait,
        swapchains: &request.swapchains,
    })?;
    Ok(())
}
