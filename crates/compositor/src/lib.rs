//! An effect compositor that sits between an application and the driver's
//! swapchain.
//!
//! The application renders into virtual images the layer hands out instead
//! of the real presentable ones. On every present the selected chain of
//! effects runs from those images into the presentable image, and the chain
//! can be toggled, edited and reloaded while the application keeps running.
//!
//! [layer::Layer] is the entry point. Everything it needs from the GPU goes
//! through the [device::Device] trait, and [headless::HeadlessDevice] is an
//! implementation that only records what it was asked to do.

pub mod command_sets;
pub mod config;
pub mod device;
pub mod effect_defs;
pub mod effect_registry;
pub mod errors;
pub mod headless;
pub mod hot_reload;
pub mod image_chain;
pub mod input;
pub mod layer;
pub mod lut;
pub mod overlay;
pub mod params;
pub mod pipeline_builder;
pub mod shader_compiler;
pub mod stage;
pub mod swapchain;

pub use config::{Config, LayerSettings};
pub use device::{Device, DeviceCaps};
pub use effect_registry::EffectRegistry;
pub use errors::{ConfigError, DeviceError, LayerError, StageError};
pub use layer::{DeviceId, Layer, PresentRequest, SwapchainId};

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    /// Write `contents` to a file called `name` in a directory of its own.
    pub fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fxlayer-tests-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Move a file's modification time `secs` seconds past now, so a watcher
    /// sees a change even on coarse filesystem clocks.
    pub fn bump_mtime(path: &Path, secs: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(secs))
            .unwrap();
    }
}
