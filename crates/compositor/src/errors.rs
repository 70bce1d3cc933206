use std::path::PathBuf;

use thiserror::Error;

use crate::device::SwapchainHandle;
use crate::layer::DeviceId;

/// A driver call returned a failure code. The layer never retries or masks
/// these, it hands them back to the application as they came.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Driver call `{call}` failed with result {code}")]
pub struct DeviceError {
    pub call: &'static str,
    pub code: i32,
}

impl DeviceError {
    pub const OUT_OF_HOST_MEMORY: i32 = -1;
    pub const OUT_OF_DEVICE_MEMORY: i32 = -2;
    pub const INITIALIZATION_FAILED: i32 = -3;
    pub const DEVICE_LOST: i32 = -4;

    pub fn new(call: &'static str, code: i32) -> Self {
        Self { call, code }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?}:{line}: expected `key = value`, got '{text}'")]
    Syntax {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("Config has no file to save to")]
    NoPath,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Driver error: {0}")]
    Device(#[from] DeviceError),

    #[error("Effect '{0}' has no compiled shader module")]
    MissingModule(String),

    #[error("Effect '{effect}' requires the '{option}' option")]
    MissingOption { effect: String, option: String },

    #[error("Failed to load lookup table {path:?}: {reason}")]
    InvalidLut { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Unknown device {0:?}")]
    UnknownDevice(DeviceId),

    #[error("Unknown swapchain {0:?}")]
    UnknownSwapchain(SwapchainHandle),

    #[error("Image index {index} is out of range for a swapchain with {count} images")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("Driver error: {0}")]
    Device(#[from] DeviceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LayerError {
    /// The driver failure behind this error, if there is one.
    pub fn device_error(&self) -> Option<DeviceError> {
        match self {
            LayerError::Device(e) => Some(*e),
            _ => None,
        }
    }
}
