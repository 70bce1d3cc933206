//! The seam to the shader-effect compiler.
//!
//! User shader effects are source files the layer doesn't understand itself.
//! A [ShaderCompiler] turns one into a [CompiledModule] plus the parameters the
//! file declares.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::params::Parameter;

/// The compiler's output in a form the driver can build a pipeline from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    pub source: PathBuf,
    pub code: Vec<u32>,
    /// Entry point of the fragment stage.
    pub entry_point: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileRequest {
    /// The effect instance this compile is for, used in diagnostics.
    pub instance_name: String,
    /// Directories searched for `#include`s.
    pub include_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub success: bool,
    /// Declared uniforms, already at their default values.
    pub parameters: Vec<Parameter>,
    pub preprocessor_macros: Vec<PreprocessorMacro>,
    pub error: Option<String>,
    /// Always present when `success` is set.
    pub module: Option<std::sync::Arc<CompiledModule>>,
}

impl CompileOutput {
    /// A failed compile carrying only an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A preprocessor definition a shader reads, with the value it was compiled
/// with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessorMacro {
    pub name: String,
    pub value: String,
}

#[cfg_attr(test, mockall::automock)]
pub trait ShaderCompiler: Send + Sync {
    /// Compile the effect at `path`. Never panics on bad input, failures are
    /// reported through [CompileOutput::error].
    fn compile(&self, path: &Path, request: &CompileRequest) -> CompileOutput;
}
