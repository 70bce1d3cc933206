//! `fxctl check`: run a config through the layer on a [HeadlessDevice] and
//! report the chain a swapchain would get.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use compositor::config::{Config, LayerSettings};
use compositor::device::{DeviceCaps, ImageUsage, Queue, SwapchainDesc};
use compositor::effect_registry::RegistrySnapshot;
use compositor::headless::HeadlessDevice;
use compositor::image_chain::SlotRef;
use compositor::input::NoKeyboard;
use compositor::shader_compiler::{CompileOutput, CompileRequest, CompiledModule, ShaderCompiler};
use compositor::swapchain::SwapchainPlan;
use compositor::{DeviceId, Layer, LayerError};
use serde::Serialize;

use crate::args::CheckArgs;

/// Accepts any shader file it can read and hands back an empty module, so
/// user shaders show up in the plan without a real compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadableFileCompiler;

impl ShaderCompiler for ReadableFileCompiler {
    fn compile(&self, path: &Path, _: &CompileRequest) -> CompileOutput {
        match std::fs::read(path) {
            Ok(_) => CompileOutput {
                success: true,
                module: Some(Arc::new(CompiledModule {
                    source: path.to_owned(),
                    code: Vec::new(),
                    entry_point: "main".to_owned(),
                })),
                ..Default::default()
            },
            Err(e) => CompileOutput::failed(format!("Can't read {}: {e}", path.display())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub config: Option<PathBuf>,
    pub settings: LayerSettings,
    pub plan: SwapchainPlan,
    pub effects: RegistrySnapshot,
}

impl Report {
    /// Selected effects that won't show up, with the reason.
    pub fn problems(&self) -> Vec<String> {
        self.effects
            .selected
            .iter()
            .filter_map(|name| {
                let Some(effect) = self.effects.effects.iter().find(|e| e.instance_name == *name)
                else {
                    return Some(format!("{name}: no such effect"));
                };
                let error = effect.compile_error.as_ref()?;
                Some(format!("{name}: {error}"))
            })
            .collect()
    }

    fn render(&self) -> String {
        let source = self
            .config
            .as_ref()
            .map_or_else(|| "built-in defaults".to_owned(), |p| p.display().to_string());
        let plan = &self.plan;

        let mut lines = vec![
            format!("config: {source}"),
            format!(
                "images: {} presentable, {} slots, {} allocated ({})",
                plan.present_images,
                plan.slot_count,
                plan.total_images,
                if plan.aliasing { "aliasing" } else { "copying" },
            ),
            "stages:".to_owned(),
        ];
        for stage in &plan.stages {
            lines.push(format!(
                "  {:<16} {:<12} {} -> {}",
                stage.name,
                stage.kind,
                slot_name(stage.input),
                slot_name(stage.output)
            ));
        }

        let disabled: Vec<&str> = self
            .effects
            .effects
            .iter()
            .filter(|e| !e.enabled && e.compile_error.is_none())
            .map(|e| e.instance_name.as_str())
            .collect();
        if !disabled.is_empty() {
            lines.push(format!("disabled: {}", disabled.join(", ")));
        }
        for problem in self.problems() {
            lines.push(format!("problem: {problem}"));
        }

        lines.push(String::new());
        lines.join("\n")
    }
}

fn slot_name(slot: SlotRef) -> String {
    match slot {
        SlotRef::Slot(i) => format!("slot {i}"),
        SlotRef::Presentable => "presentable".to_owned(),
    }
}

/// Create one swapchain as described by `args` and collect its plan.
pub fn build_report(config: Config, args: &CheckArgs) -> Result<Report, LayerError> {
    let path = config.path().map(ToOwned::to_owned);
    let layer = Layer::with_config(config, Arc::new(ReadableFileCompiler), Arc::new(NoKeyboard));

    let id = DeviceId(0);
    layer.register_device(id, Box::new(HeadlessDevice::new()), DeviceCaps {
        mutable_format: !args.no_mutable_format,
        present_queue: Queue(0),
    });
    let swapchain = layer.create_swapchain(id, &SwapchainDesc {
        extent: args.extent,
        format: args.format,
        min_image_count: args.images,
        usage: ImageUsage::COLOR_ATTACHMENT,
        mutable_format: false,
        old_swapchain: None,
    })?;

    let report = Report {
        config: path,
        settings: layer.settings(),
        plan: layer.swapchain_plan(id, swapchain)?,
        effects: layer.registry().snapshot(),
    };
    layer.destroy_device(id)?;
    Ok(report)
}

pub fn check(args: &CheckArgs) -> ExitCode {
    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::load_discovered(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            util::log_error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let has_issues = !config.issues().is_empty();

    let report = match build_report(config, args) {
        Ok(report) => report,
        Err(e) => {
            util::log_error!("Failed to build the chain: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                util::log_error!("Failed to serialize the report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", report.render());
    }

    if has_issues || !report.problems().is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
