//! The effects the user has selected, and their settings.
//!
//! The registry is shared between the present path and the overlay, so every
//! accessor copies out of a mutex that is only held for the lookup itself.
//! Shader compiles happen outside of it.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::config::{Config, LayerSettings, is_setting_key};
use crate::effect_defs::{self, EffectDef};
use crate::params::{ParamValue, Parameter};
use crate::shader_compiler::{
    CompileRequest, CompiledModule, PreprocessorMacro, ShaderCompiler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EffectKind {
    BuiltIn,
    UserShader,
}

/// One effect instance.
#[derive(Debug, Clone, Serialize)]
pub struct EffectConfig {
    /// Unique key, e.g. `cas` or `cas.2`.
    pub instance_name: String,
    pub effect_type: String,
    pub kind: EffectKind,
    pub enabled: bool,
    pub parameters: Vec<Parameter>,
    /// Set when the effect failed to compile or build. Such an effect stays
    /// disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    /// Non-numeric config options, like `lutFile`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preprocessor_macros: Vec<PreprocessorMacro>,
    #[serde(skip)]
    pub module: Option<Arc<CompiledModule>>,
}

impl EffectConfig {
    /// A built-in effect with default parameters.
    pub fn built_in(instance_name: &str, def: &EffectDef) -> Self {
        Self {
            instance_name: instance_name.to_owned(),
            effect_type: def.name.to_owned(),
            kind: EffectKind::BuiltIn,
            enabled: true,
            parameters: def.parameters(),
            compile_error: None,
            source_path: None,
            options: BTreeMap::new(),
            preprocessor_macros: Vec::new(),
            module: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.compile_error.is_some()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    fn mark_failed(&mut self, error: String) {
        self.compile_error = Some(error);
        self.enabled = false;
    }
}

/// What the overlay gets to draw from.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub selected: Vec<String>,
    /// Entries of the selection, in order. Unresolved names have none.
    pub effects: Vec<EffectConfig>,
}

enum Resolved {
    BuiltIn(&'static EffectDef),
    UserShader(PathBuf),
}

/// What the registry keeps from the config to create effects later on.
#[derive(Debug, Clone, Default)]
struct Sources {
    /// `name = /path/to/shader.fx` definitions.
    shader_paths: BTreeMap<String, PathBuf>,
    /// `name = cas` style renames of built-in effects.
    aliases: BTreeMap<String, String>,
    search_paths: Vec<PathBuf>,
    include_paths: Vec<PathBuf>,
    /// `instance#key = value` entries, grouped by instance.
    overrides: HashMap<String, BTreeMap<String, String>>,
}

impl Sources {
    fn from_config(config: &Config, settings: &LayerSettings) -> Self {
        let mut sources = Sources {
            shader_paths: config
                .shader_definitions()
                .map(|(name, path)| (name.to_owned(), path.to_owned()))
                .collect(),
            search_paths: settings.effect_search_paths.clone(),
            include_paths: settings.include_paths.clone(),
            ..Default::default()
        };

        for (key, value) in config.entries() {
            if let Some((instance, option)) = key.split_once('#') {
                sources
                    .overrides
                    .entry(instance.to_owned())
                    .or_default()
                    .insert(option.to_owned(), value.to_owned());
            } else if !is_setting_key(key) && effect_defs::is_builtin(value) {
                sources.aliases.insert(key.to_owned(), value.to_owned());
            }
        }

        sources
    }

    /// The type of an instance named in a selection: what the config maps
    /// the name to, else the name without a `.N` suffix, else the name.
    fn effect_type_for(&self, instance: &str) -> String {
        if let Some(alias) = self.aliases.get(instance) {
            return alias.clone();
        }
        if self.shader_paths.contains_key(instance) {
            return instance.to_owned();
        }
        match instance.rsplit_once('.') {
            Some((base, n))
                if !base.is_empty() && !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) =>
            {
                base.to_owned()
            }
            _ => instance.to_owned(),
        }
    }

    fn resolve(&self, effect_type: &str) -> Option<Resolved> {
        if let Some(def) = effect_defs::get_def(effect_type) {
            return Some(Resolved::BuiltIn(def));
        }
        if let Some(def) = self.aliases.get(effect_type).and_then(|a| effect_defs::get_def(a)) {
            return Some(Resolved::BuiltIn(def));
        }
        if let Some(path) = self.shader_paths.get(effect_type) {
            if path.is_file() {
                return Some(Resolved::UserShader(path.clone()));
            }
            util::log_warning!("Shader file {path:?} for effect '{effect_type}' doesn't exist");
            return None;
        }
        self.search_paths
            .iter()
            .map(|dir| dir.join(format!("{effect_type}.fx")))
            .find(|p| p.is_file())
            .map(Resolved::UserShader)
    }
}

struct Inner {
    effects: HashMap<String, EffectConfig>,
    selected: Vec<String>,
    sources: Sources,
}

pub struct EffectRegistry {
    inner: Mutex<Inner>,
    compiler: Arc<dyn ShaderCompiler>,
}

impl EffectRegistry {
    pub fn new(compiler: Arc<dyn ShaderCompiler>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                effects: HashMap::new(),
                selected: Vec::new(),
                sources: Sources::default(),
            }),
            compiler,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Throw away every entry and repopulate from `config`.
    pub fn initialize(&self, config: &Config) {
        let settings = LayerSettings::from_config(config);
        let sources = Sources::from_config(config, &settings);

        let selected = dedup_selection(settings.effects);
        let mut effects = HashMap::new();
        for instance in &selected {
            let effect_type = sources.effect_type_for(instance);
            let Some(mut effect) = self.create_effect(&sources, instance, &effect_type) else {
                continue;
            };
            if settings.disabled_effects.contains(instance) {
                effect.enabled = false;
            }
            effects.insert(instance.clone(), effect);
        }

        util::log_info!(
            "Loaded {} of {} selected effects",
            effects.len(),
            selected.len()
        );

        let mut inner = self.lock();
        inner.effects = effects;
        inner.selected = selected;
        inner.sources = sources;
    }

    /// Create `instance_name` unless it already exists. Without an explicit
    /// type the instance name is the type. Returns whether the entry exists
    /// afterwards.
    pub fn ensure_effect(&self, instance_name: &str, effect_type: Option<&str>) -> bool {
        let effect_type = effect_type.unwrap_or(instance_name);
        self.ensure_with_type(instance_name, effect_type)
    }

    fn ensure_with_type(&self, instance_name: &str, effect_type: &str) -> bool {
        let sources = {
            let inner = self.lock();
            if inner.effects.contains_key(instance_name) {
                return true;
            }
            inner.sources.clone()
        };

        let Some(effect) = self.create_effect(&sources, instance_name, effect_type) else {
            return false;
        };
        self.lock()
            .effects
            .entry(instance_name.to_owned())
            .or_insert(effect);
        true
    }

    fn create_effect(
        &self,
        sources: &Sources,
        instance: &str,
        effect_type: &str,
    ) -> Option<EffectConfig> {
        let Some(resolved) = sources.resolve(effect_type) else {
            util::log_warning!(
                "Effect '{instance}' of type '{effect_type}' can't be found, skipping it"
            );
            return None;
        };

        let empty = BTreeMap::new();
        let overrides = sources.overrides.get(instance).unwrap_or(&empty);

        let mut effect = match resolved {
            Resolved::BuiltIn(def) => {
                let mut effect = EffectConfig::built_in(instance, def);
                effect.options = def
                    .options
                    .iter()
                    .filter_map(|o| Some(((*o).to_owned(), overrides.get(*o)?.clone())))
                    .collect();
                effect
            }
            Resolved::UserShader(path) => {
                let request = CompileRequest {
                    instance_name: instance.to_owned(),
                    include_paths: sources.include_paths.clone(),
                };
                let output = self.compiler.compile(&path, &request);

                let mut effect = EffectConfig {
                    instance_name: instance.to_owned(),
                    effect_type: effect_type.to_owned(),
                    kind: EffectKind::UserShader,
                    enabled: true,
                    parameters: output.parameters,
                    compile_error: None,
                    source_path: Some(path.clone()),
                    options: BTreeMap::new(),
                    preprocessor_macros: output.preprocessor_macros,
                    module: output.module,
                };
                if !output.success || effect.module.is_none() {
                    let error = output
                        .error
                        .unwrap_or_else(|| "compiler produced no module".to_owned());
                    util::log_error!("Failed to compile effect '{instance}' ({path:?}): {error}");
                    effect.mark_failed(error);
                }
                effect
            }
        };

        for param in &mut effect.parameters {
            let name = param.name.clone();
            let rejected = param.load(|suffix| overrides.get(&format!("{name}{suffix}")).cloned());
            for suffix in rejected {
                util::log_warning!("Ignoring invalid value for '{instance}#{name}{suffix}'");
            }
        }

        Some(effect)
    }

    pub fn set_effect_enabled(&self, instance_name: &str, enabled: bool) {
        let mut inner = self.lock();
        let Some(effect) = inner.effects.get_mut(instance_name) else {
            return;
        };
        if enabled && effect.failed() {
            util::log_warning!("Effect '{instance_name}' failed to build and can't be enabled");
            return;
        }
        effect.enabled = enabled;
    }

    /// Set a parameter, clamped to its bounds. Returns whether a parameter
    /// of a matching kind was found.
    pub fn set_parameter_value(
        &self,
        instance_name: &str,
        param_name: &str,
        value: impl Into<ParamValue>,
    ) -> bool {
        let value = value.into();
        let mut inner = self.lock();
        inner
            .effects
            .get_mut(instance_name)
            .and_then(|e| e.parameters.iter_mut().find(|p| p.name == param_name))
            .is_some_and(|p| p.set(&value))
    }

    pub fn reset_parameters(&self, instance_name: &str) {
        if let Some(effect) = self.lock().effects.get_mut(instance_name) {
            effect.parameters.iter_mut().for_each(Parameter::reset);
        }
    }

    pub fn get_selected_effects(&self) -> Vec<String> {
        self.lock().selected.clone()
    }

    /// Replace the selection. New names get entries, entries no longer
    /// selected are dropped, and everything not in `disabled` is enabled
    /// unless it failed.
    pub fn set_selected_effects(&self, selected: Vec<String>, disabled: &[String]) {
        let selected = dedup_selection(selected);
        let sources = self.lock().sources.clone();
        for name in &selected {
            let effect_type = sources.effect_type_for(name);
            self.ensure_with_type(name, &effect_type);
        }

        let mut inner = self.lock();
        inner.effects.retain(|name, _| selected.contains(name));
        for (name, effect) in inner.effects.iter_mut() {
            effect.enabled = !disabled.contains(name) && !effect.failed();
        }
        inner.selected = selected;
    }

    /// The selected instances that exist and are enabled, in order.
    pub fn get_enabled_effects(&self) -> Vec<String> {
        let inner = self.lock();
        inner
            .selected
            .iter()
            .filter(|n| inner.effects.get(*n).is_some_and(|e| e.enabled))
            .cloned()
            .collect()
    }

    /// The selected instances that get a slot in the chain, in order: the
    /// enabled ones and the failed ones, which are shown as a pass-through.
    pub fn get_active_effects(&self) -> Vec<String> {
        let inner = self.lock();
        inner
            .selected
            .iter()
            .filter(|n| inner.effects.get(*n).is_some_and(|e| e.enabled || e.failed()))
            .cloned()
            .collect()
    }

    pub fn get_effect(&self, instance_name: &str) -> Option<EffectConfig> {
        self.lock().effects.get(instance_name).cloned()
    }

    /// Parameters of every selected instance, in selection order.
    pub fn get_all_parameters(&self) -> Vec<(String, Vec<Parameter>)> {
        let inner = self.lock();
        inner
            .selected
            .iter()
            .filter_map(|n| Some((n.clone(), inner.effects.get(n)?.parameters.clone())))
            .collect()
    }

    pub fn has_effect_failed(&self, instance_name: &str) -> bool {
        self.lock()
            .effects
            .get(instance_name)
            .is_some_and(EffectConfig::failed)
    }

    pub fn get_effect_error(&self, instance_name: &str) -> Option<String> {
        self.lock()
            .effects
            .get(instance_name)?
            .compile_error
            .clone()
    }

    /// Record that building `instance_name` failed. It stays disabled until
    /// the registry is reinitialized.
    pub fn mark_failed(&self, instance_name: &str, error: String) {
        if let Some(effect) = self.lock().effects.get_mut(instance_name) {
            effect.mark_failed(error);
        }
    }

    pub fn is_builtin(&self, effect_type: &str) -> bool {
        effect_defs::is_builtin(effect_type)
    }

    pub fn effect_count(&self) -> usize {
        self.lock().effects.len()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.lock();
        RegistrySnapshot {
            selected: inner.selected.clone(),
            effects: inner
                .selected
                .iter()
                .filter_map(|n| inner.effects.get(n).cloned())
                .collect(),
        }
    }

    /// Config entries that reproduce the current state: the selection, the
    /// disabled subset and every parameter that isn't at its default.
    pub fn persisted_entries(&self) -> Vec<(String, String)> {
        let inner = self.lock();
        let disabled: Vec<&str> = inner
            .selected
            .iter()
            .filter(|n| inner.effects.get(*n).is_some_and(|e| !e.enabled))
            .map(String::as_str)
            .collect();

        let mut entries = vec![
            ("effects".to_owned(), inner.selected.join(":")),
            ("disabledEffects".to_owned(), disabled.join(":")),
        ];
        for name in &inner.selected {
            let Some(effect) = inner.effects.get(name) else {
                continue;
            };
            for param in effect.parameters.iter().filter(|p| p.changed()) {
                for (suffix, value) in param.serialize() {
                    entries.push((format!("{name}#{}{suffix}", param.name), value));
                }
            }
        }
        entries
    }

    /// Write [EffectRegistry::persisted_entries] into `config`, dropping the
    /// overrides of parameters that are back at their default.
    pub fn persist_into(&self, config: &mut Config) {
        let entries = self.persisted_entries();
        let written = |key: &str| entries.iter().any(|(k, _)| k == key);

        for (instance, params) in self.get_all_parameters() {
            for param in &params {
                let base = format!("{instance}#{}", param.name);
                let suffixes = param.serialize().into_iter().map(|(suffix, _)| suffix);
                for suffix in std::iter::once(String::new()).chain(suffixes) {
                    let key = format!("{base}{suffix}");
                    if !written(&key) {
                        config.remove(&key);
                    }
                }
            }
        }

        for (key, value) in &entries {
            if value.is_empty() {
                config.remove(key);
            } else {
                config.set(key, value);
            }
        }
    }
}

/// Drop repeated instance names, keeping the first.
fn dedup_selection(selected: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(selected.len());
    for name in selected {
        if unique.contains(&name) {
            util::log_warning!("Effect '{name}' is selected more than once, using it once");
        } else {
            unique.push(name);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::shader_compiler::{CompileOutput, MockShaderCompiler};
    use crate::test_support::temp_file;

    fn compiled(path: &Path) -> CompileOutput {
        CompileOutput {
            success: true,
            parameters: vec![
                Parameter::float("strength", 0.5, 0.0, 1.0),
                Parameter::float_vec("tint", &[1.0, 1.0, 1.0], 0.0, 1.0),
            ],
            preprocessor_macros: vec![PreprocessorMacro {
                name: "SAMPLES".to_owned(),
                value: "4".to_owned(),
            }],
            error: None,
            module: Some(Arc::new(CompiledModule {
                source: path.to_owned(),
                code: vec![0x0723_0203],
                entry_point: "main".to_owned(),
            })),
        }
    }

    fn no_compiles() -> Arc<MockShaderCompiler> {
        let mut compiler = MockShaderCompiler::new();
        compiler.expect_compile().never();
        Arc::new(compiler)
    }

    fn registry_with(text: &str, compiler: Arc<dyn ShaderCompiler>) -> EffectRegistry {
        let registry = EffectRegistry::new(compiler);
        registry.initialize(&Config::parse(text, None));
        registry
    }

    #[test]
    fn initialize_follows_the_selection() {
        let registry = registry_with(
            "effects = cas:fxaa:deband\ndisabledEffects = fxaa\ncas#sharpness = 0.8\n",
            no_compiles(),
        );

        assert_eq!(registry.get_selected_effects(), ["cas", "fxaa", "deband"]);
        assert_eq!(registry.get_enabled_effects(), ["cas", "deband"]);

        let cas = registry.get_effect("cas").unwrap();
        assert_eq!(cas.kind, EffectKind::BuiltIn);
        assert_eq!(cas.parameter("sharpness").unwrap().value_strings(), ["0.8"]);
    }

    #[test]
    fn unresolved_names_stay_selected_without_an_entry() {
        let registry = registry_with("effects = cas:nosuchfx\n", no_compiles());

        assert_eq!(registry.get_selected_effects(), ["cas", "nosuchfx"]);
        assert!(registry.get_effect("nosuchfx").is_none());
        assert_eq!(registry.get_enabled_effects(), ["cas"]);
        assert_eq!(registry.get_all_parameters().len(), 1);
    }

    #[test]
    fn numbered_instances_share_a_type() {
        let registry = registry_with(
            "effects = cas:cas.2:sharp\nsharp = dls\ncas.2#sharpness = 0.1\n",
            no_compiles(),
        );

        let second = registry.get_effect("cas.2").unwrap();
        assert_eq!(second.effect_type, "cas");
        assert_eq!(second.parameter("sharpness").unwrap().value_strings(), ["0.1"]);
        assert_eq!(registry.get_effect("sharp").unwrap().effect_type, "dls");
        assert!(!registry.get_effect("cas").unwrap().parameters[0].changed());
    }

    #[test]
    fn user_shaders_are_compiled_with_overrides_applied() {
        let shader = temp_file("registry_user.fx", "// shader\n");
        let mut compiler = MockShaderCompiler::new();
        compiler
            .expect_compile()
            .times(1)
            .withf(|_, req| req.instance_name == "myfx")
            .returning(|path, _| compiled(path));

        let text = format!("effects = myfx\nmyfx = {}\nmyfx#tint[1] = 0.25\n", shader.display());
        let registry = registry_with(&text, Arc::new(compiler));

        let effect = registry.get_effect("myfx").unwrap();
        assert_eq!(effect.kind, EffectKind::UserShader);
        assert_eq!(effect.source_path.as_deref(), Some(shader.as_path()));
        assert!(effect.module.is_some());
        assert_eq!(effect.preprocessor_macros.len(), 1);
        assert_eq!(effect.parameter("tint").unwrap().value_strings(), ["1", "0.25", "1"]);
    }

    #[test]
    fn shaders_are_found_on_the_search_path() {
        let shader = temp_file("searchfx.fx", "// shader\n");
        let dir = shader.parent().unwrap().to_owned();
        let mut compiler = MockShaderCompiler::new();
        compiler.expect_compile().times(1).returning(|path, _| compiled(path));

        let text = format!("effects = searchfx\neffectSearchPath = {}\n", dir.display());
        let registry = registry_with(&text, Arc::new(compiler));
        assert_eq!(
            registry.get_effect("searchfx").unwrap().source_path,
            Some(shader)
        );
    }

    #[test]
    fn ensure_effect_is_idempotent() {
        let shader = temp_file("ensure_once.fx", "// shader\n");
        let mut compiler = MockShaderCompiler::new();
        compiler.expect_compile().times(1).returning(|path, _| compiled(path));

        let text = format!("effects = cas\nonce = {}\n", shader.display());
        let registry = registry_with(&text, Arc::new(compiler));

        assert!(registry.ensure_effect("once", None));
        assert!(registry.set_parameter_value("once", "strength", 0.9f32));
        assert!(registry.ensure_effect("once", None));

        assert_eq!(registry.effect_count(), 2);
        let once = registry.get_effect("once").unwrap();
        assert_eq!(once.parameter("strength").unwrap().value_strings(), ["0.9"]);
    }

    #[test]
    fn ensure_effect_with_an_explicit_type() {
        let registry = registry_with("effects = cas\n", no_compiles());
        assert!(registry.ensure_effect("smooth", Some("fxaa")));
        assert_eq!(registry.get_effect("smooth").unwrap().effect_type, "fxaa");
        assert!(!registry.ensure_effect("ghost", None));
    }

    #[test]
    fn compile_failures_leave_a_disabled_entry() {
        let shader = temp_file("broken.fx", "this is not hlsl\n");
        let mut compiler = MockShaderCompiler::new();
        compiler
            .expect_compile()
            .times(1)
            .returning(|_, _| CompileOutput::failed("line 1: syntax error"));

        let text = format!("effects = broken:cas\nbroken = {}\n", shader.display());
        let registry = registry_with(&text, Arc::new(compiler));

        assert!(registry.has_effect_failed("broken"));
        assert_eq!(
            registry.get_effect_error("broken").as_deref(),
            Some("line 1: syntax error")
        );
        assert_eq!(registry.get_enabled_effects(), ["cas"]);

        registry.set_effect_enabled("broken", true);
        assert!(!registry.get_effect("broken").unwrap().enabled);
    }

    #[test]
    fn mutations_of_missing_entries_are_no_ops() {
        let registry = registry_with("effects = cas\n", no_compiles());
        registry.set_effect_enabled("ghost", false);
        assert!(!registry.set_parameter_value("ghost", "sharpness", 0.1f32));
        assert!(!registry.set_parameter_value("cas", "ghost", 0.1f32));
        assert!(!registry.set_parameter_value("cas", "sharpness", true));
        assert_eq!(registry.effect_count(), 1);
    }

    #[test]
    fn parameter_writes_are_clamped() {
        let registry = registry_with("effects = smaa\n", no_compiles());
        assert!(registry.set_parameter_value("smaa", "maxSearchSteps", 500));
        let smaa = registry.get_effect("smaa").unwrap();
        assert_eq!(smaa.parameter("maxSearchSteps").unwrap().value_strings(), ["112"]);

        registry.reset_parameters("smaa");
        let smaa = registry.get_effect("smaa").unwrap();
        assert!(smaa.parameters.iter().all(|p| !p.changed()));
    }

    #[test]
    fn set_selected_effects_adds_and_prunes() {
        let registry = registry_with("effects = cas:fxaa\n", no_compiles());
        registry.set_selected_effects(
            vec!["deband".to_owned(), "cas".to_owned(), "cas.3".to_owned()],
            &["cas".to_owned()],
        );

        assert_eq!(registry.get_selected_effects(), ["deband", "cas", "cas.3"]);
        assert!(registry.get_effect("fxaa").is_none());
        assert_eq!(registry.get_effect("cas.3").unwrap().effect_type, "cas");
        assert_eq!(registry.get_enabled_effects(), ["deband", "cas.3"]);
    }

    #[test]
    fn mark_failed_disables_the_entry() {
        let registry = registry_with("effects = fxaa:cas\n", no_compiles());
        registry.mark_failed("fxaa", "pipeline creation failed".to_owned());

        assert!(registry.has_effect_failed("fxaa"));
        assert_eq!(registry.get_enabled_effects(), ["cas"]);
    }

    #[test]
    fn failed_entries_keep_their_slot() {
        let shader = temp_file("broken_slot.fx", "this is not hlsl\n");
        let mut compiler = MockShaderCompiler::new();
        compiler
            .expect_compile()
            .times(1)
            .returning(|_, _| CompileOutput::failed("line 3: unknown identifier"));

        let text = format!(
            "effects = broken:fxaa:cas:deband\nbroken = {}\ndisabledEffects = deband\n",
            shader.display()
        );
        let registry = registry_with(&text, Arc::new(compiler));
        registry.mark_failed("fxaa", "pipeline creation failed".to_owned());

        assert_eq!(registry.get_enabled_effects(), ["cas"]);
        assert_eq!(registry.get_active_effects(), ["broken", "fxaa", "cas"]);
    }

    #[test]
    fn repeated_names_are_selected_once() {
        let registry = registry_with("effects = cas:fxaa:cas\n", no_compiles());
        assert_eq!(registry.get_selected_effects(), ["cas", "fxaa"]);
        assert_eq!(registry.effect_count(), 2);

        registry.set_selected_effects(
            vec!["deband".to_owned(), "deband".to_owned(), "cas".to_owned()],
            &[],
        );
        assert_eq!(registry.get_selected_effects(), ["deband", "cas"]);
        assert_eq!(registry.get_active_effects(), ["deband", "cas"]);
    }

    #[test]
    fn persisted_entries_hold_only_changes() {
        let registry = registry_with("effects = cas:fxaa\ndisabledEffects = fxaa\n", no_compiles());
        registry.set_parameter_value("cas", "sharpness", 0.7f32);

        let entries = registry.persisted_entries();
        assert_eq!(entries, [
            ("effects".to_owned(), "cas:fxaa".to_owned()),
            ("disabledEffects".to_owned(), "fxaa".to_owned()),
            ("cas#sharpness".to_owned(), "0.7".to_owned()),
        ]);
    }

    #[test]
    fn persisting_drops_overrides_back_at_default() {
        let text = "# mine\neffects = cas:fxaa\ndisabledEffects = fxaa\ncas#sharpness = 0.9\n";
        let mut config = Config::parse(text, None);
        let registry = EffectRegistry::new(no_compiles());
        registry.initialize(&config);
        registry.reset_parameters("cas");
        registry.set_effect_enabled("fxaa", true);

        registry.persist_into(&mut config);
        assert_eq!(config.to_text(), "# mine\neffects = cas:fxaa\n");
    }

    #[test]
    fn lut_options_are_captured() {
        let registry = registry_with(
            "effects = lut\nlut#lutFile = /opt/luts/warm.cube\n",
            no_compiles(),
        );
        let lut = registry.get_effect("lut").unwrap();
        assert_eq!(lut.options["lutFile"], "/opt/luts/warm.cube");
    }

    #[test]
    fn snapshot_serializes_in_selection_order() {
        let registry = registry_with("effects = fxaa:cas:nosuchfx\n", no_compiles());
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.effects.len(), 2);
        assert_eq!(snapshot.effects[0].instance_name, "fxaa");

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["selected"][2], "nosuchfx");
        assert_eq!(json["effects"][1]["parameters"][0]["name"], "sharpness");
    }
}
