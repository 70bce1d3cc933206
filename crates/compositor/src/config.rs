//! The layer's configuration file.
//!
//! A plain line-oriented `key = value` file:
//!
//! ```text
//! # effects run in this order
//! effects = cas:fxaa:myfx
//! disabledEffects = fxaa
//! myfx = /home/me/shaders/myfx.fx
//! cas#sharpness = 0.6
//! myfx#tint[2] = 0.25
//! ```
//!
//! Lines starting with `#` are comments (a `#` inside a key is part of the
//! key). Values may be wrapped in double quotes. A key given twice keeps the
//! last value.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::errors::ConfigError;
use crate::params::parse_bool;

/// Environment variable pointing at a config file, checked first.
pub const CONFIG_FILE_ENV: &str = "FXLAYER_CONFIG_FILE";

const FILE_NAME: &str = "fxlayer.conf";

/// Keys with a meaning of their own. Anything else without a `#` whose value
/// looks like a path defines a user shader effect.
const SETTING_KEYS: &[&str] = &[
    "effects",
    "disabledEffects",
    "maxEffects",
    "toggleKey",
    "reloadKey",
    "enableOnLaunch",
    "effectSearchPath",
    "effectIncludePath",
    "resizeQuiescenceMs",
];

const SHADER_EXTENSIONS: &[&str] = &["fx", "glsl", "hlsl", "spv"];

#[derive(Debug, Default)]
pub struct Config {
    path: Option<PathBuf>,
    /// Raw lines so saving keeps comments and ordering.
    lines: Vec<String>,
    values: BTreeMap<String, String>,
    issues: Vec<ConfigError>,
}

impl Config {
    /// Used when no config file exists anywhere.
    pub fn builtin_default() -> Self {
        let mut config = Self::default();
        config.set("effects", "cas");
        config
    }

    pub fn parse(text: &str, path: Option<PathBuf>) -> Self {
        let mut config = Config {
            path,
            ..Default::default()
        };

        for (i, raw) in text.lines().enumerate() {
            config.lines.push(raw.to_owned());

            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some((key, value)) => {
                    config.values.insert(key.to_owned(), value.to_owned());
                }
                None => config.issues.push(ConfigError::Syntax {
                    path: config.path.clone().unwrap_or_default(),
                    line: i + 1,
                    text: line.to_owned(),
                }),
            }
        }

        config
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self::parse(&text, Some(path.to_owned())))
    }

    /// Load the first config file [discover] finds, or the built-in default.
    pub fn load_discovered() -> Result<Self, ConfigError> {
        match discover() {
            Some(path) => Self::load(&path),
            None => {
                util::log_info!("No config file found, using the built-in defaults");
                Ok(Self::builtin_default())
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lines that weren't `key = value`. They are skipped, not fatal.
    pub fn issues(&self) -> &[ConfigError] {
        &self.issues
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_owned()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.parsed(key, parse_bool).unwrap_or(default)
    }

    pub fn get_f32(&self, key: &str, default: f32) -> f32 {
        self.parsed(key, |v| v.trim().parse().ok()).unwrap_or(default)
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.parsed(key, |v| v.trim().parse().ok()).unwrap_or(default)
    }

    /// A colon separated list. Empty items are dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(':')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parsed<T>(&self, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.get(key)?;
        let parsed = parse(raw);
        if parsed.is_none() {
            util::log_warning!("Ignoring invalid value '{raw}' for config key '{key}'");
        }
        parsed
    }

    /// Every key and value, sorted by key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `(name, path)` of every user shader effect the file defines.
    pub fn shader_definitions(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.values
            .iter()
            .filter(|(k, v)| is_shader_definition(k, v))
            .map(|(k, v)| (k.as_str(), Path::new(v.as_str())))
    }

    /// Set a key, rewriting the line that last set it or appending a new one.
    pub fn set(&mut self, key: &str, value: &str) {
        let line = format_line(key, value);
        let existing = self
            .lines
            .iter()
            .rposition(|l| parse_line(l.trim()).is_some_and(|(k, _)| k == key));
        match existing {
            Some(i) => self.lines[i] = line,
            None => self.lines.push(line),
        }
        self.values.insert(key.to_owned(), value.to_owned());
    }

    /// Remove every line setting `key`.
    pub fn remove(&mut self, key: &str) {
        self.lines
            .retain(|l| !parse_line(l.trim()).is_some_and(|(k, _)| k == key));
        self.values.remove(key);
    }

    /// The file as it would be written.
    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.path.as_deref().ok_or(ConfigError::NoPath)?;
        self.save_to(path)
    }

    /// Write through a sibling temp file so a reader never sees half a file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_owned(),
            source,
        };

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        std::fs::write(&tmp, self.to_text()).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)
    }
}

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key, value))
}

fn format_line(key: &str, value: &str) -> String {
    if value.starts_with(char::is_whitespace) || value.ends_with(char::is_whitespace) {
        format!("{key} = \"{value}\"")
    } else {
        format!("{key} = {value}")
    }
}

/// Whether `key` is one of the layer's own settings.
pub fn is_setting_key(key: &str) -> bool {
    SETTING_KEYS.contains(&key)
}

fn is_shader_definition(key: &str, value: &str) -> bool {
    if key.contains('#') || is_setting_key(key) {
        return false;
    }
    let path = Path::new(value);
    value.contains(std::path::MAIN_SEPARATOR)
        || path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SHADER_EXTENSIONS.contains(&e))
}

/// Where a config file is looked for, in order.
pub fn candidate_paths(env: impl Fn(&str) -> Option<OsString>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = env(CONFIG_FILE_ENV) {
        paths.push(PathBuf::from(p));
    }
    if let Some(p) = env("XDG_CONFIG_HOME") {
        paths.push(Path::new(&p).join("fxlayer").join(FILE_NAME));
    }
    if let Some(p) = env("HOME") {
        paths.push(Path::new(&p).join(".config/fxlayer").join(FILE_NAME));
    }
    paths.push(Path::new("/etc/fxlayer").join(FILE_NAME));
    paths.push(Path::new("/usr/share/fxlayer").join(FILE_NAME));
    paths
}

/// The first existing config file.
pub fn discover() -> Option<PathBuf> {
    candidate_paths(|k| std::env::var_os(k))
        .into_iter()
        .find(|p| p.is_file())
}

/// The typed view of the settings the layer itself reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSettings {
    pub effects: Vec<String>,
    pub disabled_effects: Vec<String>,
    pub max_effects: usize,
    pub toggle_key: String,
    pub reload_key: String,
    pub enable_on_launch: bool,
    pub effect_search_paths: Vec<PathBuf>,
    pub include_paths: Vec<PathBuf>,
    pub resize_quiescence_ms: u64,
}

impl LayerSettings {
    pub const DEFAULT_MAX_EFFECTS: u32 = 10;
    pub const DEFAULT_RESIZE_QUIESCENCE_MS: u32 = 200;

    pub fn from_config(config: &Config) -> Self {
        let paths = |key| config.get_list(key).into_iter().map(PathBuf::from).collect();
        Self {
            effects: config.get_list("effects"),
            disabled_effects: config.get_list("disabledEffects"),
            max_effects: config.get_u32("maxEffects", Self::DEFAULT_MAX_EFFECTS) as usize,
            toggle_key: config.get_str("toggleKey", "Home"),
            reload_key: config.get_str("reloadKey", "F10"),
            enable_on_launch: config.get_bool("enableOnLaunch", true),
            effect_search_paths: paths("effectSearchPath"),
            include_paths: paths("effectIncludePath"),
            resize_quiescence_ms: config
                .get_u32("resizeQuiescenceMs", Self::DEFAULT_RESIZE_QUIESCENCE_MS)
                .into(),
        }
    }

    pub fn resize_quiescence(&self) -> Duration {
        Duration::from_millis(self.resize_quiescence_ms)
    }
}

/// Notices when the config file's modification time changes.
#[derive(Debug, Clone)]
pub struct ConfigWatch {
    path: Option<PathBuf>,
    last_modified: Option<SystemTime>,
}

impl ConfigWatch {
    pub fn new(path: Option<PathBuf>) -> Self {
        let last_modified = path.as_deref().and_then(modified_time);
        Self {
            path,
            last_modified,
        }
    }

    /// Whether the file changed since the last call. A file that vanished
    /// doesn't count, editors do that while saving.
    pub fn poll(&mut self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        let Some(modified) = modified_time(path) else {
            return false;
        };
        if self.last_modified == Some(modified) {
            return false;
        }
        self.last_modified = Some(modified);
        true
    }

    /// Forget any pending change, e.g. after writing the file ourselves.
    pub fn rearm(&mut self) {
        self.last_modified = self.path.as_deref().and_then(modified_time);
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{bump_mtime, temp_file};

    const SAMPLE: &str = "\
# effects
effects = cas:fxaa:myfx
disabledEffects = fxaa
myfx = \"/opt/shaders/myfx.fx\"
cas#sharpness = 0.4
cas#sharpness = 0.6
myfx#tint[2] = 0.25
maxEffects = 4
this line is junk
";

    #[test]
    fn later_keys_override_earlier_ones() {
        let config = Config::parse(SAMPLE, None);
        assert_eq!(config.get("cas#sharpness"), Some("0.6"));
        assert_eq!(config.get_f32("cas#sharpness", 0.0), 0.6);
    }

    #[test]
    fn junk_lines_are_reported_not_fatal() {
        let config = Config::parse(SAMPLE, Some("a.conf".into()));
        assert_eq!(config.issues().len(), 1);
        assert!(matches!(
            &config.issues()[0],
            ConfigError::Syntax { line: 9, .. }
        ));
        assert_eq!(config.get_list("effects"), ["cas", "fxaa", "myfx"]);
    }

    #[test]
    fn quotes_are_stripped_and_shader_paths_found() {
        let config = Config::parse(SAMPLE, None);
        let defs: Vec<_> = config.shader_definitions().collect();
        assert_eq!(defs, [("myfx", Path::new("/opt/shaders/myfx.fx"))]);
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let settings = LayerSettings::from_config(&Config::parse(SAMPLE, None));
        assert_eq!(settings.max_effects, 4);
        assert_eq!(settings.toggle_key, "Home");
        assert_eq!(settings.reload_key, "F10");
        assert!(settings.enable_on_launch);
        assert_eq!(settings.resize_quiescence(), Duration::from_millis(200));
        assert_eq!(settings.disabled_effects, ["fxaa"]);
    }

    #[test]
    fn builtin_default_selects_cas() {
        let settings = LayerSettings::from_config(&Config::builtin_default());
        assert_eq!(settings.effects, ["cas"]);
        assert_eq!(settings.max_effects, 10);
    }

    #[test]
    fn set_rewrites_in_place_and_keeps_comments() {
        let mut config = Config::parse(SAMPLE, None);
        config.set("cas#sharpness", "0.9");
        config.set("deband#range", "20");
        config.remove("maxEffects");

        let text = config.to_text();
        assert!(text.starts_with("# effects\n"));
        assert!(text.contains("cas#sharpness = 0.4\ncas#sharpness = 0.9\n"));
        assert!(text.ends_with("deband#range = 20\n"));
        assert!(!text.contains("maxEffects"));

        let reparsed = Config::parse(&text, None);
        assert_eq!(reparsed.get("cas#sharpness"), Some("0.9"));
        assert_eq!(reparsed.get("maxEffects"), None);
    }

    #[test]
    fn discovery_order() {
        let env = |k: &str| match k {
            CONFIG_FILE_ENV => Some(OsString::from("/tmp/explicit.conf")),
            "HOME" => Some(OsString::from("/home/me")),
            _ => None,
        };
        let paths = candidate_paths(env);
        assert_eq!(paths, [
            PathBuf::from("/tmp/explicit.conf"),
            PathBuf::from("/home/me/.config/fxlayer/fxlayer.conf"),
            PathBuf::from("/etc/fxlayer/fxlayer.conf"),
            PathBuf::from("/usr/share/fxlayer/fxlayer.conf"),
        ]);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load(Path::new("/nonexistent/fxlayer.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = temp_file("save_round_trip.conf", "effects = cas\n");
        let mut config = Config::load(&path).expect("load");
        config.set("effects", "cas:smaa");
        config.save().expect("save");

        let loaded = Config::load(&path).expect("reload");
        assert_eq!(loaded.get_list("effects"), ["cas", "smaa"]);
    }

    #[test]
    fn watch_fires_once_per_change() {
        let path = temp_file("watch.conf", "effects = cas\n");
        let mut watch = ConfigWatch::new(Some(path.clone()));
        assert!(!watch.poll());

        bump_mtime(&path, 5);
        assert!(watch.poll());
        assert!(!watch.poll());

        bump_mtime(&path, 10);
        watch.rearm();
        assert!(!watch.poll());
    }
}
