//! `fxctl effects`: what the built-in effects are and what they take.

use std::process::ExitCode;

use compositor::effect_defs::{self, EffectDef};
use compositor::params::Parameter;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct EffectInfo {
    name: &'static str,
    description: &'static str,
    perceptual: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    options: Vec<&'static str>,
    parameters: Vec<Parameter>,
}

impl From<&'static EffectDef> for EffectInfo {
    fn from(def: &'static EffectDef) -> Self {
        Self {
            name: def.name,
            description: def.description,
            perceptual: def.uses_perceptual_encoding,
            options: def.options.to_vec(),
            parameters: def.parameters(),
        }
    }
}

pub fn list(json: bool) -> ExitCode {
    let effects: Vec<EffectInfo> = effect_defs::all().iter().map(EffectInfo::from).collect();

    if json {
        match serde_json::to_string_pretty(&effects) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                util::log_error!("Failed to serialize the effect list: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", render(&effects));
    }
    ExitCode::SUCCESS
}

fn render(effects: &[EffectInfo]) -> String {
    let mut lines = Vec::new();
    for effect in effects {
        lines.push(format!("{:<12} {}", effect.name, effect.description));
        for param in &effect.parameters {
            lines.push(format!(
                "    {} = {} ({})",
                param.name,
                param.value_strings().join(", "),
                param.kind()
            ));
        }
        for option in &effect.options {
            lines.push(format!("    {option} (option)"));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_is_listed_with_its_knobs() {
        let effects: Vec<EffectInfo> = effect_defs::all().iter().map(EffectInfo::from).collect();
        let text = render(&effects);

        assert!(text.starts_with("passthrough "));
        assert!(text.contains("\ncas          Contrast adaptive sharpening\n"));
        assert!(text.contains("    sharpness = 0.4 (float)\n"));
        assert!(text.contains("    lutFile (option)\n"));
    }

    #[test]
    fn json_skips_empty_options() {
        let cas = EffectInfo::from(effect_defs::get_def("cas").unwrap());
        let json = serde_json::to_value(&cas).unwrap();
        assert_eq!(json["name"], "cas");
        assert!(json.get("options").is_none());
        assert_eq!(json["parameters"][0]["name"], "sharpness");
    }
}
