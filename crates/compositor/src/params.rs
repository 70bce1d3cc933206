//! Effect parameters.
//!
//! A [Parameter] is one tweakable value of an effect: a float, int, uint or
//! bool, optionally a vector of 2 to 4 components. Numeric parameters carry
//! bounds and every write is clamped to them.
//!
//! Parameters are persisted as `instance#name = value` lines, vectors one line
//! per component (`instance#name[1] = value`), see [Parameter::serialize].

use std::fmt;
use std::str::FromStr;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

/// A numeric component type a parameter can be made of.
pub trait Component:
    Copy + PartialOrd + fmt::Display + FromStr + Pod + Send + Sync + 'static
{
    fn parse_component(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    fn from_f32(v: f32) -> Self;
}

impl Component for f32 {
    fn parse_component(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_suffix(['f', 'F']).unwrap_or(s);
        s.parse().ok()
    }

    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Component for i32 {
    fn from_f32(v: f32) -> Self {
        v as i32
    }
}

impl Component for u32 {
    fn from_f32(v: f32) -> Self {
        v as u32
    }
}

const MAX_COMPONENTS: usize = 4;

/// A bounded scalar or vector value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranged<T> {
    pub value: Vec<T>,
    pub default: Vec<T>,
    pub min: T,
    pub max: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<T>,
}

impl<T: Component> Ranged<T> {
    /// Defaults past the fourth are dropped, and no defaults at all make a
    /// scalar at `min`.
    fn new(default: &[T], min: T, max: T) -> Self {
        let default = match default.len() {
            0 => {
                util::log_warning!("Parameter declared without a default, using {min}");
                vec![min]
            }
            1..=MAX_COMPONENTS => default.to_vec(),
            n => {
                util::log_warning!(
                    "Parameter declared with {n} components, keeping the first {MAX_COMPONENTS}"
                );
                default[..MAX_COMPONENTS].to_vec()
            }
        };
        let default: Vec<T> = default.into_iter().map(|v| clamp(v, min, max)).collect();
        Self {
            value: default.clone(),
            default,
            min,
            max,
            step: None,
        }
    }

    pub fn clamp(&self, v: T) -> T {
        clamp(v, self.min, self.max)
    }

    /// Set the leading components to `values`, clamped. Extra values are
    /// ignored.
    fn set(&mut self, values: &[T]) {
        let (min, max) = (self.min, self.max);
        for (slot, v) in self.value.iter_mut().zip(values) {
            *slot = clamp(*v, min, max);
        }
    }
}

/// NaN clamps to `min`.
fn clamp<T: PartialOrd>(v: T, min: T, max: T) -> T {
    if v > max {
        max
    } else if v >= min {
        v
    } else {
        min
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamData {
    Float(Ranged<f32>),
    Int(Ranged<i32>),
    Uint(Ranged<u32>),
    Bool { value: bool, default: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Float,
    Int,
    Uint,
    Bool,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamKind::Float => "float",
            ParamKind::Int => "int",
            ParamKind::Uint => "uint",
            ParamKind::Bool => "bool",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// The name used in config keys.
    pub name: String,
    /// What the overlay shows. Defaults to `name`.
    pub label: String,
    /// Labels for the values of an enumerated int parameter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(flatten)]
    pub data: ParamData,
}

impl Parameter {
    fn with_data(name: &str, data: ParamData) -> Self {
        Self {
            name: name.to_owned(),
            label: name.to_owned(),
            choices: Vec::new(),
            data,
        }
    }

    pub fn float(name: &str, default: f32, min: f32, max: f32) -> Self {
        Self::float_vec(name, &[default], min, max)
    }

    pub fn float_vec(name: &str, default: &[f32], min: f32, max: f32) -> Self {
        Self::with_data(name, ParamData::Float(Ranged::new(default, min, max)))
    }

    pub fn int(name: &str, default: i32, min: i32, max: i32) -> Self {
        Self::int_vec(name, &[default], min, max)
    }

    pub fn int_vec(name: &str, default: &[i32], min: i32, max: i32) -> Self {
        Self::with_data(name, ParamData::Int(Ranged::new(default, min, max)))
    }

    pub fn uint(name: &str, default: u32, min: u32, max: u32) -> Self {
        Self::uint_vec(name, &[default], min, max)
    }

    pub fn uint_vec(name: &str, default: &[u32], min: u32, max: u32) -> Self {
        Self::with_data(name, ParamData::Uint(Ranged::new(default, min, max)))
    }

    pub fn boolean(name: &str, default: bool) -> Self {
        Self::with_data(
            name,
            ParamData::Bool {
                value: default,
                default,
            },
        )
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_owned();
        self
    }

    pub fn with_step(mut self, step: f32) -> Self {
        match &mut self.data {
            ParamData::Float(r) => r.step = Some(step),
            ParamData::Int(r) => r.step = Some(i32::from_f32(step)),
            ParamData::Uint(r) => r.step = Some(u32::from_f32(step)),
            ParamData::Bool { .. } => {}
        }
        self
    }

    pub fn with_choices(mut self, choices: &[&str]) -> Self {
        self.choices = choices.iter().map(|c| (*c).to_owned()).collect();
        self
    }

    pub fn kind(&self) -> ParamKind {
        match self.data {
            ParamData::Float(_) => ParamKind::Float,
            ParamData::Int(_) => ParamKind::Int,
            ParamData::Uint(_) => ParamKind::Uint,
            ParamData::Bool { .. } => ParamKind::Bool,
        }
    }

    pub fn components(&self) -> usize {
        match &self.data {
            ParamData::Float(r) => r.value.len(),
            ParamData::Int(r) => r.value.len(),
            ParamData::Uint(r) => r.value.len(),
            ParamData::Bool { .. } => 1,
        }
    }

    /// Whether the value differs from the default.
    pub fn changed(&self) -> bool {
        match &self.data {
            ParamData::Float(r) => r.value != r.default,
            ParamData::Int(r) => r.value != r.default,
            ParamData::Uint(r) => r.value != r.default,
            ParamData::Bool { value, default } => value != default,
        }
    }

    pub fn reset(&mut self) {
        match &mut self.data {
            ParamData::Float(r) => r.value.clone_from(&r.default),
            ParamData::Int(r) => r.value.clone_from(&r.default),
            ParamData::Uint(r) => r.value.clone_from(&r.default),
            ParamData::Bool { value, default } => *value = *default,
        }
    }

    /// Write `value`, clamped to the bounds. Returns `false` (and changes
    /// nothing) when the kinds don't match. Non-negative ints are accepted for
    /// uint parameters.
    pub fn set(&mut self, value: &ParamValue) -> bool {
        match (&mut self.data, value) {
            (ParamData::Float(r), ParamValue::Floats(v)) => r.set(v),
            (ParamData::Int(r), ParamValue::Ints(v)) => r.set(v),
            (ParamData::Uint(r), ParamValue::Uints(v)) => r.set(v),
            (ParamData::Uint(r), ParamValue::Ints(v)) => {
                let Ok(v) = v.iter().map(|i| u32::try_from(*i)).collect::<Result<Vec<_>, _>>()
                else {
                    return false;
                };
                r.set(&v)
            }
            (ParamData::Bool { value, .. }, ParamValue::Bool(b)) => *value = *b,
            _ => return false,
        }
        true
    }

    /// The current value as one string per component.
    pub fn value_strings(&self) -> Vec<String> {
        fn strings<T: Component>(r: &Ranged<T>) -> Vec<String> {
            r.value.iter().map(|v| v.to_string()).collect()
        }
        match &self.data {
            ParamData::Float(r) => strings(r),
            ParamData::Int(r) => strings(r),
            ParamData::Uint(r) => strings(r),
            ParamData::Bool { value, .. } => vec![value.to_string()],
        }
    }

    /// `(suffix, value)` pairs to persist. Scalars have an empty suffix,
    /// vector components are suffixed `[i]`.
    pub fn serialize(&self) -> Vec<(String, String)> {
        let values = self.value_strings();
        if values.len() == 1 {
            return vec![(String::new(), values.into_iter().next().unwrap_or_default())];
        }
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("[{i}]"), v))
            .collect()
    }

    /// Apply persisted overrides. `lookup` is called with the suffixes
    /// [Parameter::serialize] produces; an unsuffixed value may also hold a
    /// comma separated list for vectors. Returns the suffixes whose value
    /// couldn't be parsed.
    pub fn load(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut rejected = Vec::new();

        if let Some(text) = lookup("") {
            if !self.apply_text(&text) {
                rejected.push(String::new());
            }
        }

        if self.components() > 1 {
            for i in 0..self.components() {
                let suffix = format!("[{i}]");
                if let Some(text) = lookup(&suffix) {
                    if !self.apply_component(i, &text) {
                        rejected.push(suffix);
                    }
                }
            }
        }

        rejected
    }

    fn apply_text(&mut self, text: &str) -> bool {
        fn parse_all<T: Component>(text: &str) -> Option<Vec<T>> {
            text.split(',').map(T::parse_component).collect()
        }
        match &mut self.data {
            ParamData::Float(r) => parse_all(text).map(|v| r.set(&v)).is_some(),
            ParamData::Int(r) => parse_all(text).map(|v| r.set(&v)).is_some(),
            ParamData::Uint(r) => parse_all(text).map(|v| r.set(&v)).is_some(),
            ParamData::Bool { value, .. } => parse_bool(text).map(|b| *value = b).is_some(),
        }
    }

    fn apply_component(&mut self, index: usize, text: &str) -> bool {
        fn apply<T: Component>(r: &mut Ranged<T>, index: usize, text: &str) -> bool {
            let Some(v) = T::parse_component(text) else {
                return false;
            };
            let v = r.clamp(v);
            match r.value.get_mut(index) {
                Some(slot) => {
                    *slot = v;
                    true
                }
                None => false,
            }
        }
        match &mut self.data {
            ParamData::Float(r) => apply(r, index, text),
            ParamData::Int(r) => apply(r, index, text),
            ParamData::Uint(r) => apply(r, index, text),
            ParamData::Bool { .. } => false,
        }
    }

    /// Append this parameter's value to a push-constant block. Floats are
    /// written as `f32`, ints as `i32`, uints and bools as `u32`.
    pub fn write_push_constants(&self, out: &mut Vec<u8>) {
        match &self.data {
            ParamData::Float(r) => out.extend_from_slice(bytemuck::cast_slice(&r.value)),
            ParamData::Int(r) => out.extend_from_slice(bytemuck::cast_slice(&r.value)),
            ParamData::Uint(r) => out.extend_from_slice(bytemuck::cast_slice(&r.value)),
            ParamData::Bool { value, .. } => {
                out.extend_from_slice(bytemuck::bytes_of(&u32::from(*value)))
            }
        }
    }
}

/// Pack a whole parameter list in order.
pub fn pack_push_constants(params: &[Parameter]) -> Vec<u8> {
    let mut out = Vec::new();
    for param in params {
        param.write_push_constants(&mut out);
    }
    out
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A value coming from the overlay or a config override.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Floats(Vec<f32>),
    Ints(Vec<i32>),
    Uints(Vec<u32>),
    Bool(bool),
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Floats(vec![v])
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Ints(vec![v])
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Uints(vec![v])
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl<const N: usize> From<[f32; N]> for ParamValue {
    fn from(v: [f32; N]) -> Self {
        ParamValue::Floats(v.to_vec())
    }
}

impl<const N: usize> From<[i32; N]> for ParamValue {
    fn from(v: [i32; N]) -> Self {
        ParamValue::Ints(v.to_vec())
    }
}
