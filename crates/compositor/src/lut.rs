//! Reading `.cube` 3D lookup tables for the `lut` effect.

use std::path::Path;

use crate::errors::StageError;

/// A `size`³ table with RGBA texels, red varying fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeLut {
    pub size: u32,
    pub rgba: Vec<f32>,
}

const MAX_SIZE: u32 = 256;

pub fn load_cube(path: &Path) -> Result<CubeLut, StageError> {
    let invalid = |reason: String| StageError::InvalidLut {
        path: path.to_owned(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    parse_cube(&text).map_err(invalid)
}

pub fn parse_cube(text: &str) -> Result<CubeLut, String> {
    let mut size = None;
    let mut rgba = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            continue;
        };
        match first {
            "TITLE" | "DOMAIN_MIN" | "DOMAIN_MAX" => {}
            "LUT_1D_SIZE" => return Err("1D lookup tables are not supported".to_owned()),
            "LUT_3D_SIZE" => {
                let n: u32 = words
                    .next()
                    .and_then(|w| w.parse().ok())
                    .ok_or_else(|| format!("line {}: invalid LUT_3D_SIZE", i + 1))?;
                if !(2..=MAX_SIZE).contains(&n) {
                    return Err(format!("LUT_3D_SIZE {n} is outside 2..={MAX_SIZE}"));
                }
                size = Some(n);
            }
            _ => {
                let rgb: Option<Vec<f32>> = line
                    .split_whitespace()
                    .map(|w| w.parse().ok())
                    .collect();
                match rgb.as_deref() {
                    Some(&[r, g, b]) => rgba.extend_from_slice(&[r, g, b, 1.0]),
                    _ => return Err(format!("line {}: expected three numbers", i + 1)),
                }
            }
        }
    }

    let size = size.ok_or("missing LUT_3D_SIZE")?;
    let expected = (size as usize).pow(3);
    let found = rgba.len() / 4;
    if found != expected {
        return Err(format!("expected {expected} entries, found {found}"));
    }
    Ok(CubeLut { size, rgba })
}
