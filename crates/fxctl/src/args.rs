//! Contains [Args], which are parsed command-line flags.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use compositor::device::{Extent, Format};

/// Parsed command line arguments.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Inspects effect chains for the fxlayer compositor.")]
pub struct Args {
    /// Log everything, including debug output.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Default for Args {
    fn default() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the built-in effects and their parameters.
    Effects {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Load a config and print the stages a swapchain would get.
    Check(CheckArgs),

    /// Print where config files are looked for, in order.
    Paths,
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct CheckArgs {
    /// The config file to load. Without it the same search the layer does is
    /// used.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of presentable images.
    #[arg(long, default_value_t = 3)]
    pub images: u32,

    /// Swapchain size as `WIDTHxHEIGHT`.
    #[arg(long, default_value = "1920x1080", value_parser = parse_extent)]
    pub extent: Extent,

    /// Swapchain format, e.g. `bgra8srgb` or `rgba16float`.
    #[arg(long, default_value = "bgra8srgb", value_parser = parse_format)]
    pub format: Format,

    /// Plan for a device that can't alias presentable images, so the last
    /// effect is followed by a copy.
    #[arg(long)]
    pub no_mutable_format: bool,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

fn parse_extent(s: &str) -> Result<Extent, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let dim = |v: &str| {
        v.trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("'{v}' isn't a valid size"))
    };
    Ok(Extent::new(dim(w)?, dim(h)?))
}

fn parse_format(s: &str) -> Result<Format, String> {
    Format::parse(s).ok_or_else(|| format!("unknown format '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_has_sensible_defaults() {
        let args = Args::try_parse_from(["fxctl", "check"]).unwrap();
        let Command::Check(check) = args.command else {
            panic!("expected check");
        };
        assert_eq!(check.images, 3);
        assert_eq!(check.extent, Extent::new(1920, 1080));
        assert_eq!(check.format, Format::Bgra8Srgb);
        assert!(!check.no_mutable_format);
    }

    #[test]
    fn extents_are_validated() {
        assert_eq!(parse_extent("640x480"), Ok(Extent::new(640, 480)));
        assert!(parse_extent("640").is_err());
        assert!(parse_extent("0x480").is_err());
        assert!(Args::try_parse_from(["fxctl", "check", "--extent", "wide"]).is_err());
    }
}
