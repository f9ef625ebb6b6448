//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod images;
mod pipeline;
mod version;

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, PipelineConfig};
use crate::export::ErrorKind;
use crate::storage::Storage;

pub use version::VersionAction;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Spriteforge - turn generated frames into game-ready spritesheets
#[derive(Parser)]
#[command(name = "sforge")]
#[command(about = "Spriteforge - assemble generated frames into spritesheets with Aseprite metadata")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: nearest forge.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage root, overriding [storage] root
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Export flags shared by `export` and `bundle`.
#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Normalize frames onto the configured canvas
    #[arg(long)]
    pub normalize: bool,

    /// Remove the background before writing
    #[arg(long)]
    pub remove_background: bool,

    /// Background removal mode: spritesheet or per-frame
    #[arg(long)]
    pub mode: Option<String>,

    /// Alpha threshold (0-255); pixels at or below become transparent
    #[arg(long)]
    pub alpha_threshold: Option<f64>,

    /// Normalization anchor override (bottom-center, center, ...)
    #[arg(long)]
    pub anchor: Option<String>,

    /// Normalization scale override in (0, 1]
    #[arg(long)]
    pub scale: Option<f64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the grid layout for a frame count and size
    Layout {
        /// Number of frames
        #[arg(long)]
        frames: usize,

        /// Frame width in pixels
        #[arg(long)]
        frame_width: u32,

        /// Frame height in pixels (default: frame width)
        #[arg(long)]
        frame_height: Option<u32>,

        /// Columns (default: ceil(sqrt(frames)))
        #[arg(long)]
        columns: Option<u32>,
    },

    /// Pack a directory of frame_NNN.png files into a spritesheet
    Compose {
        /// Directory containing the frames
        frames_dir: PathBuf,

        /// Output PNG
        #[arg(short, long)]
        output: PathBuf,

        /// Columns (default: ceil(sqrt(frames)))
        #[arg(long)]
        columns: Option<u32>,

        /// Also write Aseprite array/hash JSON next to the output
        #[arg(long)]
        metadata: bool,

        /// Frame rate recorded in the metadata
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Slice a spritesheet into frame_NNN.png files
    Extract {
        /// Spritesheet PNG
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Frame width in pixels
        #[arg(long)]
        frame_width: Option<u32>,

        /// Frame height in pixels
        #[arg(long)]
        frame_height: Option<u32>,

        /// Number of frames to extract
        #[arg(long)]
        frames: Option<usize>,
    },

    /// Make pixels near the key color transparent
    Key {
        /// Input image
        input: PathBuf,

        /// Output PNG
        #[arg(short, long)]
        output: PathBuf,

        /// Key color as hex (default: [chroma] key_color)
        #[arg(long)]
        color: Option<String>,

        /// Per-channel tolerance (default: [chroma] tolerance)
        #[arg(long)]
        tolerance: Option<u8>,
    },

    /// Hard-clip alpha: at or below the threshold becomes 0, above becomes 255
    Clamp {
        /// Input image
        input: PathBuf,

        /// Output PNG
        #[arg(short, long)]
        output: PathBuf,

        /// Alpha threshold (0-255)
        #[arg(long)]
        threshold: f64,
    },

    /// Redraw a directory of frames onto a fixed canvas
    Normalize {
        /// Directory containing the frames
        frames_dir: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Canvas width (default: [canvas] width)
        #[arg(long)]
        width: Option<u32>,

        /// Canvas height (default: [canvas] height)
        #[arg(long)]
        height: Option<u32>,

        /// Anchor (default: [canvas] anchor)
        #[arg(long)]
        anchor: Option<String>,

        /// Scale in (0, 1] (default: [canvas] scale)
        #[arg(long)]
        scale: Option<f64>,

        /// Fit each frame to its own bounds instead of the shared union
        #[arg(long)]
        per_frame_bounds: bool,
    },

    /// Re-sequence and re-key an animation's raw frames
    Rebuild {
        /// Animation id
        animation: String,
    },

    /// Export an animation's spritesheet, metadata and frames
    Export {
        /// Animation id
        animation: String,

        #[command(flatten)]
        options: ExportArgs,

        /// Also write export_<id>.zip
        #[arg(long)]
        zip: bool,

        /// Print the export record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage version snapshots
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },

    /// Export several animations into one zip
    Bundle {
        /// Animation ids
        animations: Vec<String>,

        /// Bundle every stored animation
        #[arg(long, conflicts_with = "animations")]
        all: bool,

        /// Archive base name
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        options: ExportArgs,

        /// Print per-animation results as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Resolved configuration and storage for pipeline commands.
pub(crate) struct Context {
    pub config: PipelineConfig,
    pub storage: Storage,
}

impl Context {
    fn load(config_path: Option<&Path>, storage_root: Option<&Path>) -> Result<Self, String> {
        let mut config = load_config(config_path).map_err(|e| e.to_string())?;
        if let Some(root) = storage_root {
            config.storage.root = root.to_path_buf();
        }
        let storage = Storage::from_config(&config.storage);
        Ok(Self { config, storage })
    }
}

/// Exit code for a pipeline error kind.
pub(crate) fn exit_for(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::InvalidInput => ExitCode::from(EXIT_INVALID_ARGS),
        ErrorKind::NotFound | ErrorKind::Internal => ExitCode::from(EXIT_ERROR),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (tests, embedding) keeps the existing subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Entry point for the CLI.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let context = || Context::load(cli.config.as_deref(), cli.storage.as_deref());
    let with_context = |f: &dyn Fn(&Context) -> ExitCode| match context() {
        Ok(ctx) => f(&ctx),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    };

    match cli.command {
        Commands::Layout { frames, frame_width, frame_height, columns } => {
            images::run_layout(frames, frame_width, frame_height, columns)
        }
        Commands::Compose { ref frames_dir, ref output, columns, metadata, fps } => with_context(&|ctx| {
            images::run_compose(ctx, frames_dir, output, columns, metadata, fps)
        }),
        Commands::Extract { ref input, ref output, frame_width, frame_height, frames } => {
            images::run_extract(input, output, frame_width, frame_height, frames)
        }
        Commands::Key { ref input, ref output, ref color, tolerance } => {
            with_context(&|ctx| images::run_key(ctx, input, output, color.as_deref(), tolerance))
        }
        Commands::Clamp { ref input, ref output, threshold } => images::run_clamp(input, output, threshold),
        Commands::Normalize {
            ref frames_dir,
            ref output,
            width,
            height,
            ref anchor,
            scale,
            per_frame_bounds,
        } => with_context(&|ctx| {
            images::run_normalize(
                ctx,
                frames_dir,
                output,
                width,
                height,
                anchor.as_deref(),
                scale,
                per_frame_bounds,
            )
        }),
        Commands::Rebuild { ref animation } => with_context(&|ctx| pipeline::run_rebuild(ctx, animation)),
        Commands::Export { ref animation, ref options, zip, json } => {
            with_context(&|ctx| pipeline::run_export(ctx, animation, options, zip, json))
        }
        Commands::Version { ref action } => with_context(&|ctx| version::run_version(ctx, action)),
        Commands::Bundle { ref animations, all, ref name, ref options, json } => with_context(&|ctx| {
            pipeline::run_bundle(ctx, animations, all, name.as_deref(), options, json)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_export_flags() {
        let cli = Cli::try_parse_from([
            "sforge",
            "export",
            "anim-1",
            "--remove-background",
            "--mode",
            "per-frame",
            "--alpha-threshold",
            "32",
            "--zip",
        ])
        .unwrap();
        match cli.command {
            Commands::Export { animation, options, zip, .. } => {
                assert_eq!(animation, "anim-1");
                assert!(options.remove_background);
                assert_eq!(options.mode.as_deref(), Some("per-frame"));
                assert_eq!(options.alpha_threshold, Some(32.0));
                assert!(zip);
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sforge", "rebuild", "a1", "--storage", "/tmp/s", "-vv"]).unwrap();
        assert_eq!(cli.storage, Some(PathBuf::from("/tmp/s")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_for(ErrorKind::InvalidInput), ExitCode::from(EXIT_INVALID_ARGS));
        assert_eq!(exit_for(ErrorKind::NotFound), ExitCode::from(EXIT_ERROR));
    }
}
