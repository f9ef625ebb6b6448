//! Storage-backed commands: rebuild, export and bundle.

use std::process::ExitCode;

use crate::alpha::clamp_alpha_threshold;
use crate::bundle::{export_batch, BatchRequest, BundleError};
use crate::cancel::CancelToken;
use crate::export::{self, ExportOptions};
use crate::normalize::Anchor;
use crate::rebuild::rebuild_from_raw;

use super::{exit_for, Context, ExportArgs, EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};

/// Turn command-line flags into export options.
pub(crate) fn export_options(args: &ExportArgs, zip_bundle: bool) -> Result<ExportOptions, String> {
    let background_removal_mode =
        ExportOptions::parse_mode(args.remove_background, args.mode.as_deref()).map_err(|e| e.to_string())?;

    let alpha_threshold = match args.alpha_threshold {
        Some(value) => Some(
            clamp_alpha_threshold(value).ok_or_else(|| format!("invalid alpha threshold '{}'", value))?,
        ),
        None => None,
    };

    let anchor = args.anchor.as_deref().map(str::parse::<Anchor>).transpose()?;

    Ok(ExportOptions {
        normalize: args.normalize,
        remove_background: args.remove_background,
        background_removal_mode,
        alpha_threshold,
        anchor,
        scale: args.scale,
        zip_bundle,
    })
}

pub fn run_rebuild(ctx: &Context, animation_id: &str) -> ExitCode {
    match rebuild_from_raw(&ctx.storage, &ctx.config, animation_id, &CancelToken::new()) {
        Ok(animation) => {
            println!(
                "Rebuilt '{}': {} frames -> {}",
                animation.name,
                animation.generated_frames.len(),
                animation.generated_spritesheet.as_deref().unwrap_or("")
            );
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_for(e.kind())
        }
    }
}

pub fn run_export(ctx: &Context, animation_id: &str, args: &ExportArgs, zip: bool, json: bool) -> ExitCode {
    let options = match export_options(args, zip) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let outcome = match export::run_export(&ctx.storage, &ctx.config, animation_id, &options, &CancelToken::new()) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_for(e.kind());
        }
    };

    if json {
        match serde_json::to_string_pretty(&outcome.animation.exports) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    } else {
        let artifacts = &outcome.artifacts;
        println!("Exported '{}' to {}", outcome.animation.name, artifacts.export_dir.display());
        println!("  spritesheet: {}", artifacts.spritesheet_filename);
        println!("  frames:      {}", outcome.aseprite.array.frames.len());
        if artifacts.normalized {
            println!("  normalized:  yes");
        } else if options.normalize {
            println!("  normalized:  no (fell back to original)");
        }
        if artifacts.background_removed {
            println!("  background:  removed ({})", artifacts.background_removal_mode);
        }
        if let Some(threshold) = artifacts.alpha_threshold {
            println!("  alpha:       clamped at {}", threshold);
        }
        if let Some(zip) = &artifacts.zip_path {
            println!("  zip:         {}", zip.display());
        }
    }
    ExitCode::from(EXIT_SUCCESS)
}

pub fn run_bundle(
    ctx: &Context,
    animations: &[String],
    all: bool,
    name: Option<&str>,
    args: &ExportArgs,
    json: bool,
) -> ExitCode {
    let options = match export_options(args, false) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let animation_ids = if all {
        match ctx.storage.list_animations() {
            Ok(ids) => ids,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    } else {
        animations.to_vec()
    };

    let request = BatchRequest { animation_ids, name: name.map(str::to_string), options };
    match export_batch(&ctx.storage, &ctx.config, &request, &CancelToken::new()) {
        Ok(outcome) => {
            if json {
                match serde_json::to_string_pretty(&outcome.results) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        return ExitCode::from(EXIT_ERROR);
                    }
                }
            } else {
                for result in &outcome.results {
                    match &result.error {
                        None => println!("  ok      {} ({})", result.name, result.animation_id),
                        Some(error) => println!("  failed  {} ({}): {}", result.name, result.animation_id, error),
                    }
                }
                println!(
                    "Bundled {} of {} animations -> {}",
                    outcome.exported,
                    outcome.exported + outcome.failed,
                    outcome.archive_path.display()
                );
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(BundleError::NoSuccessfulExports(results)) => {
            eprintln!("Error: No animations could be exported.");
            for result in results {
                eprintln!("  {}: {}", result.animation_id, result.error.unwrap_or_default());
            }
            ExitCode::from(EXIT_ERROR)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_for(e.kind())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackgroundRemovalMode;

    #[test]
    fn test_export_options_from_flags() {
        let args = ExportArgs {
            remove_background: true,
            mode: Some("frames".into()),
            alpha_threshold: Some(300.0),
            anchor: Some("center".into()),
            ..Default::default()
        };
        let options = export_options(&args, true).unwrap();
        assert_eq!(options.background_removal_mode, BackgroundRemovalMode::PerFrame);
        assert_eq!(options.alpha_threshold, Some(255));
        assert_eq!(options.anchor, Some(Anchor::Center));
        assert!(options.zip_bundle);
    }

    #[test]
    fn test_export_options_rejects_bad_values() {
        let bad_mode = ExportArgs { remove_background: true, mode: Some("sideways".into()), ..Default::default() };
        assert!(export_options(&bad_mode, false).is_err());

        let bad_threshold = ExportArgs { alpha_threshold: Some(f64::NAN), ..Default::default() };
        assert!(export_options(&bad_threshold, false).is_err());

        let ignored_mode = ExportArgs { mode: Some("sideways".into()), ..Default::default() };
        assert!(export_options(&ignored_mode, false).is_ok());
    }
}
