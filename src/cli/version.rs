//! CLI dispatch for the `sforge version` command.

use clap::Subcommand;
use std::process::ExitCode;

use crate::cancel::CancelToken;
use crate::models::VersionSource;
use crate::versions::{create_version, delete_version, list_versions, load_version, save_version};

use super::{exit_for, Context, EXIT_ERROR, EXIT_SUCCESS};

#[derive(Subcommand, Debug, Clone)]
pub enum VersionAction {
    /// List an animation's versions
    List {
        /// Animation id
        animation: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Snapshot the working state into a new version
    Create {
        /// Animation id
        animation: String,

        /// Version name (default: "Version N")
        #[arg(long)]
        name: Option<String>,

        /// Mark the version as produced by a generation run
        #[arg(long)]
        generation: bool,
    },
    /// Rename a version and overwrite it with the working state
    Save {
        /// Animation id
        animation: String,

        /// Version id
        version: String,

        /// New name
        #[arg(long)]
        name: Option<String>,
    },
    /// Restore a version into the working state
    Load {
        /// Animation id
        animation: String,

        /// Version id
        version: String,
    },
    /// Delete a version
    Delete {
        /// Animation id
        animation: String,

        /// Version id
        version: String,
    },
}

pub fn run_version(ctx: &Context, action: &VersionAction) -> ExitCode {
    let storage = &ctx.storage;
    let cancel = CancelToken::new();

    let result = match action {
        VersionAction::List { animation, json } => {
            return match list_versions(storage, animation) {
                Ok((versions, active)) => print_list(&versions, active.as_deref(), *json),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit_for(e.kind())
                }
            };
        }
        VersionAction::Create { animation, name, generation } => {
            let source = if *generation { VersionSource::Generation } else { VersionSource::Manual };
            create_version(storage, animation, name.as_deref(), source, &cancel)
                .map(|(_, v)| format!("Created version '{}' ({})", v.name, v.id))
        }
        VersionAction::Save { animation, version, name } => save_version(storage, animation, version, name.as_deref(), &cancel)
            .map(|(_, v)| format!("Saved version '{}' ({})", v.name, v.id)),
        VersionAction::Load { animation, version } => load_version(storage, animation, version, &cancel)
            .map(|a| format!("Loaded version {} into '{}'", version, a.name)),
        VersionAction::Delete { animation, version } => delete_version(storage, animation, version).map(|a| {
            format!(
                "Deleted version {}; active: {}",
                version,
                a.active_version_id.as_deref().unwrap_or("none")
            )
        }),
    };

    match result {
        Ok(message) => {
            println!("{}", message);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_for(e.kind())
        }
    }
}

fn print_list(versions: &[crate::models::AnimationVersion], active: Option<&str>, json: bool) -> ExitCode {
    if json {
        let value = serde_json::json!({ "versions": versions, "activeVersionId": active });
        return match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::from(EXIT_SUCCESS)
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::from(EXIT_ERROR)
            }
        };
    }

    if versions.is_empty() {
        println!("No versions.");
    }
    for version in versions {
        let marker = if Some(version.id.as_str()) == active { "*" } else { " " };
        println!(
            "{} {}  {}  {}",
            marker,
            version.id,
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            version.name
        );
    }
    ExitCode::from(EXIT_SUCCESS)
}
