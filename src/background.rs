//! Background removal backends.
//!
//! The export pipeline only sees [`BackgroundRemover`]. The in-process
//! [`ChromaKeyRemover`] keys out a solid color; [`CommandRemover`] hands the
//! image to an external tool through temporary files and fails hard on a
//! non-zero exit or a timeout.

use image::RgbaImage;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::chroma::ChromaKey;
use crate::config::{BackgroundConfig, PipelineConfig, RemoverKind};
use crate::frames::{frame_filename, list_frame_files, load_rgba, save_png, write_frames, FrameError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Error type for background removal
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackgroundError {
    /// The remover process could not be started
    #[error("Failed to start background remover '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The remover exited unsuccessfully
    #[error("Background removal failed ({program}): {details}")]
    Failed { program: String, details: String },
    /// The remover ran past its deadline and was killed
    #[error("Background removal timed out after {0}ms.")]
    TimedOut(u64),
    /// The remover produced the wrong number of frames
    #[error("Background remover returned {found} frames, expected {expected}")]
    FrameCount { expected: usize, found: usize },
    /// No command configured
    #[error("No background removal command configured")]
    NoCommand,
    /// Temporary file handling failed
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Removes the background of an image, leaving the subject on transparency.
pub trait BackgroundRemover: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn remove(&self, image: &RgbaImage) -> Result<RgbaImage, BackgroundError>;

    /// Remove the background of each frame independently.
    fn remove_each(&self, frames: &[RgbaImage]) -> Result<Vec<RgbaImage>, BackgroundError> {
        frames.iter().map(|frame| self.remove(frame)).collect()
    }
}

/// Chroma-key background removal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromaKeyRemover {
    pub key: ChromaKey,
}

impl ChromaKeyRemover {
    pub fn new(key: ChromaKey) -> Self {
        Self { key }
    }
}

impl BackgroundRemover for ChromaKeyRemover {
    fn name(&self) -> &str {
        "chroma"
    }

    fn remove(&self, image: &RgbaImage) -> Result<RgbaImage, BackgroundError> {
        Ok(self.key.keyed(image))
    }
}

/// Runs an external tool as `<command...> --input <in> --output <out> [options]`.
///
/// Input and output may be single PNG files or directories of frames.
#[derive(Debug, Clone)]
pub struct CommandRemover {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub model: Option<String>,
    pub color_tolerance: Option<u32>,
    pub no_post_process: bool,
}

impl CommandRemover {
    pub fn from_config(config: &BackgroundConfig) -> Result<Self, BackgroundError> {
        let (program, args) = config.command.split_first().ok_or(BackgroundError::NoCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_millis(config.timeout_ms),
            model: config.model.clone(),
            color_tolerance: config.color_tolerance,
            no_post_process: config.no_post_process,
        })
    }

    fn command_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--input".to_string());
        args.push(input.display().to_string());
        args.push("--output".to_string());
        args.push(output.display().to_string());
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if self.no_post_process {
            args.push("--no-post-process".to_string());
        }
        if let Some(tolerance) = self.color_tolerance {
            args.push("--color-tolerance".to_string());
            args.push(tolerance.to_string());
        }
        args
    }

    /// Run the tool once over `input`, writing to `output`.
    pub fn run(&self, input: &Path, output: &Path) -> Result<(), BackgroundError> {
        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(self.command_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BackgroundError::Spawn { program: self.program.clone(), source })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_with_deadline(&mut child, started + self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::error!(program = %self.program, timeout_ms = self.timeout.as_millis() as u64, "background remover timed out");
                return Err(BackgroundError::TimedOut(self.timeout.as_millis() as u64));
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let details = [stderr.trim(), stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exit code {}", status.code().unwrap_or(-1)));
            return Err(BackgroundError::Failed { program: self.program.clone(), details });
        }

        tracing::debug!(
            program = %self.program,
            duration_ms = started.elapsed().as_millis() as u64,
            "background remover finished"
        );
        Ok(())
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
) -> Result<Option<std::process::ExitStatus>, BackgroundError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Scratch directory removed on drop.
struct Scratch(PathBuf);

impl Scratch {
    fn new() -> Result<Self, BackgroundError> {
        let dir = std::env::temp_dir().join(format!("sforge-bg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        Ok(Self(dir))
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

impl BackgroundRemover for CommandRemover {
    fn name(&self) -> &str {
        &self.program
    }

    fn remove(&self, image: &RgbaImage) -> Result<RgbaImage, BackgroundError> {
        let scratch = Scratch::new()?;
        let input = scratch.0.join("input.png");
        let output = scratch.0.join("output.png");
        save_png(image, &input)?;
        self.run(&input, &output)?;
        Ok(load_rgba(&output)?)
    }

    /// One process over a directory of frames.
    fn remove_each(&self, frames: &[RgbaImage]) -> Result<Vec<RgbaImage>, BackgroundError> {
        let scratch = Scratch::new()?;
        let input = scratch.0.join("input");
        let output = scratch.0.join("output");
        write_frames(frames, &input)?;
        self.run(&input, &output)?;

        let names = list_frame_files(&output)?;
        if names.len() != frames.len() {
            return Err(BackgroundError::FrameCount { expected: frames.len(), found: names.len() });
        }
        (0..frames.len())
            .map(|i| Ok(load_rgba(&output.join(frame_filename(i)))?))
            .collect()
    }
}

/// Build the remover selected by `[background] remover`.
pub fn remover_from_config(config: &PipelineConfig) -> Result<Box<dyn BackgroundRemover>, BackgroundError> {
    match config.background.remover {
        RemoverKind::Chroma => Ok(Box::new(ChromaKeyRemover::new(config.chroma.chroma_key()))),
        RemoverKind::Command => Ok(Box::new(CommandRemover::from_config(&config.background)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn command(program: &str, args: &[&str], timeout_ms: u64) -> CommandRemover {
        CommandRemover {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_millis(timeout_ms),
            model: None,
            color_tolerance: None,
            no_post_process: false,
        }
    }

    #[test]
    fn test_chroma_remover_keys_background() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([255, 0, 255, 255]));
        img.put_pixel(1, 0, Rgba([10, 10, 10, 255]));
        let out = ChromaKeyRemover::default().remove(&img).unwrap();
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(1, 0).0[3], 255);
    }

    #[test]
    fn test_command_args_layout() {
        let mut remover = command("python3", &["scripts/remove_bg.py"], 1000);
        remover.model = Some("isnet".into());
        remover.color_tolerance = Some(20);
        remover.no_post_process = true;

        let args = remover.command_args(Path::new("in.png"), Path::new("out.png"));
        assert_eq!(
            args,
            vec![
                "scripts/remove_bg.py",
                "--input",
                "in.png",
                "--output",
                "out.png",
                "--model",
                "isnet",
                "--no-post-process",
                "--color-tolerance",
                "20"
            ]
        );
    }

    #[test]
    fn test_from_config_requires_command() {
        let config = BackgroundConfig::default();
        assert!(matches!(CommandRemover::from_config(&config), Err(BackgroundError::NoCommand)));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let remover = command("sforge-definitely-not-a-program", &[], 1000);
        let img = RgbaImage::new(1, 1);
        assert!(matches!(remover.remove(&img), Err(BackgroundError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure_with_stderr() {
        let remover = command("sh", &["-c", "echo broken model >&2; exit 3", "sh"], 5000);
        let err = remover.remove(&RgbaImage::new(1, 1)).unwrap_err();
        match err {
            BackgroundError::Failed { details, .. } => assert_eq!(details, "broken model"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_process() {
        let remover = command("sh", &["-c", "sleep 5", "sh"], 100);
        let started = Instant::now();
        let err = remover.remove(&RgbaImage::new(1, 1)).unwrap_err();
        assert!(matches!(err, BackgroundError::TimedOut(100)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_copy_round_trip() {
        // Copies --input to --output: args are `--input IN --output OUT`, so $2 and $4.
        let remover = command("sh", &["-c", "cp -r \"$2\" \"$4\"", "sh"], 5000);
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        assert_eq!(remover.remove(&img).unwrap(), img);
    }
}
