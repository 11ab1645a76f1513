use std::path::PathBuf;

use clap::Parser;

use crate::media::FacingMode;

/// Command line configuration for a headless monitoring run.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Directory of still images replayed as the camera feed.
    /// `user/` and `environment/` subdirectories select per facing mode.
    #[arg(long)]
    pub frames: PathBuf,
    /// JSON script of detections answered by the replay model.
    #[arg(long)]
    pub script: PathBuf,
    /// Optional settings file (JSON); missing keys keep their defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration_secs: Option<u64>,
    /// Write the remaining captures here on exit.
    #[arg(long)]
    pub export_dir: Option<PathBuf>,
    /// Start with the alarm disabled.
    #[arg(long, default_value_t = false)]
    pub no_alarm: bool,
    /// Camera to open: `user` or `environment`.
    #[arg(long)]
    pub facing: Option<FacingMode>,
    /// How long each replayed image stays on screen.
    #[arg(long, default_value_t = 1000)]
    pub frame_period_ms: u64,
}
