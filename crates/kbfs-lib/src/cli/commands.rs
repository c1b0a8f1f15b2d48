use clap::Parser;
use std::path::PathBuf;

/// kbfs - mount a directory whose contents live under a fixed backing directory
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory to mount the filesystem on
    #[arg(value_name = "MOUNT_POINT")]
    pub mount_point: PathBuf,

    /// Optional log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Let users other than the mounting user access the filesystem
    #[arg(long)]
    pub allow_other: bool,

    /// Unmount the filesystem on Ctrl+C
    #[arg(long)]
    pub unmount_on_exit: bool,
}
