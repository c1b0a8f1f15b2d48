use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use kbfs_lib::cli::commands::Cli;
use kbfs_lib::{FuseBridge, MountContext, PassthroughOps};
use log::{error, info};
use nix::sys::stat::{umask, Mode};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

fn main() -> Result<()> {
    // Usage errors exit here, before anything touches the disk
    let cli = Cli::parse();

    // Initialize logger with specified or default log level
    let env = match cli.log_level {
        Some(ref log_level) => Env::default().filter_or("RUST_LOG", log_level),
        None => Env::default().filter_or("RUST_LOG", "info"),
    };
    env_logger::init_from_env(env);

    cmd_mount(&cli.mount_point, cli.allow_other, cli.unmount_on_exit)
}

/// Mount the passthrough filesystem at `mount_point`
fn cmd_mount(mount_point: &Path, allow_other: bool, unmount_on_exit: bool) -> Result<()> {
    let ctx = MountContext::init(mount_point)
        .with_context(|| format!("Failed to prepare mount at {:?}", mount_point))?;

    // Created files get exactly the mode the client asked for
    umask(Mode::empty());

    let mount_point = ctx.mount_point().to_path_buf();
    let backing_root = ctx.backing_root().to_path_buf();

    if unmount_on_exit {
        info!("Will unmount filesystem on exit");

        let mp_for_handler = mount_point.clone();
        ctrlc::set_handler(move || {
            info!("Received interrupt signal, unmounting filesystem");
            match Command::new("fusermount")
                .arg("-u")
                .arg(&mp_for_handler)
                .status()
            {
                Ok(status) if status.success() => {
                    info!("Successfully unmounted filesystem")
                }
                Ok(status) => error!("Failed to unmount filesystem, exit code: {}", status),
                Err(e) => error!("Failed to execute unmount command: {}", e),
            }
            std::process::exit(0);
        })
        .context("Error setting signal handler")?;
    }

    println!("✓ Mounting '{}'", mount_point.display());
    println!("  Backing directory: {}", backing_root.display());
    if unmount_on_exit {
        println!("  Ctrl+C to unmount");
    }

    let options = FuseBridge::<PassthroughOps>::mount_options(allow_other);
    FuseBridge::new(PassthroughOps::new(Arc::new(ctx)))
        .mount(&mount_point, &options)
        .with_context(|| format!("Failed to mount filesystem at {:?}", mount_point))?;

    info!("Filesystem at {:?} unmounted", mount_point);
    Ok(())
}
