//! Mount a document store as a filesystem
//!
//! Usage:
//!   docmount <remote_dir> [mount_point]
//!
//! Example:
//!   docmount ~/Documents/store ~/docmount
//!
//! `remote_dir` is served through the local-directory store. Shadow files
//! and private entries live in the mirror directory (`--mirror-dir`, the
//! config file, or `~/docmount-mirror`).

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use docmount_core::Config;

#[derive(Parser)]
#[command(name = "docmount")]
#[command(about = "Mount a remote document store as a local filesystem")]
struct Cli {
    /// Directory served as the remote store
    remote_dir: PathBuf,

    /// Mount point (defaults to the config value, then ~/docmount)
    mount_point: Option<PathBuf>,

    /// Host directory for shadow files and private entries
    #[arg(long, env = "DOCMOUNT_MIRROR_DIR")]
    mirror_dir: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print a sample configuration file and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if cli.mirror_dir.is_some() {
        config.cache.mirror_dir = cli.mirror_dir.clone();
    }

    run(cli, config)
}

#[cfg(unix)]
fn run(cli: Cli, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use fuser::MountOption;
    use tokio::runtime::Runtime;
    use tokio::sync::oneshot;
    use tracing::{error, info};

    use docmount_daemon::{DocFs, HostMirror, LocalDirStore, Reaper, SyncController};

    let mount_point = cli
        .mount_point
        .or_else(|| config.mount.mount_point.clone())
        .or_else(|| directories::BaseDirs::new().map(|dirs| dirs.home_dir().join("docmount")))
        .ok_or("no mount point given and no home directory found")?;

    // Create mount point if it doesn't exist
    if !mount_point.exists() {
        std::fs::create_dir_all(&mount_point)?;
    }

    let remote = LocalDirStore::new(&cli.remote_dir)?;
    let mirror = HostMirror::new(config.mirror_dir())?;
    info!("Serving {:?}", remote.root());
    info!("Mirror directory: {:?}", mirror.root());
    info!("Mount point: {:?}", mount_point);

    let controller = Arc::new(SyncController::new(Arc::new(remote), mirror, &config));
    let reaper = Reaper::with_interval(
        controller.cache(),
        Duration::from_secs(config.cache.reap_interval_secs),
    );

    // Background reaper on its own runtime thread
    let rt = Runtime::new()?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let reaper_handle = thread::spawn(move || {
        rt.block_on(async move {
            tokio::select! {
                _ = reaper.run_loop() => {}
                _ = stop_rx => info!("Reaper stopped"),
            }
        });
    });

    let fs = DocFs::new(controller, Duration::from_secs(config.mount.attr_ttl_secs));

    let mut mount_options = vec![
        MountOption::FSName("docmount".to_string()),
        MountOption::AutoUnmount,
        MountOption::DefaultPermissions,
    ];
    if config.mount.allow_other {
        mount_options.push(MountOption::AllowOther);
    }

    // This blocks until unmounted
    info!("Mounting filesystem...");
    if let Err(e) = fuser::mount2(fs, &mount_point, &mount_options) {
        error!("Mount failed: {}", e);
        error!("Common issues:");
        error!("  1. FUSE not installed");
        error!("  2. allow_other set without user_allow_other in /etc/fuse.conf");
        error!("  3. Mount point busy - unmount first: umount {:?}", mount_point);
    }

    info!("Filesystem unmounted");

    let _ = stop_tx.send(());
    let _ = reaper_handle.join();

    Ok(())
}

#[cfg(not(unix))]
fn run(_cli: Cli, _config: Config) -> Result<(), Box<dyn std::error::Error>> {
    Err("docmount requires FUSE, which is only available on Unix".into())
}
