//! Rootbox - run a command inside a freshly prepared root filesystem

use clap::Parser;
use eyre::Result;
use nix::unistd::{geteuid, getuid};

use rootbox::cli::Args;
use rootbox::host::LinuxHost;
use rootbox::launcher::LaunchConfig;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    args.validate()?;

    // RUST_LOG takes precedence over --log-level
    if std::env::var("RUST_LOG").is_err() {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(&args.log_level),
        )
        .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default()).init();
    }

    log::info!("Starting rootbox");
    log::debug!("Real UID: {}, Effective UID: {}", getuid(), geteuid());
    if !geteuid().is_root() {
        log::warn!("Not running as root, mounting and chroot will likely fail");
    }

    let launch = LaunchConfig::from_args(&args)?;
    let code = launch.run(&mut LinuxHost)?;
    std::process::exit(code)
}
