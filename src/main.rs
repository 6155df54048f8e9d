use std::process::ExitCode;

use clap::Parser;
use fuser::MountOption;
use log::{error, info};

use amifuse::cli::Cli;
use amifuse::config::MountConfig;
use amifuse::AmifuseError;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config: MountConfig = cli.into();
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(config: MountConfig) -> Result<(), AmifuseError> {
    info!("booting handler {:?} against image {:?}", config.driver_path, config.image_path);
    let adapter = amifuse::prepare_mount(&config)?;

    let mut options = vec![MountOption::RO, MountOption::FSName("amifuse".to_string())];
    if !config.foreground {
        options.push(MountOption::AutoUnmount);
    }

    info!("mounting at {:?}", config.mountpoint);
    fuser::mount2(adapter, &config.mountpoint, &options).map_err(|e| AmifuseError::MountFailed(e.to_string()))?;
    Ok(())
}
