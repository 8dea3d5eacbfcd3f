//! Binary entry point for the `hetzner-machine` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use hetzner_machine::{
    ConfigError, Driver, DriverError, DriverState, HetznerConfig, HetznerDriver, MachineStore,
    StoreError,
};

mod cli;

use cli::{Cli, Command, CreateCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let store = match cli.store_path {
        Some(root) => MachineStore::new(root),
        None => MachineStore::default_root()?,
    };
    let name = cli.command.machine_name().to_owned();

    let mut config = HetznerConfig::load_without_cli_args()?;
    if let Command::Create(args) = &cli.command {
        apply_overrides(&mut config, args);
    }

    let state = store
        .load(&name)?
        .unwrap_or_else(|| DriverState::new(name.as_str()));
    let mut driver = HetznerDriver::from_config(config, &name, &store)?.with_driver_state(state);
    cancel_on_ctrl_c(&driver);

    let outcome = execute(&mut driver, &cli.command).await;
    if matches!(cli.command, Command::Create(_) | Command::Remove(_)) {
        let path = store.save(driver.driver_state())?;
        debug!(path = %path, "persisted driver state");
    }
    if let Some(line) = outcome? {
        writeln!(io::stdout(), "{line}")?;
    }
    Ok(())
}

fn apply_overrides(config: &mut HetznerConfig, args: &CreateCommand) {
    if let Some(image) = &args.image {
        config.image.clone_from(image);
    }
    if let Some(location) = &args.location {
        config.location.clone_from(location);
    }
    if let Some(server_type) = &args.server_type {
        config.server_type.clone_from(server_type);
    }
}

fn cancel_on_ctrl_c(driver: &HetznerDriver) {
    let token = driver.wait_context().cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling wait");
            token.cancel();
        }
    });
}

async fn execute<D: Driver>(driver: &mut D, command: &Command) -> Result<Option<String>, D::Error> {
    let output = match command {
        Command::Create(_) => {
            driver.pre_create_check()?;
            driver.create().await?;
            None
        }
        Command::Start(_) => {
            driver.start().await?;
            None
        }
        Command::Stop(_) => {
            driver.stop().await?;
            None
        }
        Command::Restart(_) => {
            driver.restart().await?;
            None
        }
        Command::Kill(_) => {
            driver.kill().await?;
            None
        }
        Command::Remove(_) => {
            driver.remove().await?;
            None
        }
        Command::State(_) => Some(driver.state().await?.to_string()),
        Command::Ip(_) => Some(driver.ip().await?.to_string()),
        Command::Url(_) => Some(driver.url().await?),
    };
    Ok(output)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
