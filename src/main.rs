//! Binary entry point for the Ferry CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use ferry::{
    Bundle, Deployment, DeploymentConfig, DeploymentError, DeploymentRequest, DeploymentState,
    KeyPairConfig, KeyPairError, KeyPairState, LocalArtifactStore, LocalKeyPair,
    ProcessCommandRunner, ProxyTarget, RemoteConfig, RemoteError, RemoteExecutor, Resource,
    StateFile, StateStoreError,
};

mod cli;

use cli::{Cli, DeployCommand, StateArgs};

const LOG_ENV_VAR: &str = "FERRY_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no state recorded in {0}")]
    MissingState(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    KeyPair(#[from] KeyPairError),
    #[error(transparent)]
    State(#[from] StateStoreError),
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
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Deploy(command) => deploy(&command).await,
        Cli::Status(args) => status(&args).await,
        Cli::Destroy(args) => destroy(&args).await,
        Cli::Keygen(args) => keygen(&args).await,
        Cli::Keydel(args) => keydel(&args).await,
    }
}

fn deployment() -> Result<Deployment<ProcessCommandRunner, LocalArtifactStore>, CliError> {
    let remote_config =
        RemoteConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let deploy_config = DeploymentConfig::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let executor = RemoteExecutor::with_process_runner(remote_config)?;
    Ok(Deployment::new(
        deploy_config,
        executor,
        LocalArtifactStore::new("."),
    )?)
}

fn key_pairs() -> Result<LocalKeyPair<ProcessCommandRunner>, CliError> {
    let config =
        KeyPairConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    Ok(LocalKeyPair::with_process_runner(config)?)
}

fn request_from(command: &DeployCommand) -> DeploymentRequest {
    let request = DeploymentRequest::new(
        Bundle::new(command.bundle.clone()),
        command.address.clone(),
        command.key.clone(),
    );
    match (&command.proxy_address, &command.proxy_key) {
        (Some(address), Some(key)) => request.via(ProxyTarget::new(address.clone(), key.clone())),
        _ => request,
    }
}

fn require_state<T>(file: &StateFile, state: Option<T>) -> Result<T, CliError> {
    state.ok_or_else(|| CliError::MissingState(file.path().to_string()))
}

async fn deploy(command: &DeployCommand) -> Result<(), CliError> {
    let file = StateFile::new(command.state.state.clone());
    let previous: Option<DeploymentState> = file.load()?;
    let driver = deployment()?;
    let request = request_from(command);

    let next = match previous {
        Some(state) => driver.update(&state, &request).await?,
        None => driver.create(&request).await?,
    };
    file.save(&next)?;
    writeln!(
        io::stdout(),
        "{} running {}",
        next.address, next.payload_fingerprint
    )
    .ok();
    Ok(())
}

async fn status(args: &StateArgs) -> Result<(), CliError> {
    let file = StateFile::new(args.state.clone());
    let state: DeploymentState = require_state(&file, file.load()?)?;
    let report = deployment()?.status(&state).await?;
    write!(io::stdout(), "{report}").ok();
    Ok(())
}

async fn destroy(args: &StateArgs) -> Result<(), CliError> {
    let file = StateFile::new(args.state.clone());
    let Some(state) = file.load::<DeploymentState>()? else {
        tracing::info!(path = %file.path(), "no deployment recorded; nothing to destroy");
        return Ok(());
    };
    deployment()?.delete(&state).await?;
    file.clear()?;
    Ok(())
}

async fn keygen(args: &StateArgs) -> Result<(), CliError> {
    let file = StateFile::new(args.state.clone());
    let keys = key_pairs()?;
    let next = match file.load::<KeyPairState>()? {
        Some(state) => keys.update(&state, &()).await?,
        None => keys.create(&()).await?,
    };
    file.save(&next)?;
    writeln!(io::stdout(), "{}", next.private_key_path).ok();
    Ok(())
}

async fn keydel(args: &StateArgs) -> Result<(), CliError> {
    let file = StateFile::new(args.state.clone());
    let Some(state) = file.load::<KeyPairState>()? else {
        return Ok(());
    };
    key_pairs()?.delete(&state).await?;
    file.clear()?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
