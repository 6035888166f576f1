//! Command-line interface definitions for the `ferry` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual pages.

use clap::{Args, Parser};

/// Top-level CLI for the `ferry` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ferry",
    about = "Deploy a JavaScript bundle to remote hosts over SSH",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create or update a deployment.
    #[command(name = "deploy", about = "Create or update a deployment")]
    Deploy(DeployCommand),
    /// Print the supervisor status of a deployment.
    #[command(name = "status", about = "Print the supervisor status of a deployment")]
    Status(StateArgs),
    /// Stop a deployment and forget its state.
    #[command(name = "destroy", about = "Stop a deployment and forget its state")]
    Destroy(StateArgs),
    /// Generate a local key pair.
    #[command(name = "keygen", about = "Generate a local key pair")]
    Keygen(StateArgs),
    /// Remove a generated key pair.
    #[command(name = "keydel", about = "Remove a generated key pair")]
    Keydel(StateArgs),
}

/// Arguments for the `ferry deploy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Bundle to deploy; its file name is the payload fingerprint.
    #[arg(long, value_name = "PATH")]
    pub(crate) bundle: String,
    /// Address of the target host (private address when proxied).
    #[arg(long, value_name = "HOST")]
    pub(crate) address: String,
    /// Private key accepted by the target host.
    #[arg(long, value_name = "PATH")]
    pub(crate) key: String,
    /// Public address of a proxy that can reach the target.
    #[arg(long, value_name = "HOST", requires = "proxy_key")]
    pub(crate) proxy_address: Option<String>,
    /// Private key accepted by the proxy.
    #[arg(long, value_name = "PATH", requires = "proxy_address")]
    pub(crate) proxy_key: Option<String>,
    /// State file recording the deployment.
    #[command(flatten)]
    pub(crate) state: StateArgs,
}

/// Location of a resource's state file.
#[derive(Args, Debug)]
pub(crate) struct StateArgs {
    /// JSON file holding the resource state.
    #[arg(long, value_name = "FILE")]
    pub(crate) state: String,
}
