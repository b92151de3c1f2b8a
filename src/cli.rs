use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::terraform::Operation;

#[derive(Parser)]
#[command(
    name = "terraform-manager",
    about = "HTTP front end for terraform init/apply/destroy"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the terraform configuration
    #[arg(long, global = true)]
    pub working_dir: Option<PathBuf>,

    /// terraform executable to run
    #[arg(long, global = true)]
    pub terraform_bin: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        /// Listen address, e.g. 0.0.0.0:8080
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a single operation in the foreground
    Run {
        #[arg(value_enum)]
        operation: OperationArg,
    },
    /// Print the default config path and exit
    ConfigPath,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OperationArg {
    Init,
    Apply,
    Destroy,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Init => Operation::Init,
            OperationArg::Apply => Operation::Apply,
            OperationArg::Destroy => Operation::Destroy,
        }
    }
}
