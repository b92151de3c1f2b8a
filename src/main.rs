mod cli;
mod commands;
mod config;
mod logging;
mod server;
mod terraform;
mod testutil;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use terraform::Workspace;

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but the tool reported failure.
fn run(cli: Cli) -> Result<bool> {
    if let Command::ConfigPath = cli.command {
        println!("{}", config::default_config_path()?.display());
        return Ok(true);
    }

    let bind = match &cli.command {
        Command::Serve { bind } => bind.clone(),
        _ => None,
    };
    let overrides = config::Overrides {
        bind,
        working_dir: cli.working_dir,
        terraform_bin: cli.terraform_bin,
        log_json: cli.log_json,
    };
    let config = config::load(cli.config.as_deref(), overrides)?;
    logging::init_tracing(config.log_json);

    let workspace = Workspace::new(config.binary, config.working_dir);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    match cli.command {
        Command::Serve { .. } => {
            runtime.block_on(server::serve(config.bind, workspace))?;
            Ok(true)
        }
        Command::Run { operation } => {
            let result = runtime.block_on(commands::cmd_run(&workspace, operation.into()));
            output(&result, cli.json, commands::format_run_human)?;
            Ok(result.succeeded())
        }
        Command::ConfigPath => Ok(true),
    }
}

fn output<T: serde::Serialize>(result: &T, json: bool, human_fn: fn(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        let text = human_fn(result);
        if !text.is_empty() {
            println!("{}", text);
        }
    }
    Ok(())
}
