use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;

use commands::{build, clear, copy, deploy, release, rollback, run};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "agnes")]
#[command(version = VERSION)]
#[command(about = "Build, release and deploy an application to many servers")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = agnes::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Evaluate policies and report what would run without changing anything
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Build a commitish into a local archive
    Build(build::BuildArgs),
    /// Build a commitish and publish it as a release
    Release(release::ReleaseArgs),
    /// Deploy a release or commitish to matching instances
    Deploy(deploy::DeployArgs),
    /// Switch matching instances back to an earlier installation
    Rollback(rollback::RollbackArgs),
    /// Copy shared folders from another stage
    #[command(visible_alias = "copy:shared")]
    Copy(copy::CopyArgs),
    /// Run a configured script in the current installation
    Run(run::RunArgs),
    /// Delete installation folders that are not tracked by metadata
    Clear(clear::ClearArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs {
        config: cli.config,
        dry_run: cli.dry_run,
    };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    output::print_json_result(json_result, exit_code);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
