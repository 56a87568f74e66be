use std::path::PathBuf;

use agnes::config::{self, Config};
use agnes::planner::Plan;
use agnes::{RunReport, TaskExecutor};

pub type CmdResult<T> = agnes::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config: PathBuf,
    pub dry_run: bool,
}

impl GlobalArgs {
    pub fn load_config(&self) -> agnes::Result<Config> {
        config::load(&self.config)
    }

    pub fn executor<'a>(&self, config: &'a Config) -> agnes::Result<TaskExecutor<'a>> {
        Ok(TaskExecutor::from_config(config)?.with_dry_run(self.dry_run))
    }
}

/// Run `plan` and turn the report into the command result.
pub(crate) fn execute(executor: &mut TaskExecutor<'_>, plan: Plan) -> CmdResult<RunReport> {
    let report = executor.run(plan)?;
    let exit_code = report.exit_code();
    Ok((report, exit_code))
}

pub mod build;
pub mod clear;
pub mod copy;
pub mod deploy;
pub mod release;
pub mod rollback;
pub mod run;

macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (agnes::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Build(args) => dispatch!(args, global, build),
        crate::Commands::Release(args) => dispatch!(args, global, release),
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Rollback(args) => dispatch!(args, global, rollback),
        crate::Commands::Copy(args) => dispatch!(args, global, copy),
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Clear(args) => dispatch!(args, global, clear),
    }
}
