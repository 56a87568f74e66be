use clap::Args;
use agnes::planner;
use agnes::RunReport;

use crate::commands::{execute, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Instances as server:environment:stage (`*` and comma lists allowed)
    pub target: String,

    /// Name of a script under application.scripts
    pub script: String,
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunReport> {
    let config = global.load_config()?;
    let mut executor = global.executor(&config)?;

    let plan = planner::plan_run(&config, executor.registry_mut(), &args.target, &args.script)?;

    execute(&mut executor, plan)
}
