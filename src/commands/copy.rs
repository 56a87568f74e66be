use clap::Args;
use agnes::planner;
use agnes::RunReport;

use crate::commands::{execute, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct CopyArgs {
    /// Instances to copy into, as server:environment:stage
    pub target: String,

    /// Stage to copy from, on the same server and environment
    pub source_stage: String,
}

pub fn run(args: CopyArgs, global: &GlobalArgs) -> CmdResult<RunReport> {
    let config = global.load_config()?;
    let mut executor = global.executor(&config)?;

    let plan = planner::plan_copy(executor.registry_mut(), &args.target, &args.source_stage)?;

    execute(&mut executor, plan)
}
