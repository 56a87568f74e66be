use clap::Args;
use agnes::planner;
use agnes::RunReport;

use crate::commands::{execute, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct BuildArgs {
    /// Branch, tag or commit to build
    pub commitish: String,
}

pub fn run(args: BuildArgs, global: &GlobalArgs) -> CmdResult<RunReport> {
    let config = global.load_config()?;
    let mut executor = global.executor(&config)?;
    execute(&mut executor, planner::plan_build(&args.commitish))
}
