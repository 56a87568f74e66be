use clap::Args;
use agnes::planner;
use agnes::RunReport;

use crate::commands::{execute, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RollbackArgs {
    /// Instances as server:environment:stage (`*` and comma lists allowed)
    pub target: String,

    /// Only roll back to an installation of this release or commit
    #[arg(long, value_name = "RELEASE")]
    pub rollback_to: Option<String>,

    /// Only roll back instances currently running this release or commit
    #[arg(long, value_name = "RELEASE")]
    pub rollback_from: Option<String>,
}

pub fn run(args: RollbackArgs, global: &GlobalArgs) -> CmdResult<RunReport> {
    let config = global.load_config()?;
    let mut executor = global.executor(&config)?;

    let plan = planner::plan_rollback(
        executor.registry_mut(),
        &args.target,
        args.rollback_to.as_deref(),
        args.rollback_from.as_deref(),
    )?;

    execute(&mut executor, plan)
}
