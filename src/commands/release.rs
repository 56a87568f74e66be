use clap::Args;
use agnes::planner;
use agnes::RunReport;

use crate::commands::{execute, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ReleaseArgs {
    /// Name of the release to publish (e.g. v1.2.0)
    pub name: String,

    /// Branch, tag or commit to build the release from
    pub commitish: String,
}

pub fn run(args: ReleaseArgs, global: &GlobalArgs) -> CmdResult<RunReport> {
    let config = global.load_config()?;
    let mut executor = global.executor(&config)?;
    execute(
        &mut executor,
        planner::plan_release(&args.name, &args.commitish),
    )
}
