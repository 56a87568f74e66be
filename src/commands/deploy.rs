use clap::Args;
use agnes::planner;
use agnes::RunReport;

use crate::commands::{execute, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct DeployArgs {
    /// Instances as server:environment:stage (`*` and comma lists allowed)
    pub target: String,

    /// Published release name, or a commitish to build
    pub release: String,
}

pub fn run(args: DeployArgs, global: &GlobalArgs) -> CmdResult<RunReport> {
    let config = global.load_config()?;
    let mut executor = global.executor(&config)?;

    let source = planner::resolve_setup_source(executor.host(), &args.release)?;
    let plan = planner::plan_deploy(&config, executor.registry_mut(), &args.target, source)?;

    execute(&mut executor, plan)
}
