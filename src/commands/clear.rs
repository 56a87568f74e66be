use clap::Args;
use agnes::engine::ClearReport;

use crate::commands::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ClearArgs {
    /// Instances as server:environment:stage (`*` and comma lists allowed)
    pub target: String,
}

pub fn run(args: ClearArgs, global: &GlobalArgs) -> CmdResult<ClearReport> {
    let config = global.load_config()?;
    let mut executor = global.executor(&config)?;

    Ok((executor.clear(&args.target)?, 0))
}
