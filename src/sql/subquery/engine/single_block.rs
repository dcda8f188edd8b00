//! Re-executes one query block per probe.

use super::{run_probe, EngineCommon, EngineOutput, Probe};
use crate::sql::context::ExecState;
use crate::sql::executor::execute_block;
use crate::sql::expr::{BlockId, SpecId};
use crate::sql::statement::Statement;
use eyre::Result;

#[derive(Debug)]
pub struct SingleBlockEngine {
    pub(super) common: EngineCommon,
    block: BlockId,
}

impl SingleBlockEngine {
    pub fn new(spec: SpecId, block: BlockId) -> Self {
        Self {
            common: EngineCommon::new(spec),
            block,
        }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub(super) fn execute(
        &mut self,
        stmt: &Statement,
        exec: &mut ExecState<'_>,
        probe: Probe<'_>,
    ) -> Result<EngineOutput> {
        let block = self.block;
        run_probe(probe, self.common.stats_mut(), |sink| {
            execute_block(stmt, exec, block, sink)
        })
    }
}
