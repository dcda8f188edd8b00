//! Re-executes every block of a UNION / UNION ALL per probe.
//!
//! Duplicate elimination for UNION is rebuilt inside `execute_union` on every
//! call, so a correlated probe never sees rows deduplicated against a
//! previous outer row.

use super::{run_probe, EngineCommon, EngineOutput, Probe};
use crate::sql::context::ExecState;
use crate::sql::executor::execute_union;
use crate::sql::expr::SpecId;
use crate::sql::statement::Statement;
use eyre::Result;

#[derive(Debug)]
pub struct SetOperationEngine {
    pub(super) common: EngineCommon,
}

impl SetOperationEngine {
    pub fn new(spec: SpecId) -> Self {
        Self {
            common: EngineCommon::new(spec),
        }
    }

    pub(super) fn execute(
        &mut self,
        stmt: &Statement,
        exec: &mut ExecState<'_>,
        probe: Probe<'_>,
    ) -> Result<EngineOutput> {
        let spec = self.common.spec();
        run_probe(probe, self.common.stats_mut(), |sink| {
            execute_union(stmt, exec, spec, sink)
        })
    }
}
