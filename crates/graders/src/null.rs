//! `null` grader: no sandbox preparation, no process spawn. Exists to
//! exercise C3/C7 wiring cheaply and as the reference fixture for the
//! round-trip property every other grader is checked against.

use async_trait::async_trait;

use gradekeep_store::RunStatus;

use crate::{GradeContext, GradeOutcome, Grader, GraderResult};

pub struct NullGrader;

#[async_trait]
impl Grader for NullGrader {
    fn kind(&self) -> &'static str {
        "null"
    }

    async fn grade(&self, _ctx: &GradeContext) -> GraderResult<GradeOutcome> {
        Ok(GradeOutcome {
            status: RunStatus::Complete,
            retcode: 0,
            score: 0.0,
            output: String::new(),
        })
    }
}
