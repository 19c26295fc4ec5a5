//! `io` grader: runs the submission and a reference solution against a set
//! of input vectors, comparing stdout byte-exact modulo trailing whitespace.

use async_trait::async_trait;

use gradekeep_sandbox::{execute, ExecOutcome, ExecRequest};
use gradekeep_store::RunStatus;

use crate::error::GraderError;
use crate::prep::{find_all_by_key, find_unique_by_key, prepare_sandbox};
use crate::{GradeContext, GradeOutcome, Grader, GraderResult};

pub struct IoGrader;

#[async_trait]
impl Grader for IoGrader {
    fn kind(&self) -> &'static str {
        "io"
    }

    async fn grade(&self, ctx: &GradeContext) -> GraderResult<GradeOutcome> {
        let sandbox_dir = tempfile::tempdir()?;

        if let Err(e) = prepare_sandbox(
            sandbox_dir.path(),
            &ctx.test,
            &ctx.test_files,
            &ctx.submission_files,
        ) {
            tracing::warn!(error = %e, "io grader: sandbox preparation failed");
            return Ok(exception_run(e));
        }

        let solution_name = match find_unique_by_key(&ctx.test_files, "solution") {
            Ok(file) => file.key.clone(),
            Err(e) => return Ok(exception_run(e)),
        };

        let submission_name = match submission_program_name(ctx) {
            Some(name) => name,
            None => {
                return Ok(exception_run(GraderError::Precondition(
                    "no submission program present".to_string(),
                )))
            }
        };

        let inputs = find_all_by_key(&ctx.test_files, "input");
        if inputs.is_empty() {
            return Ok(exception_run(GraderError::Precondition(
                "no input vectors present".to_string(),
            )));
        }

        let mut passed = 0usize;
        let total = inputs.len();

        for input in &inputs {
            if ctx.cancel.is_cancelled() {
                return Err(GraderError::Cancelled);
            }
            let stdin = std::fs::read(&input.path)?;

            let reference = run_program(&solution_name, sandbox_dir.path(), stdin.clone(), ctx).await?;
            if reference.cancelled {
                return Err(GraderError::Cancelled);
            }
            if reference.timed_out || reference.killed_by_limit || reference.retcode != 0 {
                tracing::warn!(
                    retcode = reference.retcode,
                    "io grader: reference solution failed on an input vector"
                );
                return Ok(GradeOutcome {
                    status: RunStatus::Complete,
                    retcode: reference.retcode,
                    score: 0.0,
                    output: format!(
                        "reference solution failed on input {:?}: retcode={}",
                        input.name, reference.retcode
                    ),
                });
            }

            let submission = run_program(&submission_name, sandbox_dir.path(), stdin, ctx).await?;
            if submission.cancelled {
                return Err(GraderError::Cancelled);
            }
            if submission.timed_out || submission.killed_by_limit {
                continue;
            }
            if trim_trailing_ws(&submission.stdout) == trim_trailing_ws(&reference.stdout) {
                passed += 1;
            }
        }

        let score = ctx.test.maxscore * (passed as f64) / (total as f64);
        Ok(GradeOutcome {
            status: RunStatus::Complete,
            retcode: 0,
            score,
            output: format!("{passed}/{total} input vectors matched"),
        })
    }
}

fn submission_program_name(ctx: &GradeContext) -> Option<String> {
    ctx.submission_files
        .iter()
        .find(|f| f.key == "submission" || f.key.is_empty())
        .map(|f| if f.key.is_empty() { "submission".to_string() } else { f.key.clone() })
}

async fn run_program(
    name: &str,
    cwd: &std::path::Path,
    stdin: Vec<u8>,
    ctx: &GradeContext,
) -> GraderResult<ExecOutcome> {
    let outcome = execute(ExecRequest {
        argv: vec![format!("./{name}")],
        cwd: cwd.to_path_buf(),
        stdin: Some(stdin),
        limits: ctx.limits,
        capture_bytes: ctx.capture_bytes,
        cancel: Some(ctx.cancel.clone()),
    })
    .await?;
    Ok(outcome)
}

fn trim_trailing_ws(s: &str) -> &str {
    s.trim_end()
}

fn exception_run(e: impl std::fmt::Display) -> GradeOutcome {
    GradeOutcome {
        status: RunStatus::CompleteExceptionRun,
        retcode: -1,
        score: 0.0,
        output: e.to_string(),
    }
}
