//! `script` grader: runs an instructor-provided grader script against the
//! submission and parses a score off its last non-empty stdout line.

use async_trait::async_trait;

use gradekeep_sandbox::{execute, ExecRequest};
use gradekeep_store::RunStatus;

use crate::error::{GraderError, GraderResult};
use crate::prep::{find_unique_by_key, prepare_sandbox};
use crate::{GradeContext, GradeOutcome, Grader};

pub struct ScriptGrader;

#[async_trait]
impl Grader for ScriptGrader {
    fn kind(&self) -> &'static str {
        "script"
    }

    async fn grade(&self, ctx: &GradeContext) -> GraderResult<GradeOutcome> {
        let sandbox_dir = tempfile::tempdir()?;

        if let Err(e) = prepare_sandbox(
            sandbox_dir.path(),
            &ctx.test,
            &ctx.test_files,
            &ctx.submission_files,
        ) {
            tracing::warn!(error = %e, "script grader: sandbox preparation failed");
            return Ok(exception_run(e));
        }

        let script_name = if ctx.test.path_script.is_empty() {
            match find_unique_by_key(&ctx.test_files, "script") {
                Ok(file) => file.key.clone(),
                Err(e) => return Ok(exception_run(e)),
            }
        } else {
            std::path::Path::new(&ctx.test.path_script)
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or(&ctx.test.path_script)
                .to_string()
        };

        let (submission_mode, submission_name) = if ctx.submission_files.iter().any(|f| f.key == "stdin") {
            ("stdin", "stdin".to_string())
        } else if let Some(file) = ctx
            .submission_files
            .iter()
            .find(|f| f.key == "args" || f.key.is_empty())
        {
            ("args", if file.key.is_empty() { "submission".to_string() } else { file.key.clone() })
        } else {
            return Ok(exception_run(GraderError::Precondition(
                "no submission file present".to_string(),
            )));
        };

        // `Command::new` only treats a program name as a direct path when it
        // contains a separator — without the `./` prefix a bare filename is
        // searched for on `$PATH`, which the sandbox environment scrubs.
        let mut argv = vec![format!("./{script_name}")];
        let mut stdin = None;
        if submission_mode == "stdin" {
            stdin = Some(std::fs::read(sandbox_dir.path().join(&submission_name))?);
        } else {
            argv.push(submission_name);
        }

        let outcome = execute(ExecRequest {
            argv,
            cwd: sandbox_dir.path().to_path_buf(),
            stdin,
            limits: ctx.limits,
            capture_bytes: ctx.capture_bytes,
            cancel: Some(ctx.cancel.clone()),
        })
        .await?;

        if outcome.cancelled {
            return Err(GraderError::Cancelled);
        }

        if outcome.timed_out {
            tracing::warn!("script grader: grader script timed out");
            return Ok(GradeOutcome {
                status: RunStatus::CompleteError,
                retcode: outcome.retcode,
                score: 0.0,
                output: outcome.stdout + &outcome.stderr,
            });
        }

        if outcome.killed_by_limit || outcome.retcode != 0 {
            tracing::warn!(retcode = outcome.retcode, "script grader: grader script exited non-zero");
            return Ok(GradeOutcome {
                status: RunStatus::CompleteError,
                retcode: outcome.retcode,
                score: 0.0,
                output: outcome.stdout + &outcome.stderr,
            });
        }

        match parse_last_line_score(&outcome.stdout) {
            Some(score) => Ok(GradeOutcome {
                status: RunStatus::Complete,
                retcode: outcome.retcode,
                score,
                output: outcome.stdout + &outcome.stderr,
            }),
            None => {
                tracing::warn!("script grader: failed to parse score from grader stdout");
                Ok(GradeOutcome {
                    status: RunStatus::CompleteExceptionEval,
                    retcode: outcome.retcode,
                    score: 0.0,
                    output: outcome.stdout + &outcome.stderr,
                })
            }
        }
    }
}

fn exception_run(e: impl std::fmt::Display) -> GradeOutcome {
    GradeOutcome {
        status: RunStatus::CompleteExceptionRun,
        retcode: -1,
        score: 0.0,
        output: e.to_string(),
    }
}

/// Parses the last non-empty line of `stdout` as a floating-point score.
fn parse_last_line_score(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.trim().parse::<f64>().ok())
}
