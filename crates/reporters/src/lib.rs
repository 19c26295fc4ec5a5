//! Reporter Registry & Reporters (C6): policy-guarded dispatch of a Run's
//! grade to external LMS back-ends. Reporters never fail a Run — a failed
//! report becomes a recorded outcome, not a propagated error.

pub mod error;
pub mod moodle;
pub mod null;

use async_trait::async_trait;

use gradekeep_store::{ReporterRecord, User};

pub use error::{ReporterError, ReporterResult};
pub use moodle::MoodleReporter;
pub use null::NullReporter;

/// Everything a reporter needs to file a grade, gathered by the caller (the
/// Run Engine) from the Object Repository before dispatch.
pub struct ReportContext<'a> {
    pub reporter: &'a ReporterRecord,
    pub user: &'a User,
    pub score: f64,
    pub comment: &'a str,
}

/// Outcome of one reporter's attempt to file a grade. `Ok(())` means the LMS
/// accepted it; `Err` carries the policy rejection or transport fault, which
/// the engine records on the Run but never escalates.
pub type ReportAttempt = ReporterResult<()>;

/// Strategy implemented by every reporter `mod` (`null`, `moodle`).
#[async_trait]
pub trait Reporter: Send + Sync {
    fn mod_name(&self) -> &'static str;
    async fn report(&self, ctx: &ReportContext<'_>) -> ReportAttempt;
}

/// Maps a Reporter record's `mod` field to a reporter implementation.
#[derive(Default)]
pub struct ReporterRegistry {
    reporters: Vec<Box<dyn Reporter>>,
}

impl ReporterRegistry {
    pub fn with_builtins(moodle: MoodleReporter) -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(NullReporter));
        registry.register(Box::new(moodle));
        registry
    }

    pub fn register(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    pub fn get(&self, mod_name: &str) -> ReporterResult<&dyn Reporter> {
        self.reporters
            .iter()
            .find(|r| r.mod_name() == mod_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ReporterError::UnknownMod(mod_name.to_string()))
    }
}

/// Truncates `comment` to at most `limit` bytes (on a UTF-8 boundary),
/// appending the spec's truncation marker when it had to cut.
pub fn truncate_comment(comment: &str, limit: usize) -> String {
    if comment.len() <= limit {
        return comment.to_string();
    }
    let marker = "\nWARNING: Output Truncated";
    let budget = limit.saturating_sub(marker.len());
    let mut end = budget.min(comment.len());
    while end > 0 && !comment.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{marker}", &comment[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_comment_is_untouched() {
        assert_eq!(truncate_comment("hello", 2000), "hello");
    }

    #[test]
    fn long_comment_is_truncated_with_marker() {
        let long = "x".repeat(2500);
        let truncated = truncate_comment(&long, 2000);
        assert!(truncated.len() <= 2000);
        assert!(truncated.ends_with("\nWARNING: Output Truncated"));
    }

    #[test]
    fn registry_resolves_builtins() {
        let registry = ReporterRegistry::with_builtins(MoodleReporter::new(
            gradekeep_config::ReporterMoodleConfig::default(),
        ));
        assert!(registry.get("null").is_ok());
        assert!(registry.get("moodle").is_ok());
        assert!(matches!(registry.get("wasm"), Err(ReporterError::UnknownMod(_))));
    }
}
