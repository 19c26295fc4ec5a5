//! `null` reporter: no-op, always succeeds. Used for smoke tests and Tests
//! that don't report to any external system.

use async_trait::async_trait;

use crate::{ReportAttempt, ReportContext, Reporter};

pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    fn mod_name(&self) -> &'static str {
        "null"
    }

    async fn report(&self, _ctx: &ReportContext<'_>) -> ReportAttempt {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradekeep_store::{ReporterMod, ReporterRecord, User};
    use std::collections::HashMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn always_succeeds() {
        let reporter = ReporterRecord {
            uuid: Uuid::new_v4(),
            kind: ReporterMod::Null,
            owner: Uuid::new_v4(),
            fields: HashMap::new(),
        };
        let user = User {
            uuid: Uuid::new_v4(),
            authmod: "local".to_string(),
            moodle_id: None,
            extra: HashMap::new(),
        };
        let ctx = ReportContext {
            reporter: &reporter,
            user: &user,
            score: 10.0,
            comment: "ok",
        };
        assert!(NullReporter.report(&ctx).await.is_ok());
    }
}
