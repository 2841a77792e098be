//! Sequential batch runner
//!
//! Runs statements one after another through the session, stopping at the
//! first failure. Statements after the failing one are never submitted.

use super::Session;
use crate::db::types::QueryResults;
use crate::error::{SessionError, SessionResult};

impl Session {
    /// Run `statements` in order, each only after the previous succeeded.
    ///
    /// Returns the last statement's result, or `None` for an empty batch.
    ///
    /// # Errors
    /// [`SessionError::BatchAborted`] naming the failing statement; the
    /// statements before it have already run.
    pub async fn run_all<I, S>(&self, statements: I) -> SessionResult<Option<QueryResults>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statements: Vec<String> = statements.into_iter().map(Into::into).collect();
        let total = statements.len();
        let mut last = None;
        for (index, sql) in statements.into_iter().enumerate() {
            match self.execute(sql.clone()).await {
                Ok(results) => last = Some(results),
                Err(source) => {
                    tracing::warn!(
                        session_id = %self.id(),
                        index,
                        total,
                        "Batch aborted"
                    );
                    return Err(SessionError::BatchAborted {
                        index,
                        sql,
                        source: Box::new(source),
                    });
                }
            }
        }
        tracing::debug!(session_id = %self.id(), total, "Batch complete");
        Ok(last)
    }
}
