//! Multi-document transactions with a fixed consistency profile.
//!
//! Every transaction runs with primary reads, local read concern, and
//! majority write concern. The profile is deliberately not configurable:
//! the accounting writes that need transactions all need the same
//! guarantees, and a per-call knob is how one caller silently gets weaker
//! ones.

use futures::future::BoxFuture;
use mongodb::ClientSession;
use mongodb::options::{ReadConcern, ReadPreference, SelectionCriteria, WriteConcern};
use tracing::warn;

use daicho_core::error::{DatabaseError, DatabaseResult};

use crate::store::MongoStore;

impl MongoStore {
    /// Runs `work` inside a multi-document transaction.
    ///
    /// The transaction is committed when `work` returns `Ok` and aborted when
    /// it returns `Err`, with the work's error propagated unchanged. Session
    /// and commit failures surface as [`DatabaseError::Transaction`]. The
    /// session ends when it goes out of scope, whether or not the commit
    /// happened.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let moved = store
    ///     .with_transaction(|session| {
    ///         Box::pin(async move {
    ///             // debit one account, credit another, using the session
    ///             Ok(amount)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_transaction<T, F>(&self, work: F) -> DatabaseResult<T>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut ClientSession) -> BoxFuture<'s, DatabaseResult<T>> + Send,
    {
        let database = self.manager().database().await?;
        let client = database.client();
        let mut session = client
            .start_session()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("failed to start session: {e}")))?;
        session
            .start_transaction()
            .read_concern(ReadConcern::local())
            .write_concern(WriteConcern::majority())
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await
            .map_err(|e| {
                DatabaseError::Transaction(format!("failed to start transaction: {e}"))
            })?;

        match work(&mut session).await {
            Ok(value) => {
                session
                    .commit_transaction()
                    .await
                    .map_err(|e| DatabaseError::Transaction(format!("commit failed: {e}")))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!(error = %abort_err, "failed to abort transaction");
                }
                Err(err)
            }
        }
    }
}
