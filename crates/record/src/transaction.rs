//! Transaction Management
//!
//! Records never commit or roll back on their own; they only route queries
//! through whatever scope they are given. [`with_transaction`] is the scoped
//! helper for callers who want the usual commit-on-success behaviour.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::{BackendHandle, TransactionScope, TransactionalBackend};
use crate::error::ModelResult;

/// Run `f` inside a fresh transaction scope of `backend`.
///
/// The closure receives the scope as a [`BackendHandle`], ready to pass as
/// `QueryOptions::transaction` or to bind to records. If it returns `Ok` the
/// scope is committed, otherwise it is rolled back and the closure's error is
/// returned.
pub async fn with_transaction<B, F, Fut, R>(backend: &B, f: F) -> ModelResult<R>
where
    B: TransactionalBackend + ?Sized,
    F: FnOnce(BackendHandle) -> Fut,
    Fut: Future<Output = ModelResult<R>>,
{
    let scope = backend.begin().await?;
    debug!(backend = %backend.label(), transaction = %scope.label(), "Starting transaction scope");

    match f(Arc::clone(&scope).as_backend()).await {
        Ok(result) => {
            scope.commit().await?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_error) = finish_with_rollback(&scope).await {
                warn!(
                    transaction = %scope.label(),
                    "Rollback after failed transaction scope also failed: {}",
                    rollback_error
                );
            }
            Err(e)
        }
    }
}

async fn finish_with_rollback(scope: &Arc<dyn TransactionScope>) -> ModelResult<()> {
    // the closure may have finished the scope itself
    if scope.is_active() {
        scope.rollback().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::error::ModelError;
    use crate::model::ModelDefinition;
    use crate::options::QueryOptions;

    #[tokio::test]
    async fn test_commits_on_success() {
        let backend = MemoryBackend::new();
        let notes = ModelDefinition::new("Note").shared();

        let id = with_transaction(&backend, |tx| {
            let notes = Arc::clone(&notes);
            async move {
                let note = notes
                    .create(crate::attrs! { "body" => "kept" }, QueryOptions::new().transaction(tx))
                    .await?;
                Ok::<_, ModelError>(note.id().cloned())
            }
        })
        .await
        .unwrap();

        assert!(id.is_some());
        assert_eq!(backend.row_count("notes").await, 1);
    }

    #[tokio::test]
    async fn test_rolls_back_on_error() {
        let backend = MemoryBackend::new();
        let notes = ModelDefinition::new("Note").shared();

        let result: ModelResult<()> = with_transaction(&backend, |tx| {
            let notes = Arc::clone(&notes);
            async move {
                notes
                    .create(crate::attrs! { "body" => "discarded" }, QueryOptions::new().transaction(tx))
                    .await?;
                Err::<(), _>(ModelError::Validation("abort".to_string()))
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), ModelError::Validation("abort".to_string()));
        assert_eq!(backend.row_count("notes").await, 0);
    }
}
