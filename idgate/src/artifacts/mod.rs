//! Pending artifact association
//!
//! A visitor may start an upload before signing in; the authorization URL
//! then carries the artifact's id and the callback attaches it to the
//! resolved user. Association is best-effort: failures are logged and never
//! fail the login.

use async_trait::async_trait;
use uuid::Uuid;

/// Artifact association errors
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// No artifact with that id
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Artifact belongs to another user
    #[error("Artifact {0} is owned by another user")]
    OwnedElsewhere(String),

    /// Backend failure
    #[error("Artifact backend error: {0}")]
    Backend(String),
}

/// Attaches a pending artifact to a user
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactAssociator: Send + Sync {
    /// Associate `artifact_id` with `user_id`
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError` if the artifact cannot be associated
    async fn associate(&self, artifact_id: &str, user_id: Uuid) -> Result<(), ArtifactError>;
}

/// Associator used when no artifact backend is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAssociator;

#[async_trait]
impl ArtifactAssociator for NoopAssociator {
    async fn associate(&self, artifact_id: &str, user_id: Uuid) -> Result<(), ArtifactError> {
        tracing::debug!(%artifact_id, %user_id, "No artifact backend, skipping association");
        Ok(())
    }
}

/// Result of a best-effort association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationOutcome {
    /// Nothing to associate
    Skipped,
    /// Associated
    Associated,
    /// Attempted and failed; the failure was logged
    Failed,
}

/// Associate if an artifact is pending, swallowing failures
pub async fn associate_best_effort(
    associator: &dyn ArtifactAssociator,
    artifact_id: Option<&str>,
    user_id: Uuid,
) -> AssociationOutcome {
    let Some(artifact_id) = artifact_id else {
        return AssociationOutcome::Skipped;
    };

    match associator.associate(artifact_id, user_id).await {
        Ok(()) => {
            tracing::info!(%artifact_id, %user_id, "Artifact associated");
            AssociationOutcome::Associated
        }
        Err(e) => {
            tracing::warn!(%artifact_id, %user_id, error = %e, "Artifact association failed");
            AssociationOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_skipped_without_artifact() {
        let mut mock = MockArtifactAssociator::new();
        mock.expect_associate().never();

        let outcome = associate_best_effort(&mock, None, Uuid::new_v4()).await;
        assert_eq!(outcome, AssociationOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let mut mock = MockArtifactAssociator::new();
        mock.expect_associate()
            .withf(|id, _| id == "r-1")
            .times(1)
            .returning(|id, _| Err(ArtifactError::NotFound(id.to_string())));

        let outcome = associate_best_effort(&mock, Some("r-1"), Uuid::new_v4()).await;
        assert_eq!(outcome, AssociationOutcome::Failed);
    }

    #[tokio::test]
    async fn test_noop_associator_succeeds() {
        let outcome = associate_best_effort(&NoopAssociator, Some("r-1"), Uuid::new_v4()).await;
        assert_eq!(outcome, AssociationOutcome::Associated);
    }
}
