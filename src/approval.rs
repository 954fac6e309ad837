use crate::catalog::{CatalogPublisher, PublishError};
use crate::models::{CandidateProduct, CandidateStatus, ImportLogEntry, LogStatus};
use crate::store::{ImportStore, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("candidate {0} not found")]
    NotFound(Uuid),
    #[error("cannot move candidate from {} to {}", .from.as_str(), .to.as_str())]
    IllegalTransition {
        from: CandidateStatus,
        to: CandidateStatus,
    },
    #[error("store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ApprovalError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => ApprovalError::NotFound(id),
            other => ApprovalError::Store(other),
        }
    }
}

/// Legal edges of the candidate lifecycle. `rejected` and `published` are
/// terminal.
pub fn can_transition(from: CandidateStatus, to: CandidateStatus) -> bool {
    use CandidateStatus::*;
    matches!(
        (from, to),
        (Pending, Approved)
            | (Pending, Rejected)
            | (Approved, Published)
            | (Approved, Failed)
            | (Failed, Approved)
    )
}

fn transition(
    candidate: &mut CandidateProduct,
    to: CandidateStatus,
) -> Result<(), ApprovalError> {
    if !can_transition(candidate.status, to) {
        return Err(ApprovalError::IllegalTransition {
            from: candidate.status,
            to,
        });
    }
    candidate.status = to;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkItemResult {
    pub id: Uuid,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CandidateStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Human review of pending candidates, and publishing of approved ones.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: ImportStore,
    publisher: Arc<CatalogPublisher>,
}

impl ApprovalWorkflow {
    pub fn new(store: ImportStore, publisher: Arc<CatalogPublisher>) -> Self {
        Self { store, publisher }
    }

    /// `pending -> approved`, then publishes. A publish failure leaves the
    /// candidate `failed` with the error recorded; the returned candidate
    /// carries the final state either way.
    pub async fn approve(&self, id: Uuid, reviewer: &str) -> Result<CandidateProduct, ApprovalError> {
        let ((), candidate) = self
            .store
            .update(id, |c| {
                transition(c, CandidateStatus::Approved)?;
                c.reviewed_by = Some(reviewer.to_string());
                c.reviewed_at = Some(Utc::now());
                Ok::<_, ApprovalError>((
                    (),
                    ImportLogEntry::for_candidate(
                        c,
                        LogStatus::Approved,
                        Some(format!("approved by {reviewer}")),
                    ),
                ))
            })
            .await?;
        info!(target = "woopl.approval", candidate = %id, reviewer, "candidate_approved");
        self.publish(candidate).await
    }

    /// `pending -> rejected`.
    pub async fn reject(
        &self,
        id: Uuid,
        reviewer: &str,
        reason: Option<String>,
    ) -> Result<CandidateProduct, ApprovalError> {
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let ((), candidate) = self
            .store
            .update(id, |c| {
                transition(c, CandidateStatus::Rejected)?;
                c.reviewed_by = Some(reviewer.to_string());
                c.reviewed_at = Some(Utc::now());
                c.rejection_reason = reason.clone();
                Ok::<_, ApprovalError>((
                    (),
                    ImportLogEntry::for_candidate(c, LogStatus::Rejected, reason.clone()),
                ))
            })
            .await?;
        info!(target = "woopl.approval", candidate = %id, reviewer, "candidate_rejected");
        Ok(candidate)
    }

    /// `failed -> approved`, then publishes again.
    pub async fn retry(&self, id: Uuid, reviewer: &str) -> Result<CandidateProduct, ApprovalError> {
        let ((), candidate) = self
            .store
            .update(id, |c| {
                transition(c, CandidateStatus::Approved)?;
                c.reviewed_by = Some(reviewer.to_string());
                c.reviewed_at = Some(Utc::now());
                Ok::<_, ApprovalError>((
                    (),
                    ImportLogEntry::for_candidate(
                        c,
                        LogStatus::Approved,
                        Some(format!("publish retried by {reviewer}")),
                    ),
                ))
            })
            .await?;
        self.publish(candidate).await
    }

    /// Applies `action` to each id independently; earlier successes are kept
    /// when a later item fails.
    pub async fn bulk(
        &self,
        action: BulkAction,
        ids: &[Uuid],
        reviewer: &str,
        reason: Option<String>,
    ) -> Vec<BulkItemResult> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match action {
                BulkAction::Approve => self.approve(*id, reviewer).await,
                BulkAction::Reject => self.reject(*id, reviewer, reason.clone()).await,
            };
            results.push(match outcome {
                Ok(candidate) => BulkItemResult {
                    id: *id,
                    ok: candidate.status != CandidateStatus::Failed,
                    status: Some(candidate.status),
                    error: candidate.last_error,
                },
                Err(err) => BulkItemResult {
                    id: *id,
                    ok: false,
                    status: None,
                    error: Some(err.to_string()),
                },
            });
        }
        results
    }

    /// Publishes candidates a previous process left `approved` (it stopped
    /// between approval and publishing). Called once at startup, before the
    /// API serves requests.
    pub async fn resume_interrupted(&self) -> usize {
        let stranded = self.store.by_status(CandidateStatus::Approved).await;
        let mut resumed = 0;
        for candidate in stranded {
            let id = candidate.id;
            match self.publish(candidate).await {
                Ok(updated) => {
                    resumed += 1;
                    info!(
                        target = "woopl.approval",
                        candidate = %id,
                        status = updated.status.as_str(),
                        "interrupted_publish_resumed"
                    );
                }
                Err(err) => warn!(
                    target = "woopl.approval",
                    candidate = %id,
                    error = %err,
                    "interrupted_publish_not_resumed"
                ),
            }
        }
        resumed
    }

    async fn publish(&self, candidate: CandidateProduct) -> Result<CandidateProduct, ApprovalError> {
        let id = candidate.id;
        let result: Result<String, PublishError> = self.publisher.publish(&candidate).await;
        let ((), updated) = match result {
            Ok(published_id) => {
                self.store
                    .update(id, |c| {
                        transition(c, CandidateStatus::Published)?;
                        c.published_id = Some(published_id.clone());
                        c.last_error = None;
                        Ok::<_, ApprovalError>((
                            (),
                            ImportLogEntry::for_candidate(
                                c,
                                LogStatus::Success,
                                Some(format!("published as {published_id}")),
                            ),
                        ))
                    })
                    .await?
            }
            Err(err) => {
                warn!(
                    target = "woopl.approval",
                    candidate = %id,
                    error = %err,
                    "publish_failed"
                );
                let detail = err.to_string();
                self.store
                    .update(id, |c| {
                        transition(c, CandidateStatus::Failed)?;
                        c.last_error = Some(detail.clone());
                        Ok::<_, ApprovalError>((
                            (),
                            ImportLogEntry::for_candidate(c, LogStatus::Failed, Some(detail.clone())),
                        ))
                    })
                    .await?
            }
        };
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, InMemoryCatalog};
    use crate::settings::PricingPolicy;
    use crate::transform::testing::sample_candidate;

    const ALL: [CandidateStatus; 5] = [
        CandidateStatus::Pending,
        CandidateStatus::Approved,
        CandidateStatus::Rejected,
        CandidateStatus::Published,
        CandidateStatus::Failed,
    ];

    async fn setup() -> (ApprovalWorkflow, ImportStore, Arc<InMemoryCatalog>) {
        let store = ImportStore::in_memory();
        let catalog = Arc::new(InMemoryCatalog::new());
        let publisher = Arc::new(CatalogPublisher::new(
            catalog.clone(),
            PricingPolicy::default(),
            100,
            "GHS",
        ));
        (
            ApprovalWorkflow::new(store.clone(), publisher),
            store,
            catalog,
        )
    }

    async fn seed(store: &ImportStore, marketplace_id: &str) -> Uuid {
        let candidate = sample_candidate(marketplace_id);
        let id = candidate.id;
        let entry = ImportLogEntry::for_candidate(&candidate, LogStatus::Pending, None);
        store.insert_candidate(candidate, 100, entry).await;
        id
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in ALL {
            assert!(!can_transition(CandidateStatus::Rejected, to));
            assert!(!can_transition(CandidateStatus::Published, to));
            assert!(!can_transition(to, CandidateStatus::Pending));
        }
        assert!(can_transition(CandidateStatus::Failed, CandidateStatus::Approved));
        assert!(!can_transition(CandidateStatus::Pending, CandidateStatus::Published));
    }

    #[tokio::test]
    async fn stranded_approvals_are_published_on_startup() {
        let (workflow, store, catalog) = setup().await;
        let mut stranded = sample_candidate("7");
        stranded.status = CandidateStatus::Approved;
        let id = stranded.id;
        let entry = ImportLogEntry::for_candidate(&stranded, LogStatus::Approved, None);
        store.insert_candidate(stranded, 100, entry).await;
        let untouched = seed(&store, "8").await;

        assert_eq!(workflow.resume_interrupted().await, 1);
        let candidate = store.get(id).await.expect("candidate");
        assert_eq!(candidate.status, CandidateStatus::Published);
        assert_eq!(catalog.listings().len(), 1);
        assert_eq!(
            store.get(untouched).await.map(|c| c.status),
            Some(CandidateStatus::Pending)
        );
        assert_eq!(workflow.resume_interrupted().await, 0);
    }

    #[tokio::test]
    async fn approve_publishes_and_logs_success() {
        let (workflow, store, catalog) = setup().await;
        let id = seed(&store, "1").await;
        let candidate = workflow.approve(id, "operator").await.expect("approve");
        assert_eq!(candidate.status, CandidateStatus::Published);
        assert!(candidate.published_id.is_some());
        assert_eq!(candidate.reviewed_by.as_deref(), Some("operator"));
        assert_eq!(catalog.listings().len(), 1);

        let history = store.history(1, 10).await;
        let statuses: Vec<_> = history.imports.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![LogStatus::Success, LogStatus::Approved, LogStatus::Pending]
        );
    }

    #[tokio::test]
    async fn published_candidate_cannot_be_rejected_or_reapproved() {
        let (workflow, store, _) = setup().await;
        let id = seed(&store, "1").await;
        workflow.approve(id, "operator").await.expect("approve");
        assert!(matches!(
            workflow.reject(id, "operator", None).await,
            Err(ApprovalError::IllegalTransition {
                from: CandidateStatus::Published,
                to: CandidateStatus::Rejected
            })
        ));
        assert!(matches!(
            workflow.approve(id, "operator").await,
            Err(ApprovalError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_is_terminal_and_keeps_reason() {
        let (workflow, store, catalog) = setup().await;
        let id = seed(&store, "1").await;
        let rejected = workflow
            .reject(id, "operator", Some(" poor images ".into()))
            .await
            .expect("reject");
        assert_eq!(rejected.rejection_reason.as_deref(), Some("poor images"));
        assert!(workflow.approve(id, "operator").await.is_err());
        assert!(workflow.retry(id, "operator").await.is_err());
        assert!(catalog.listings().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_then_manual_retry() {
        let (workflow, store, catalog) = setup().await;
        let id = seed(&store, "1").await;
        catalog.fail_listings_with(Some(CatalogError::Auth("HTTP 401".into())));
        let failed = workflow.approve(id, "operator").await.expect("approve");
        assert_eq!(failed.status, CandidateStatus::Failed);
        assert!(failed.last_error.as_deref().unwrap_or_default().contains("401"));

        catalog.fail_listings_with(None);
        let published = workflow.retry(id, "operator").await.expect("retry");
        assert_eq!(published.status, CandidateStatus::Published);
        assert_eq!(published.last_error, None);

        let stats = store.stats(Utc::now()).await;
        assert_eq!(stats.failed_imports, 1);
        assert_eq!(stats.total_imported, 1);
    }

    #[tokio::test]
    async fn retry_requires_failed_state() {
        let (workflow, store, _) = setup().await;
        let id = seed(&store, "1").await;
        assert!(matches!(
            workflow.retry(id, "operator").await,
            Err(ApprovalError::IllegalTransition {
                from: CandidateStatus::Pending,
                to: CandidateStatus::Approved
            })
        ));
    }

    #[tokio::test]
    async fn unknown_candidate_is_not_found() {
        let (workflow, _, _) = setup().await;
        assert!(matches!(
            workflow.approve(Uuid::new_v4(), "operator").await,
            Err(ApprovalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bulk_applies_per_item_without_rollback() {
        let (workflow, store, _) = setup().await;
        let first = seed(&store, "1").await;
        let second = seed(&store, "2").await;
        workflow
            .reject(second, "operator", None)
            .await
            .expect("reject");
        let missing = Uuid::new_v4();

        let results = workflow
            .bulk(BulkAction::Approve, &[first, second, missing], "operator", None)
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].ok);
        assert_eq!(results[0].status, Some(CandidateStatus::Published));
        assert!(!results[1].ok);
        assert!(!results[2].ok);
        assert_eq!(
            store.get(first).await.expect("first").status,
            CandidateStatus::Published
        );
    }
}
