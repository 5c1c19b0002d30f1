use crate::errors::AppResult;
use crate::models::{
    Bid, BidBreakdown, BidBreakdownPayload, Budget, CreateSnapshotPayload, LevelingSnapshot,
    ProjectBidMatrix, SnapshotItem, UpsertBidPayload, UpsertBudgetPayload,
};
use async_trait::async_trait;

/// Persistence contract the reconciliation core depends on. Every call is
/// an independent suspend point that can fail on its own; the core never
/// issues two calls concurrently for the same logical entity.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// One consolidated read of everything the leveling screen needs.
    async fn get_project_bid_matrix(&self, project_id: &str) -> AppResult<ProjectBidMatrix>;

    /// Last-write-wins upsert keyed by `(trade_id, sub_id)`.
    async fn upsert_bid(&self, payload: &UpsertBidPayload) -> AppResult<Bid>;

    /// Replaces the bid's line items and alternates. Issued after
    /// `upsert_bid`; a failure here leaves the bid row committed.
    async fn upsert_bid_breakdown(&self, payload: &BidBreakdownPayload) -> AppResult<()>;

    async fn get_bid_breakdown(
        &self,
        project_id: &str,
        trade_id: &str,
        sub_id: &str,
    ) -> AppResult<BidBreakdown>;

    async fn remove_bid(&self, project_id: &str, trade_id: &str, sub_id: &str) -> AppResult<()>;

    /// Upsert keyed by `(project_id, trade_id)`.
    async fn upsert_budget(&self, payload: &UpsertBudgetPayload) -> AppResult<Budget>;

    /// Atomic: either the snapshot row and all its items exist afterwards,
    /// or none do.
    async fn create_snapshot(&self, payload: &CreateSnapshotPayload) -> AppResult<LevelingSnapshot>;

    async fn get_snapshot_items(&self, snapshot_id: &str) -> AppResult<Vec<SnapshotItem>>;
}
