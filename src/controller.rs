use crate::coverage::{coverage_report, due_in_days, CoverageReport};
use crate::errors::{AppError, AppResult};
use crate::matrix::{build_matrix, LevelingMatrix};
use crate::models::{
    Bid, BidBreakdown, BidBreakdownPayload, Budget, CreateSnapshotPayload, LevelingSettings,
    LevelingSnapshot, Project, ProjectRiskStatus, SnapshotItem, UpsertBidPayload,
    UpsertBudgetPayload,
};
use crate::session::{ActiveBidEdit, BidDraft, EditSession};
use crate::snapshot::{live_view, snapshot_items_for, snapshot_view, EffectiveMatrix};
use crate::stats::{trade_stats, TradeStats};
use crate::store::EntityStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// A just-deleted bid held in memory for the undo window.
#[derive(Debug, Clone)]
struct PendingUndo {
    bid: Bid,
    breakdown: BidBreakdown,
    expires_at: DateTime<Utc>,
    token: u64,
}

#[derive(Default)]
struct ControllerState {
    project: Option<Project>,
    matrix: LevelingMatrix,
    budgets: HashMap<String, Budget>,
    snapshots: Vec<LevelingSnapshot>,
    snapshot_items: Vec<SnapshotItem>,
    session: EditSession,
    pending_undo: Option<PendingUndo>,
    undo_counter: u64,
}

impl ControllerState {
    fn project_id(&self) -> AppResult<String> {
        self.project
            .as_ref()
            .map(|project| project.id.clone())
            .ok_or_else(|| AppError::Validation("no project loaded".to_string()))
    }

    /// Every persisted mutation is rejected up front while a historical
    /// snapshot is selected.
    fn ensure_live_view(&self) -> AppResult<()> {
        match self.session.selected_snapshot() {
            Some(snapshot_id) => Err(AppError::Validation(format!(
                "snapshot {snapshot_id} is read-only; return to live view to edit"
            ))),
            None => Ok(()),
        }
    }

    fn effective(&self) -> EffectiveMatrix {
        match self.session.selected_snapshot() {
            Some(snapshot_id) => snapshot_view(&self.matrix, snapshot_id, &self.snapshot_items),
            None => live_view(&self.matrix),
        }
    }
}

/// Owns one leveling screen's state: the cached live matrix, the edit
/// session, and the pending-undo slot. All persistence goes through the
/// entity store, strictly sequentially.
pub struct LevelingController {
    store: Arc<dyn EntityStore>,
    settings: LevelingSettings,
    state: Arc<Mutex<ControllerState>>,
}

impl LevelingController {
    pub fn new(store: Arc<dyn EntityStore>, settings: LevelingSettings) -> Self {
        Self {
            store,
            settings,
            state: Arc::new(Mutex::new(ControllerState::default())),
        }
    }

    pub fn settings(&self) -> &LevelingSettings {
        &self.settings
    }

    pub async fn load_project(&self, project_id: &str) -> AppResult<EffectiveMatrix> {
        let mut state = self.state.lock().await;
        self.refetch(&mut state, project_id).await?;
        state.session.select_snapshot(None);
        state.snapshot_items.clear();
        Ok(state.effective())
    }

    /// Consistency comes from re-deriving the whole matrix from the store
    /// after each successful write instead of patching local state.
    async fn refetch(&self, state: &mut ControllerState, project_id: &str) -> AppResult<()> {
        let fetched = self.store.get_project_bid_matrix(project_id).await?;
        state.matrix = build_matrix(&fetched.trades, &fetched.project_subs, &fetched.bids);
        state.budgets = fetched
            .budgets
            .iter()
            .map(|budget| (budget.trade_id.clone(), budget.clone()))
            .collect();
        state.session.load_budgets(&fetched.budgets);
        state.snapshots = fetched.snapshots;
        state.project = Some(fetched.project);
        tracing::debug!(project_id, "reloaded bid matrix from store");
        Ok(())
    }

    // ─── Viewing ────────────────────────────────────────────────────────

    pub async fn effective_matrix(&self) -> EffectiveMatrix {
        self.state.lock().await.effective()
    }

    pub async fn select_snapshot(&self, snapshot_id: Option<&str>) -> AppResult<EffectiveMatrix> {
        let mut state = self.state.lock().await;
        match snapshot_id {
            Some(snapshot_id) => {
                if !state.snapshots.iter().any(|snap| snap.id == snapshot_id) {
                    return Err(AppError::NotFound(format!(
                        "snapshot {snapshot_id} does not exist"
                    )));
                }
                let items = self.store.get_snapshot_items(snapshot_id).await?;
                state.snapshot_items = items;
                state.session.select_snapshot(Some(snapshot_id.to_string()));
            }
            None => {
                state.snapshot_items.clear();
                state.session.select_snapshot(None);
            }
        }
        Ok(state.effective())
    }

    pub async fn list_snapshots(&self) -> Vec<LevelingSnapshot> {
        self.state.lock().await.snapshots.clone()
    }

    // ─── Statistics ─────────────────────────────────────────────────────

    pub async fn trade_statistics(&self, trade_id: &str) -> AppResult<TradeStats> {
        let state = self.state.lock().await;
        if !state.matrix.bids_by_trade.contains_key(trade_id) {
            return Err(AppError::NotFound(format!("trade {trade_id} does not exist")));
        }
        let budget = state.budgets.get(trade_id).and_then(|budget| budget.amount);
        Ok(trade_stats(state.matrix.trade_bids(trade_id), budget))
    }

    pub async fn trade_is_at_risk(&self, trade_id: &str) -> AppResult<bool> {
        let stats = self.trade_statistics(trade_id).await?;
        Ok(stats.is_at_risk(self.settings.at_risk_spread_percent))
    }

    pub async fn coverage(&self) -> AppResult<CoverageReport> {
        let state = self.state.lock().await;
        state.project_id()?;
        let bids: Vec<Bid> = state.matrix.all_bids().cloned().collect();
        Ok(coverage_report(
            &state.matrix.trades,
            &bids,
            self.settings.target_bids_per_trade,
        ))
    }

    pub async fn project_risk(&self, now: DateTime<Utc>) -> AppResult<ProjectRiskStatus> {
        let report = self.coverage().await?;
        let state = self.state.lock().await;
        let due = state.project.as_ref().and_then(|project| project.due_date);
        Ok(report.risk_status(due_in_days(due, now)))
    }

    // ─── Budget edits ───────────────────────────────────────────────────

    pub async fn edit_budget(
        &self,
        trade_id: &str,
        amount: Option<f64>,
        notes: &str,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_live_view()?;
        if !state.matrix.bids_by_trade.contains_key(trade_id) {
            return Err(AppError::NotFound(format!("trade {trade_id} does not exist")));
        }
        state.session.edit_budget(trade_id, amount, notes);
        Ok(())
    }

    // ─── Bid detail edits ───────────────────────────────────────────────

    pub async fn open_bid_editor(&self, trade_id: &str, sub_id: &str) -> AppResult<BidDraft> {
        let mut state = self.state.lock().await;
        state.ensure_live_view()?;
        let project_id = state.project_id()?;
        let bid = state
            .matrix
            .bid_at(trade_id, sub_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no bid at {trade_id}:{sub_id}")))?;
        let breakdown = self
            .store
            .get_bid_breakdown(&project_id, trade_id, sub_id)
            .await?;
        let draft = BidDraft::from_bid(&bid, &breakdown);
        state
            .session
            .open_bid_edit(ActiveBidEdit::new(trade_id, sub_id, draft.clone()));
        Ok(draft)
    }

    pub async fn update_bid_draft(&self, draft: BidDraft) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_live_view()?;
        if state.session.active_bid().is_none() {
            return Err(AppError::Validation("no bid is open for editing".to_string()));
        }
        state.session.set_bid_draft(draft);
        Ok(())
    }

    pub async fn close_bid_editor(&self) {
        let mut state = self.state.lock().await;
        state.session.close_bid_edit();
    }

    pub async fn has_unsaved_changes(&self) -> bool {
        self.state.lock().await.session.has_unsaved_changes()
    }

    // ─── Save / discard ─────────────────────────────────────────────────

    /// Persists the active bid draft first (its derived total becomes the
    /// bid's base amount) and only then flushes dirty budgets. Any failure
    /// stops the protocol with every unsaved edit still marked dirty.
    pub async fn save_changes(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_live_view()?;
        let project_id = state.project_id()?;

        if let Some(edit) = state.session.active_bid().filter(|edit| edit.is_dirty()) {
            let draft = edit.draft.clone();
            let trade_id = edit.trade_id.clone();
            let sub_id = edit.sub_id.clone();

            let payload = UpsertBidPayload {
                project_id: project_id.clone(),
                trade_id: trade_id.clone(),
                sub_id: sub_id.clone(),
                status: draft.status,
                base_bid_amount: draft.base_bid_total(),
                received_at: draft.received_at,
                notes: draft.notes.clone(),
            };
            if let Err(err) = self.store.upsert_bid(&payload).await {
                tracing::warn!(%trade_id, %sub_id, err = %err, "bid detail save failed");
                return Err(err);
            }

            let breakdown = BidBreakdownPayload {
                project_id: project_id.clone(),
                trade_id: trade_id.clone(),
                sub_id: sub_id.clone(),
                line_items: draft.line_items.clone(),
                alternates: draft.alternates.clone(),
            };
            if let Err(err) = self.store.upsert_bid_breakdown(&breakdown).await {
                // The bid row is committed at this point; only the
                // breakdown needs a retry.
                tracing::warn!(%trade_id, %sub_id, err = %err, "bid breakdown save failed");
                return Err(AppError::Breakdown(err.to_string()));
            }

            state.session.mark_bid_saved();
        }

        for trade_id in state.session.dirty_budget_trades() {
            let draft = state.session.budget_draft(&trade_id);
            let payload = UpsertBudgetPayload {
                project_id: project_id.clone(),
                trade_id: trade_id.clone(),
                amount: draft.amount,
                notes: draft.notes.clone(),
            };
            if let Err(err) = self.store.upsert_budget(&payload).await {
                tracing::warn!(%trade_id, err = %err, "budget save failed");
                return Err(err);
            }
            state.session.mark_budget_saved(&trade_id);
        }

        self.refetch(&mut state, &project_id).await
    }

    /// Resets all drafts to their last-loaded values. Local only; never
    /// touches persisted data.
    pub async fn discard_changes(&self) {
        let mut state = self.state.lock().await;
        state.session.discard();
    }

    // ─── Remove with undo ───────────────────────────────────────────────

    /// Deletes the bid immediately but keeps its full field set in memory
    /// for a bounded undo window.
    pub async fn remove_sub_from_trade(&self, trade_id: &str, sub_id: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_live_view()?;
        let project_id = state.project_id()?;
        let bid = state
            .matrix
            .bid_at(trade_id, sub_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no bid at {trade_id}:{sub_id}")))?;

        let breakdown = self
            .store
            .get_bid_breakdown(&project_id, trade_id, sub_id)
            .await?;
        self.store.remove_bid(&project_id, trade_id, sub_id).await?;

        if state
            .session
            .active_bid()
            .is_some_and(|edit| edit.trade_id == trade_id && edit.sub_id == sub_id)
        {
            state.session.close_bid_edit();
        }

        state.undo_counter += 1;
        let token = state.undo_counter;
        let window = Duration::from_secs(self.settings.undo_window_seconds);
        state.pending_undo = Some(PendingUndo {
            bid,
            breakdown,
            expires_at: Utc::now()
                + chrono::Duration::milliseconds(window.as_millis() as i64),
            token,
        });

        // Single-shot expiry; a newer deletion or an explicit dismissal
        // invalidates the token.
        let shared = Arc::clone(&self.state);
        tokio::spawn(async move {
            sleep(window).await;
            let mut state = shared.lock().await;
            if state
                .pending_undo
                .as_ref()
                .is_some_and(|pending| pending.token == token)
            {
                state.pending_undo = None;
            }
        });

        self.refetch(&mut state, &project_id).await
    }

    /// Re-creates the most recently deleted bid with the exact field
    /// values it had. Returns false once the window has elapsed.
    pub async fn undo_remove(&self) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        state.ensure_live_view()?;
        let project_id = state.project_id()?;

        let Some(pending) = state.pending_undo.take() else {
            return Ok(false);
        };
        if Utc::now() >= pending.expires_at {
            return Ok(false);
        }

        let payload = UpsertBidPayload {
            project_id: project_id.clone(),
            trade_id: pending.bid.trade_id.clone(),
            sub_id: pending.bid.sub_id.clone(),
            status: pending.bid.status,
            base_bid_amount: pending.bid.base_bid_amount,
            received_at: pending.bid.received_at,
            notes: pending.bid.notes.clone(),
        };
        self.store.upsert_bid(&payload).await?;

        if !pending.breakdown.line_items.is_empty() || !pending.breakdown.alternates.is_empty() {
            let breakdown = BidBreakdownPayload {
                project_id: project_id.clone(),
                trade_id: pending.bid.trade_id.clone(),
                sub_id: pending.bid.sub_id.clone(),
                line_items: pending
                    .breakdown
                    .line_items
                    .iter()
                    .map(|item| crate::models::LineItemInput {
                        description: item.description.clone(),
                        amount: item.amount,
                    })
                    .collect(),
                alternates: pending
                    .breakdown
                    .alternates
                    .iter()
                    .map(|alt| crate::models::AlternateInput {
                        description: alt.description.clone(),
                        amount: alt.amount,
                        accepted: alt.accepted,
                    })
                    .collect(),
            };
            self.store.upsert_bid_breakdown(&breakdown).await?;
        }

        self.refetch(&mut state, &project_id).await?;
        Ok(true)
    }

    pub async fn dismiss_undo(&self) {
        let mut state = self.state.lock().await;
        state.pending_undo = None;
    }

    // ─── Snapshot creation ──────────────────────────────────────────────

    /// Freezes the current live matrix: one item per trade × sub pair,
    /// written atomically by the store.
    pub async fn create_leveling_snapshot(
        &self,
        title: &str,
        note: Option<&str>,
        created_by: &str,
    ) -> AppResult<LevelingSnapshot> {
        let mut state = self.state.lock().await;
        state.ensure_live_view()?;
        let project_id = state.project_id()?;
        if title.trim().is_empty() {
            return Err(AppError::Validation("snapshot title cannot be empty".to_string()));
        }

        let items = snapshot_items_for(&state.matrix, note);
        let payload = CreateSnapshotPayload {
            project_id: project_id.clone(),
            title: title.trim().to_string(),
            note: note.map(ToString::to_string),
            created_by: created_by.to_string(),
            items,
        };
        let snapshot = self.store.create_snapshot(&payload).await?;
        tracing::info!(
            snapshot_id = %snapshot.id,
            title = %snapshot.title,
            "leveling snapshot created"
        );

        self.refetch(&mut state, &project_id).await?;
        Ok(snapshot)
    }
}
