use crate::models::{AlternateInput, Bid, BidBreakdown, BidStatus, Budget, LineItemInput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDraft {
    pub amount: Option<f64>,
    pub notes: String,
}

impl BudgetDraft {
    pub fn from_budget(budget: &Budget) -> Self {
        Self {
            amount: budget.amount,
            notes: budget.notes.clone(),
        }
    }
}

/// In-progress detail edit for one bid cell. The derived total becomes the
/// bid's base amount when saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidDraft {
    pub status: BidStatus,
    pub base_amount: Option<f64>,
    pub received_at: Option<DateTime<Utc>>,
    pub notes: String,
    pub line_items: Vec<LineItemInput>,
    pub alternates: Vec<AlternateInput>,
}

impl Default for BidDraft {
    fn default() -> Self {
        Self {
            status: BidStatus::Invited,
            base_amount: None,
            received_at: None,
            notes: String::new(),
            line_items: Vec::new(),
            alternates: Vec::new(),
        }
    }
}

impl BidDraft {
    pub fn from_bid(bid: &Bid, breakdown: &BidBreakdown) -> Self {
        Self {
            status: bid.status,
            base_amount: bid.base_bid_amount,
            received_at: bid.received_at,
            notes: bid.notes.clone(),
            line_items: breakdown
                .line_items
                .iter()
                .map(|item| LineItemInput {
                    description: item.description.clone(),
                    amount: item.amount,
                })
                .collect(),
            alternates: breakdown
                .alternates
                .iter()
                .map(|alt| AlternateInput {
                    description: alt.description.clone(),
                    amount: alt.amount,
                    accepted: alt.accepted,
                })
                .collect(),
        }
    }

    /// Line items take precedence over a directly entered amount.
    pub fn base_bid_total(&self) -> Option<f64> {
        if self.line_items.is_empty() {
            self.base_amount
        } else {
            Some(self.line_items.iter().map(|item| item.amount).sum())
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActiveBidEdit {
    pub trade_id: String,
    pub sub_id: String,
    pub draft: BidDraft,
    loaded: BidDraft,
}

impl ActiveBidEdit {
    pub fn new(trade_id: &str, sub_id: &str, draft: BidDraft) -> Self {
        Self {
            trade_id: trade_id.to_string(),
            sub_id: sub_id.to_string(),
            loaded: draft.clone(),
            draft,
        }
    }

    /// Dirty whenever the draft serializes differently from the state it
    /// was loaded with.
    pub fn is_dirty(&self) -> bool {
        serde_json::to_value(&self.draft).ok() != serde_json::to_value(&self.loaded).ok()
    }

    pub fn mark_saved(&mut self) {
        self.loaded = self.draft.clone();
    }

    pub fn revert(&mut self) {
        self.draft = self.loaded.clone();
    }
}

/// All unsaved edit state for one leveling screen. Owned by the
/// controller; mutated only through these message-style commands so the
/// reconciliation protocol is testable without a UI harness.
#[derive(Debug, Default)]
pub struct EditSession {
    budgets_loaded: HashMap<String, BudgetDraft>,
    budget_drafts: HashMap<String, BudgetDraft>,
    dirty_budgets: BTreeSet<String>,
    active_bid: Option<ActiveBidEdit>,
    selected_snapshot: Option<String>,
}

impl EditSession {
    /// Reseeds last-saved budget values after a full refetch. Dirty flags
    /// are dropped: the store is now the source of truth.
    pub fn load_budgets(&mut self, budgets: &[Budget]) {
        self.budgets_loaded = budgets
            .iter()
            .map(|budget| (budget.trade_id.clone(), BudgetDraft::from_budget(budget)))
            .collect();
        self.budget_drafts = self.budgets_loaded.clone();
        self.dirty_budgets.clear();
    }

    pub fn budget_draft(&self, trade_id: &str) -> BudgetDraft {
        self.budget_drafts.get(trade_id).cloned().unwrap_or_default()
    }

    pub fn edit_budget(&mut self, trade_id: &str, amount: Option<f64>, notes: &str) {
        let draft = BudgetDraft {
            amount,
            notes: notes.to_string(),
        };
        let loaded = self.budgets_loaded.get(trade_id).cloned().unwrap_or_default();
        if draft == loaded {
            self.dirty_budgets.remove(trade_id);
        } else {
            self.dirty_budgets.insert(trade_id.to_string());
        }
        self.budget_drafts.insert(trade_id.to_string(), draft);
    }

    /// Dirty trade ids in deterministic (sorted) flush order.
    pub fn dirty_budget_trades(&self) -> Vec<String> {
        self.dirty_budgets.iter().cloned().collect()
    }

    /// Called after one budget upsert succeeds: that trade's draft is now
    /// the last-saved value.
    pub fn mark_budget_saved(&mut self, trade_id: &str) {
        let draft = self.budget_draft(trade_id);
        self.budgets_loaded.insert(trade_id.to_string(), draft);
        self.dirty_budgets.remove(trade_id);
    }

    pub fn open_bid_edit(&mut self, edit: ActiveBidEdit) {
        self.active_bid = Some(edit);
    }

    pub fn close_bid_edit(&mut self) {
        self.active_bid = None;
    }

    pub fn active_bid(&self) -> Option<&ActiveBidEdit> {
        self.active_bid.as_ref()
    }

    pub fn set_bid_draft(&mut self, draft: BidDraft) {
        if let Some(edit) = self.active_bid.as_mut() {
            edit.draft = draft;
        }
    }

    pub fn mark_bid_saved(&mut self) {
        if let Some(edit) = self.active_bid.as_mut() {
            edit.mark_saved();
        }
    }

    /// Resets every draft to its last-loaded value. Never touches
    /// persisted data.
    pub fn discard(&mut self) {
        self.budget_drafts = self.budgets_loaded.clone();
        self.dirty_budgets.clear();
        if let Some(edit) = self.active_bid.as_mut() {
            edit.revert();
        }
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.dirty_budgets.is_empty()
            || self.active_bid.as_ref().is_some_and(ActiveBidEdit::is_dirty)
    }

    pub fn selected_snapshot(&self) -> Option<&str> {
        self.selected_snapshot.as_deref()
    }

    pub fn select_snapshot(&mut self, snapshot_id: Option<String>) {
        self.selected_snapshot = snapshot_id;
    }
}
