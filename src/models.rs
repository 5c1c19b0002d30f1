use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BidStatus {
    Invited,
    Bidding,
    Submitted,
    Declined,
    NoResponse,
}

impl BidStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::Bidding => "bidding",
            Self::Submitted => "submitted",
            Self::Declined => "declined",
            Self::NoResponse => "no-response",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "invited" => Some(Self::Invited),
            "bidding" => Some(Self::Bidding),
            "submitted" => Some(Self::Submitted),
            "declined" => Some(Self::Declined),
            "no-response" => Some(Self::NoResponse),
            _ => None,
        }
    }

    /// Invited and bidding subs are still expected to respond.
    pub fn is_awaiting_response(self) -> bool {
        matches!(self, Self::Invited | Self::Bidding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectRiskStatus {
    Healthy,
    AtRisk,
    Critical,
}

impl ProjectRiskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::AtRisk => "at-risk",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSub {
    pub id: String,
    pub project_id: String,
    pub subcontractor_id: String,
    pub company_name: String,
    pub sort_order: i64,
    pub invited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: String,
    pub project_id: String,
    pub trade_id: String,
    pub sub_id: String,
    pub status: BidStatus,
    pub base_bid_amount: Option<f64>,
    pub received_at: Option<DateTime<Utc>>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidLineItem {
    pub id: String,
    pub bid_id: String,
    pub description: String,
    pub amount: f64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidAlternate {
    pub id: String,
    pub bid_id: String,
    pub description: String,
    pub amount: f64,
    pub accepted: bool,
    pub position: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidBreakdown {
    pub line_items: Vec<BidLineItem>,
    pub alternates: Vec<BidAlternate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub project_id: String,
    pub trade_id: String,
    pub amount: Option<f64>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelingSnapshot {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub note: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotItem {
    pub id: String,
    pub snapshot_id: String,
    pub trade_id: String,
    pub sub_id: String,
    pub base_bid_amount: Option<f64>,
    pub notes: String,
}

/// One consolidated read of everything the leveling screen needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBidMatrix {
    pub project: Project,
    pub trades: Vec<Trade>,
    pub project_subs: Vec<ProjectSub>,
    pub bids: Vec<Bid>,
    pub budgets: Vec<Budget>,
    pub snapshots: Vec<LevelingSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemInput {
    pub description: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternateInput {
    pub description: String,
    pub amount: f64,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertBidPayload {
    pub project_id: String,
    pub trade_id: String,
    pub sub_id: String,
    pub status: BidStatus,
    pub base_bid_amount: Option<f64>,
    pub received_at: Option<DateTime<Utc>>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidBreakdownPayload {
    pub project_id: String,
    pub trade_id: String,
    pub sub_id: String,
    pub line_items: Vec<LineItemInput>,
    pub alternates: Vec<AlternateInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertBudgetPayload {
    pub project_id: String,
    pub trade_id: String,
    pub amount: Option<f64>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotItemDraft {
    pub trade_id: String,
    pub sub_id: String,
    pub base_bid_amount: Option<f64>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotPayload {
    pub project_id: String,
    pub title: String,
    pub note: Option<String>,
    pub created_by: String,
    pub items: Vec<SnapshotItemDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LevelingSettings {
    pub target_bids_per_trade: u32,
    pub undo_window_seconds: u64,
    pub at_risk_spread_percent: f64,
}

impl Default for LevelingSettings {
    fn default() -> Self {
        Self {
            target_bids_per_trade: 3,
            undo_window_seconds: 6,
            at_risk_spread_percent: 10.0,
        }
    }
}
