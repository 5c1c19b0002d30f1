use crate::matrix::LevelingMatrix;
use crate::models::{Bid, BidStatus, ProjectSub, SnapshotItem, SnapshotItemDraft, Trade};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Id prefix for cells synthesized from a snapshot item whose live bid no
/// longer exists. Keeps them from ever being mistaken for editable rows.
pub const SNAPSHOT_CELL_PREFIX: &str = "snapshot-";

/// One read-only cell of the effective matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveBid {
    pub id: String,
    pub trade_id: String,
    pub sub_id: String,
    pub status: BidStatus,
    pub base_bid_amount: Option<f64>,
    pub received_at: Option<DateTime<Utc>>,
    pub notes: String,
    pub is_low: bool,
    pub from_snapshot: bool,
}

impl EffectiveBid {
    fn from_live(bid: &Bid) -> Self {
        Self {
            id: bid.id.clone(),
            trade_id: bid.trade_id.clone(),
            sub_id: bid.sub_id.clone(),
            status: bid.status,
            base_bid_amount: bid.base_bid_amount,
            received_at: bid.received_at,
            notes: bid.notes.clone(),
            is_low: false,
            from_snapshot: false,
        }
    }
}

/// The matrix as displayed: either the live matrix verbatim or a frozen
/// snapshot overlaid on it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveMatrix {
    pub snapshot_id: Option<String>,
    pub trades: Vec<Trade>,
    pub subs: Vec<ProjectSub>,
    pub cells_by_trade: HashMap<String, Vec<EffectiveBid>>,
}

impl EffectiveMatrix {
    pub fn cell_at(&self, trade_id: &str, sub_id: &str) -> Option<&EffectiveBid> {
        self.cells_by_trade
            .get(trade_id)?
            .iter()
            .find(|cell| cell.sub_id == sub_id)
    }

    pub fn trade_cells(&self, trade_id: &str) -> &[EffectiveBid] {
        self.cells_by_trade
            .get(trade_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Live view: exactly the live matrix, no merge step.
pub fn live_view(matrix: &LevelingMatrix) -> EffectiveMatrix {
    let mut cells_by_trade: HashMap<String, Vec<EffectiveBid>> = HashMap::new();
    for trade in &matrix.trades {
        let cells = matrix
            .trade_bids(&trade.id)
            .iter()
            .map(EffectiveBid::from_live)
            .collect();
        cells_by_trade.insert(trade.id.clone(), cells);
    }
    let mut effective = EffectiveMatrix {
        snapshot_id: None,
        trades: matrix.trades.clone(),
        subs: matrix.subs.clone(),
        cells_by_trade,
    };
    mark_low_bids(&mut effective);
    effective
}

/// Snapshot view: every frozen cell overlays or replaces its live
/// counterpart; live bids the snapshot never captured are absent.
pub fn snapshot_view(
    matrix: &LevelingMatrix,
    snapshot_id: &str,
    items: &[SnapshotItem],
) -> EffectiveMatrix {
    let mut cells_by_trade: HashMap<String, Vec<EffectiveBid>> = matrix
        .trades
        .iter()
        .map(|trade| (trade.id.clone(), Vec::new()))
        .collect();

    for item in items {
        let cell = match matrix.bid_at(&item.trade_id, &item.sub_id) {
            Some(live) => {
                // Amount and notes come from the freeze; status and the
                // rest of the live row pass through (never frozen).
                let mut cell = EffectiveBid::from_live(live);
                cell.base_bid_amount = item.base_bid_amount;
                cell.notes = item.notes.clone();
                cell.from_snapshot = true;
                cell
            }
            None => EffectiveBid {
                id: format!("{SNAPSHOT_CELL_PREFIX}{}", item.id),
                trade_id: item.trade_id.clone(),
                sub_id: item.sub_id.clone(),
                status: BidStatus::Submitted,
                base_bid_amount: item.base_bid_amount,
                received_at: None,
                notes: item.notes.clone(),
                is_low: false,
                from_snapshot: true,
            },
        };
        cells_by_trade
            .entry(item.trade_id.clone())
            .or_default()
            .push(cell);
    }

    let name_order: HashMap<&str, String> = matrix
        .subs
        .iter()
        .map(|sub| (sub.id.as_str(), sub.company_name.to_lowercase()))
        .collect();
    for cells in cells_by_trade.values_mut() {
        cells.sort_by_key(|cell| {
            name_order
                .get(cell.sub_id.as_str())
                .cloned()
                .unwrap_or_else(|| cell.sub_id.clone())
        });
    }

    let mut effective = EffectiveMatrix {
        snapshot_id: Some(snapshot_id.to_string()),
        trades: matrix.trades.clone(),
        subs: matrix.subs.clone(),
        cells_by_trade,
    };
    mark_low_bids(&mut effective);
    effective
}

/// Capture the full trade × sub cross product for a new snapshot, one item
/// per pair whether or not a bid exists yet, so the freeze always covers
/// the complete matrix shape.
pub fn snapshot_items_for(matrix: &LevelingMatrix, note: Option<&str>) -> Vec<SnapshotItemDraft> {
    let mut items = Vec::with_capacity(matrix.trades.len() * matrix.subs.len());
    for trade in &matrix.trades {
        for sub in &matrix.subs {
            let live = matrix.bid_at(&trade.id, &sub.id);
            items.push(SnapshotItemDraft {
                trade_id: trade.id.clone(),
                sub_id: sub.id.clone(),
                base_bid_amount: live.and_then(|bid| bid.base_bid_amount),
                notes: join_notes(note, live.map(|bid| bid.notes.as_str())),
            });
        }
    }
    items
}

fn join_notes(snapshot_note: Option<&str>, bid_notes: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(note) = snapshot_note {
        if !note.trim().is_empty() {
            parts.push(note.trim());
        }
    }
    if let Some(notes) = bid_notes {
        if !notes.trim().is_empty() {
            parts.push(notes.trim());
        }
    }
    parts.join(" | ")
}

/// Marks the lowest-priced submitted cell(s) per trade. Runs over both
/// live and snapshot views so frozen comparisons still highlight the low.
fn mark_low_bids(effective: &mut EffectiveMatrix) {
    for cells in effective.cells_by_trade.values_mut() {
        let low = cells
            .iter()
            .filter(|cell| cell.status == BidStatus::Submitted)
            .filter_map(|cell| cell.base_bid_amount)
            .fold(None::<f64>, |acc, amount| {
                Some(acc.map_or(amount, |current| current.min(amount)))
            });
        if let Some(low) = low {
            for cell in cells.iter_mut() {
                cell.is_low = cell.status == BidStatus::Submitted
                    && cell.base_bid_amount == Some(low);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{live_view, snapshot_items_for, snapshot_view, SNAPSHOT_CELL_PREFIX};
    use crate::matrix::build_matrix;
    use crate::models::{Bid, BidStatus, ProjectSub, SnapshotItem, Trade};
    use chrono::Utc;

    fn trade(id: &str, name: &str, sort_order: i64) -> Trade {
        Trade {
            id: id.to_string(),
            project_id: "p1".to_string(),
            name: name.to_string(),
            sort_order,
        }
    }

    fn sub(id: &str, company: &str, sort_order: i64) -> ProjectSub {
        ProjectSub {
            id: id.to_string(),
            project_id: "p1".to_string(),
            subcontractor_id: format!("co-{id}"),
            company_name: company.to_string(),
            sort_order,
            invited_at: Utc::now(),
        }
    }

    fn bid(trade_id: &str, sub_id: &str, status: BidStatus, amount: Option<f64>) -> Bid {
        Bid {
            id: format!("bid-{trade_id}-{sub_id}"),
            project_id: "p1".to_string(),
            trade_id: trade_id.to_string(),
            sub_id: sub_id.to_string(),
            status,
            base_bid_amount: amount,
            received_at: None,
            notes: format!("notes {sub_id}"),
        }
    }

    fn item(id: &str, trade_id: &str, sub_id: &str, amount: Option<f64>) -> SnapshotItem {
        SnapshotItem {
            id: id.to_string(),
            snapshot_id: "snap1".to_string(),
            trade_id: trade_id.to_string(),
            sub_id: sub_id.to_string(),
            base_bid_amount: amount,
            notes: format!("frozen {sub_id}"),
        }
    }

    #[test]
    fn live_view_mirrors_matrix_and_marks_low() {
        let trades = vec![trade("t1", "Electrical", 1)];
        let subs = vec![sub("a", "Acme", 1), sub("b", "Bolt", 2)];
        let bids = vec![
            bid("t1", "a", BidStatus::Submitted, Some(100.0)),
            bid("t1", "b", BidStatus::Submitted, Some(90.0)),
        ];
        let matrix = build_matrix(&trades, &subs, &bids);
        let view = live_view(&matrix);
        assert_eq!(view.snapshot_id, None);
        assert_eq!(view.trade_cells("t1").len(), 2);
        assert!(view.cell_at("t1", "b").unwrap().is_low);
        assert!(!view.cell_at("t1", "a").unwrap().is_low);
    }

    #[test]
    fn snapshot_overrides_amount_and_notes_but_not_status() {
        let trades = vec![trade("t1", "Electrical", 1)];
        let subs = vec![sub("a", "Acme", 1)];
        let bids = vec![bid("t1", "a", BidStatus::Bidding, Some(200.0))];
        let matrix = build_matrix(&trades, &subs, &bids);
        let items = vec![item("i1", "t1", "a", Some(150.0))];
        let view = snapshot_view(&matrix, "snap1", &items);
        let cell = view.cell_at("t1", "a").unwrap();
        assert_eq!(cell.base_bid_amount, Some(150.0));
        assert_eq!(cell.notes, "frozen a");
        assert_eq!(cell.status, BidStatus::Bidding, "status is never frozen");
        assert!(cell.from_snapshot);
        assert_eq!(cell.id, "bid-t1-a", "live row keeps its identity");
    }

    #[test]
    fn removed_cell_is_synthesized_as_read_only_placeholder() {
        let trades = vec![trade("t1", "Electrical", 1)];
        let matrix = build_matrix(&trades, &[sub("a", "Acme", 1)], &[]);
        let items = vec![item("i7", "t1", "gone", Some(75.0))];
        let view = snapshot_view(&matrix, "snap1", &items);
        let cell = view.cell_at("t1", "gone").unwrap();
        assert_eq!(cell.id, format!("{SNAPSHOT_CELL_PREFIX}i7"));
        assert_eq!(cell.status, BidStatus::Submitted);
        assert_eq!(cell.base_bid_amount, Some(75.0));
    }

    #[test]
    fn snapshot_ignores_bids_added_after_the_freeze() {
        // Scenario: snapshot froze SubA ($50,000) and an empty SubB cell;
        // SubB's bid was later deleted and SubC arrived afterwards.
        let trades = vec![trade("t1", "Concrete", 1)];
        let subs = vec![sub("a", "Acme", 1), sub("c", "Carver", 3)];
        let bids = vec![
            bid("t1", "a", BidStatus::Submitted, Some(50_000.0)),
            bid("t1", "c", BidStatus::Submitted, Some(48_000.0)),
        ];
        let matrix = build_matrix(&trades, &subs, &bids);
        let items = vec![
            item("i1", "t1", "a", Some(50_000.0)),
            item("i2", "t1", "b", None),
        ];
        let view = snapshot_view(&matrix, "snap1", &items);
        assert_eq!(view.trade_cells("t1").len(), 2);
        assert_eq!(
            view.cell_at("t1", "a").unwrap().base_bid_amount,
            Some(50_000.0)
        );
        assert_eq!(view.cell_at("t1", "b").unwrap().base_bid_amount, None);
        assert!(view.cell_at("t1", "c").is_none());
    }

    #[test]
    fn returning_to_live_view_is_idempotent() {
        let trades = vec![trade("t1", "Electrical", 1)];
        let subs = vec![sub("a", "Acme", 1)];
        let bids = vec![bid("t1", "a", BidStatus::Submitted, Some(100.0))];
        let matrix = build_matrix(&trades, &subs, &bids);

        let before = live_view(&matrix);
        let _frozen = snapshot_view(&matrix, "snap1", &[item("i1", "t1", "a", Some(1.0))]);
        let after = live_view(&matrix);
        assert_eq!(before.trade_cells("t1"), after.trade_cells("t1"));
    }

    #[test]
    fn capture_covers_the_full_cross_product() {
        let trades = vec![trade("t1", "Concrete", 1), trade("t2", "Electrical", 2)];
        let subs = vec![sub("a", "Acme", 1), sub("b", "Bolt", 2)];
        let bids = vec![bid("t1", "a", BidStatus::Submitted, Some(10.0))];
        let matrix = build_matrix(&trades, &subs, &bids);

        let items = snapshot_items_for(&matrix, Some("award review"));
        assert_eq!(items.len(), 4);
        let populated = items
            .iter()
            .find(|i| i.trade_id == "t1" && i.sub_id == "a")
            .unwrap();
        assert_eq!(populated.base_bid_amount, Some(10.0));
        assert_eq!(populated.notes, "award review | notes a");
        let empty = items
            .iter()
            .find(|i| i.trade_id == "t2" && i.sub_id == "b")
            .unwrap();
        assert_eq!(empty.base_bid_amount, None);
        assert_eq!(empty.notes, "award review");
    }

    #[test]
    fn every_trade_key_exists_in_snapshot_view() {
        let trades = vec![trade("t1", "Concrete", 1), trade("t2", "Electrical", 2)];
        let matrix = build_matrix(&trades, &[], &[]);
        let view = snapshot_view(&matrix, "snap1", &[]);
        assert!(view.cells_by_trade.contains_key("t1"));
        assert!(view.cells_by_trade.contains_key("t2"));
    }
}
