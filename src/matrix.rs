use crate::models::{Bid, ProjectSub, Trade};
use std::collections::{HashMap, HashSet};

/// Canonical cell key for the sparse trade × sub matrix. Every index and
/// snapshot overlay joins the two ids with a literal `:` — alternate
/// layouts (nested maps, tuple keys) must stay substitutable with this.
pub fn cell_key(trade_id: &str, sub_id: &str) -> String {
    format!("{trade_id}:{sub_id}")
}

#[derive(Debug, Clone, Default)]
pub struct LevelingMatrix {
    /// Trades in display order: dense 1-based rank, ties broken by name.
    pub trades: Vec<Trade>,
    /// Invited subs deduplicated by underlying subcontractor, first
    /// invitation wins; invitation order preserved.
    pub subs: Vec<ProjectSub>,
    /// Every trade id is present, even with zero bids.
    pub bids_by_trade: HashMap<String, Vec<Bid>>,
    pub bids_by_cell: HashMap<String, Bid>,
}

impl LevelingMatrix {
    pub fn bid_at(&self, trade_id: &str, sub_id: &str) -> Option<&Bid> {
        self.bids_by_cell.get(&cell_key(trade_id, sub_id))
    }

    pub fn trade_bids(&self, trade_id: &str) -> &[Bid] {
        self.bids_by_trade
            .get(trade_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn sub_name(&self, sub_id: &str) -> Option<&str> {
        self.subs
            .iter()
            .find(|sub| sub.id == sub_id)
            .map(|sub| sub.company_name.as_str())
    }

    pub fn all_bids(&self) -> impl Iterator<Item = &Bid> {
        self.bids_by_cell.values()
    }
}

/// Assembles the full matrix for one project from raw entity rows.
pub fn build_matrix(trades: &[Trade], project_subs: &[ProjectSub], bids: &[Bid]) -> LevelingMatrix {
    let mut ordered_trades = trades.to_vec();
    ordered_trades.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut ordered_subs = project_subs.to_vec();
    ordered_subs.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.invited_at.cmp(&b.invited_at))
    });

    let mut seen_subcontractors = HashSet::new();
    let mut subs = Vec::new();
    for sub in ordered_subs {
        if seen_subcontractors.insert(sub.subcontractor_id.clone()) {
            subs.push(sub);
        }
    }

    let company_names: HashMap<&str, &str> = project_subs
        .iter()
        .map(|sub| (sub.id.as_str(), sub.company_name.as_str()))
        .collect();

    let mut bids_by_trade: HashMap<String, Vec<Bid>> = ordered_trades
        .iter()
        .map(|trade| (trade.id.clone(), Vec::new()))
        .collect();
    let mut bids_by_cell = HashMap::with_capacity(bids.len());

    for bid in bids {
        bids_by_trade
            .entry(bid.trade_id.clone())
            .or_default()
            .push(bid.clone());
        bids_by_cell.insert(cell_key(&bid.trade_id, &bid.sub_id), bid.clone());
    }

    for list in bids_by_trade.values_mut() {
        list.sort_by_key(|bid| {
            company_names
                .get(bid.sub_id.as_str())
                .map(|name| name.to_lowercase())
                .unwrap_or_else(|| bid.sub_id.clone())
        });
    }

    LevelingMatrix {
        trades: ordered_trades,
        subs,
        bids_by_trade,
        bids_by_cell,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_matrix, cell_key};
    use crate::models::{Bid, BidStatus, ProjectSub, Trade};
    use chrono::{Duration, Utc};

    fn trade(id: &str, name: &str, sort_order: i64) -> Trade {
        Trade {
            id: id.to_string(),
            project_id: "p1".to_string(),
            name: name.to_string(),
            sort_order,
        }
    }

    fn sub(id: &str, subcontractor_id: &str, company: &str, sort_order: i64) -> ProjectSub {
        ProjectSub {
            id: id.to_string(),
            project_id: "p1".to_string(),
            subcontractor_id: subcontractor_id.to_string(),
            company_name: company.to_string(),
            sort_order,
            invited_at: Utc::now() + Duration::seconds(sort_order),
        }
    }

    fn bid(trade_id: &str, sub_id: &str) -> Bid {
        Bid {
            id: format!("bid-{trade_id}-{sub_id}"),
            project_id: "p1".to_string(),
            trade_id: trade_id.to_string(),
            sub_id: sub_id.to_string(),
            status: BidStatus::Invited,
            base_bid_amount: None,
            received_at: None,
            notes: String::new(),
        }
    }

    #[test]
    fn cell_key_joins_with_colon() {
        assert_eq!(cell_key("t1", "s9"), "t1:s9");
    }

    #[test]
    fn duplicate_invitations_collapse_to_first_seen() {
        let subs = vec![
            sub("ps1", "acme", "Acme Electric", 1),
            sub("ps2", "volt", "Volt Bros", 2),
            sub("ps3", "acme", "Acme Electric", 3),
        ];
        let matrix = build_matrix(&[], &subs, &[]);
        let ids: Vec<&str> = matrix.subs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ps1", "ps2"]);
    }

    #[test]
    fn every_trade_key_exists_even_without_bids() {
        let trades = vec![trade("t1", "Concrete", 1), trade("t2", "Electrical", 2)];
        let bids = vec![bid("t1", "ps1")];
        let matrix = build_matrix(&trades, &[sub("ps1", "acme", "Acme", 1)], &bids);
        assert_eq!(matrix.trade_bids("t1").len(), 1);
        assert!(matrix.bids_by_trade.contains_key("t2"));
        assert!(matrix.trade_bids("t2").is_empty());
    }

    #[test]
    fn trade_order_breaks_ties_by_name() {
        let trades = vec![
            trade("t2", "Masonry", 2),
            trade("t3", "Drywall", 2),
            trade("t1", "Concrete", 1),
        ];
        let matrix = build_matrix(&trades, &[], &[]);
        let names: Vec<&str> = matrix.trades.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Concrete", "Drywall", "Masonry"]);
    }

    #[test]
    fn trade_bids_sort_by_company_name_case_insensitive() {
        let subs = vec![
            sub("ps1", "s1", "zenith mechanical", 1),
            sub("ps2", "s2", "Apex Plumbing", 2),
            sub("ps3", "s3", "Mid-State HVAC", 3),
        ];
        let trades = vec![trade("t1", "Mechanical", 1)];
        let bids = vec![bid("t1", "ps1"), bid("t1", "ps2"), bid("t1", "ps3")];
        let matrix = build_matrix(&trades, &subs, &bids);
        let order: Vec<&str> = matrix
            .trade_bids("t1")
            .iter()
            .map(|b| b.sub_id.as_str())
            .collect();
        assert_eq!(order, vec!["ps2", "ps3", "ps1"]);
    }

    #[test]
    fn cell_lookup_finds_exact_pair() {
        let trades = vec![trade("t1", "Concrete", 1)];
        let subs = vec![sub("ps1", "acme", "Acme", 1)];
        let bids = vec![bid("t1", "ps1")];
        let matrix = build_matrix(&trades, &subs, &bids);
        assert!(matrix.bid_at("t1", "ps1").is_some());
        assert!(matrix.bid_at("t1", "ps2").is_none());
    }
}
