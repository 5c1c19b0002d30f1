use crate::models::{Bid, BidStatus};
use serde::{Deserialize, Serialize};

/// A bid counts toward coverage once it is submitted with a priced amount.
/// Invited, bidding, declined, and no-response bids never count.
fn counted_amount(bid: &Bid) -> Option<f64> {
    if bid.status == BidStatus::Submitted {
        bid.base_bid_amount
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStats {
    pub low: Option<f64>,
    pub spread_amount: Option<f64>,
    pub spread_percent: Option<f64>,
    pub coverage_count: usize,
    pub budget_variance: Option<f64>,
}

impl TradeStats {
    /// Risk flag used by sort/filter, never stored. Flags generously:
    /// a wide spread or fewer than two priced bids both qualify.
    pub fn is_at_risk(&self, spread_threshold_percent: f64) -> bool {
        if self.coverage_count < 2 {
            return true;
        }
        matches!(self.spread_percent, Some(pct) if pct > spread_threshold_percent)
    }
}

/// Per-trade statistics over the bids already filtered to that trade.
/// Absent or zero inputs degrade to `None`/`0`; this never fails.
pub fn trade_stats(bids: &[Bid], budget_amount: Option<f64>) -> TradeStats {
    let amounts: Vec<f64> = bids.iter().filter_map(counted_amount).collect();

    if amounts.is_empty() {
        return TradeStats {
            low: None,
            spread_amount: None,
            spread_percent: None,
            coverage_count: 0,
            budget_variance: None,
        };
    }

    let low = amounts.iter().copied().fold(f64::INFINITY, f64::min);
    let high = amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread_amount = high - low;
    let spread_percent = if low > 0.0 {
        Some(spread_amount / low * 100.0)
    } else {
        None
    };

    TradeStats {
        low: Some(low),
        spread_amount: Some(spread_amount),
        spread_percent,
        coverage_count: amounts.len(),
        budget_variance: budget_amount.map(|budget| budget - low),
    }
}

/// True when a bid contributes to coverage.
pub fn is_counted(bid: &Bid) -> bool {
    counted_amount(bid).is_some()
}

/// Count of bids that would contribute to coverage for one trade.
pub fn submitted_count(bids: &[Bid]) -> usize {
    bids.iter().filter(|bid| is_counted(bid)).count()
}

#[cfg(test)]
mod tests {
    use super::{submitted_count, trade_stats};
    use crate::models::{Bid, BidStatus};

    fn bid(sub: &str, status: BidStatus, amount: Option<f64>) -> Bid {
        Bid {
            id: format!("bid-{sub}"),
            project_id: "p1".to_string(),
            trade_id: "t1".to_string(),
            sub_id: sub.to_string(),
            status,
            base_bid_amount: amount,
            received_at: None,
            notes: String::new(),
        }
    }

    #[test]
    fn electrical_scenario() {
        let bids = vec![
            bid("x", BidStatus::Submitted, Some(100_000.0)),
            bid("y", BidStatus::Submitted, Some(120_000.0)),
            bid("z", BidStatus::Invited, None),
        ];
        let stats = trade_stats(&bids, None);
        assert_eq!(stats.low, Some(100_000.0));
        assert_eq!(stats.spread_amount, Some(20_000.0));
        assert_eq!(stats.spread_percent, Some(20.0));
        assert_eq!(stats.coverage_count, 2);
        assert!(stats.is_at_risk(10.0));
    }

    #[test]
    fn no_counted_bids_yields_all_none() {
        let bids = vec![
            bid("a", BidStatus::Invited, None),
            bid("b", BidStatus::Declined, None),
            bid("c", BidStatus::Bidding, Some(5_000.0)),
        ];
        let stats = trade_stats(&bids, Some(10_000.0));
        assert_eq!(stats.low, None);
        assert_eq!(stats.spread_amount, None);
        assert_eq!(stats.spread_percent, None);
        assert_eq!(stats.coverage_count, 0);
        assert_eq!(stats.budget_variance, None);
        assert!(stats.is_at_risk(10.0));
    }

    #[test]
    fn submitted_without_amount_does_not_count() {
        let bids = vec![bid("a", BidStatus::Submitted, None)];
        assert_eq!(submitted_count(&bids), 0);
        assert_eq!(trade_stats(&bids, None).coverage_count, 0);
    }

    #[test]
    fn single_bid_has_zero_spread() {
        let bids = vec![bid("a", BidStatus::Submitted, Some(42_500.0))];
        let stats = trade_stats(&bids, Some(40_000.0));
        assert_eq!(stats.spread_amount, Some(0.0));
        assert_eq!(stats.spread_percent, Some(0.0));
        assert_eq!(stats.budget_variance, Some(-2_500.0));
        assert!(stats.is_at_risk(10.0), "single coverage is thin");
    }

    #[test]
    fn zero_low_suppresses_spread_percent() {
        let bids = vec![
            bid("a", BidStatus::Submitted, Some(0.0)),
            bid("b", BidStatus::Submitted, Some(900.0)),
        ];
        let stats = trade_stats(&bids, None);
        assert_eq!(stats.low, Some(0.0));
        assert_eq!(stats.spread_amount, Some(900.0));
        assert_eq!(stats.spread_percent, None);
    }

    #[test]
    fn spread_is_never_negative() {
        let bids = vec![
            bid("a", BidStatus::Submitted, Some(77_000.0)),
            bid("b", BidStatus::Submitted, Some(71_000.0)),
            bid("c", BidStatus::Submitted, Some(74_200.0)),
        ];
        let stats = trade_stats(&bids, None);
        assert!(stats.spread_amount.unwrap() >= 0.0);
        assert!(stats.spread_percent.unwrap() >= 0.0);
        assert!(!stats.is_at_risk(10.0));
    }
}
