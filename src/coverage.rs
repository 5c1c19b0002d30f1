use crate::models::{Bid, ProjectRiskStatus, Trade};
use crate::stats::is_counted;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trades with fewer priced bids than this are surfaced on the dashboard
/// rollup. Coarser than the per-trade risk flag on purpose.
const THIN_COVERAGE_THRESHOLD: usize = 2;

/// Ephemeral per-request coverage rollup for the triage dashboard. Not to
/// be confused with `LevelingSnapshot`, the persisted point-in-time freeze.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub coverage_pct: u32,
    pub coverage_numerator: u32,
    pub coverage_denominator: u32,
    pub trades_thin: Vec<Trade>,
    pub awaiting_responses_count: usize,
    pub target_bids_per_trade: u32,
}

impl CoverageReport {
    /// Project risk badge. The day-sensitive branches run only when a due
    /// date exists; without one the coverage-only thresholds apply.
    pub fn risk_status(&self, due_in_days: Option<i64>) -> ProjectRiskStatus {
        let pct = self.coverage_pct;
        if let Some(days) = due_in_days {
            if days <= 3 && pct < 65 {
                return ProjectRiskStatus::Critical;
            }
            if days <= 7 && pct < 75 {
                return ProjectRiskStatus::AtRisk;
            }
        }
        if pct < 45 {
            ProjectRiskStatus::Critical
        } else if pct < 65 {
            ProjectRiskStatus::AtRisk
        } else {
            ProjectRiskStatus::Healthy
        }
    }
}

/// Whole days until the due date, negative once past due. `None` when the
/// project has no due date.
pub fn due_in_days(due_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    due_date.map(|due| (due.date_naive() - now.date_naive()).num_days())
}

/// Rolls per-trade submitted counts into the portfolio coverage score.
/// Each trade's contribution is capped at `target_bids_per_trade` so one
/// over-subscribed trade cannot mask thin coverage elsewhere.
pub fn coverage_report(trades: &[Trade], bids: &[Bid], target_bids_per_trade: u32) -> CoverageReport {
    let mut by_trade: HashMap<&str, Vec<&Bid>> = HashMap::new();
    for bid in bids {
        by_trade.entry(bid.trade_id.as_str()).or_default().push(bid);
    }

    let mut numerator = 0u32;
    let mut trades_thin = Vec::new();
    for trade in trades {
        let submitted = by_trade
            .get(trade.id.as_str())
            .map(|list| list.iter().filter(|bid| is_counted(bid)).count())
            .unwrap_or(0);
        numerator += (submitted as u32).min(target_bids_per_trade);
        if submitted < THIN_COVERAGE_THRESHOLD {
            trades_thin.push(trade.clone());
        }
    }

    let denominator = trades.len() as u32 * target_bids_per_trade;
    let coverage_pct = if denominator == 0 {
        0
    } else {
        (100.0 * f64::from(numerator) / f64::from(denominator)).round() as u32
    };

    let awaiting_responses_count = bids
        .iter()
        .filter(|bid| bid.status.is_awaiting_response())
        .count();

    CoverageReport {
        coverage_pct,
        coverage_numerator: numerator,
        coverage_denominator: denominator,
        trades_thin,
        awaiting_responses_count,
        target_bids_per_trade,
    }
}

#[cfg(test)]
mod tests {
    use super::{coverage_report, due_in_days, CoverageReport};
    use crate::models::{Bid, BidStatus, ProjectRiskStatus, Trade};
    use chrono::{Duration, Utc};

    fn trade(id: &str, sort_order: i64) -> Trade {
        Trade {
            id: id.to_string(),
            project_id: "p1".to_string(),
            name: format!("Trade {id}"),
            sort_order,
        }
    }

    fn bid(trade_id: &str, sub: &str, status: BidStatus, amount: Option<f64>) -> Bid {
        Bid {
            id: format!("bid-{trade_id}-{sub}"),
            project_id: "p1".to_string(),
            trade_id: trade_id.to_string(),
            sub_id: sub.to_string(),
            status,
            base_bid_amount: amount,
            received_at: None,
            notes: String::new(),
        }
    }

    fn report(pct: u32) -> CoverageReport {
        CoverageReport {
            coverage_pct: pct,
            coverage_numerator: 0,
            coverage_denominator: 0,
            trades_thin: Vec::new(),
            awaiting_responses_count: 0,
            target_bids_per_trade: 3,
        }
    }

    #[test]
    fn capped_numerator_scenario() {
        let trades = vec![trade("t1", 1), trade("t2", 2)];
        let mut bids = Vec::new();
        for sub in ["a", "b", "c", "d"] {
            bids.push(bid("t1", sub, BidStatus::Submitted, Some(1_000.0)));
        }
        bids.push(bid("t2", "e", BidStatus::Submitted, Some(2_000.0)));

        let cov = coverage_report(&trades, &bids, 3);
        assert_eq!(cov.coverage_numerator, 4);
        assert_eq!(cov.coverage_denominator, 6);
        assert_eq!(cov.coverage_pct, 67);
        assert_eq!(cov.trades_thin.len(), 1);
        assert_eq!(cov.trades_thin[0].id, "t2");
    }

    #[test]
    fn zero_trades_is_zero_not_nan() {
        let cov = coverage_report(&[], &[], 3);
        assert_eq!(cov.coverage_pct, 0);
        assert_eq!(cov.coverage_denominator, 0);
        assert!(cov.trades_thin.is_empty());
    }

    #[test]
    fn pct_stays_within_bounds() {
        let trades = vec![trade("t1", 1)];
        let bids: Vec<Bid> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|sub| bid("t1", sub, BidStatus::Submitted, Some(1_000.0)))
            .collect();
        let cov = coverage_report(&trades, &bids, 3);
        assert_eq!(cov.coverage_pct, 100);
    }

    #[test]
    fn awaiting_counts_invited_and_bidding_only() {
        let trades = vec![trade("t1", 1)];
        let bids = vec![
            bid("t1", "a", BidStatus::Invited, None),
            bid("t1", "b", BidStatus::Bidding, None),
            bid("t1", "c", BidStatus::Declined, None),
            bid("t1", "d", BidStatus::NoResponse, None),
            bid("t1", "e", BidStatus::Submitted, Some(10.0)),
        ];
        let cov = coverage_report(&trades, &bids, 3);
        assert_eq!(cov.awaiting_responses_count, 2);
    }

    #[test]
    fn due_soon_with_thin_coverage_is_critical() {
        assert_eq!(report(50).risk_status(Some(2)), ProjectRiskStatus::Critical);
    }

    #[test]
    fn no_due_date_falls_back_to_coverage_thresholds() {
        assert_eq!(report(50).risk_status(None), ProjectRiskStatus::AtRisk);
        assert_eq!(report(44).risk_status(None), ProjectRiskStatus::Critical);
        assert_eq!(report(65).risk_status(None), ProjectRiskStatus::Healthy);
    }

    #[test]
    fn week_out_threshold_applies_before_coverage_only_rules() {
        assert_eq!(report(70).risk_status(Some(6)), ProjectRiskStatus::AtRisk);
        assert_eq!(report(80).risk_status(Some(6)), ProjectRiskStatus::Healthy);
        assert_eq!(report(70).risk_status(Some(20)), ProjectRiskStatus::Healthy);
    }

    #[test]
    fn due_in_days_uses_calendar_days() {
        let now = Utc::now();
        assert_eq!(due_in_days(None, now), None);
        assert_eq!(due_in_days(Some(now + Duration::days(2)), now), Some(2));
    }
}
