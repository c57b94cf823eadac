//! Yield/Compounding Engine
//!
//! 원장 집계값만 입력으로 받는 순수 함수 모음. 통화와 무관하게 동작하며,
//! 호출부가 같은 단위(USD, POL, ETH)로 금액과 재투자 단가를 넘기면 된다.
//!
//! # Compounding
//!
//! ```text
//! for month in 1..=240:
//!     payout   = holdings × apr / 100 / 12
//!     earned  += payout
//!     earned >= spent  → break-even (month)
//!     units    = floor((payout + carry) / unit)
//!     holdings += units × unit,  carry = 나머지
//! ```

use serde::Serialize;

/// 컴파운딩 시뮬레이션 최대 기간 (20년)
pub const MAX_SIMULATION_MONTHS: u32 = 240;

/// 최적 부스터 범위에 포함하는 허용 오차 (최적 개월 수 대비 2%)
pub const NEAR_OPTIMAL_TOLERANCE: f64 = 1.02;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AprConfig {
    pub base_apr: f64,
    pub boost_per_booster: f64,
    pub max_boosters: u32,
    pub max_apr: f64,
}

impl Default for AprConfig {
    fn default() -> Self {
        Self {
            base_apr: 12.0,
            boost_per_booster: 0.5,
            max_boosters: 16,
            max_apr: 20.0,
        }
    }
}

impl AprConfig {
    pub fn apr(&self, boosters: u32) -> f64 {
        (self.base_apr + boosters as f64 * self.boost_per_booster).min(self.max_apr)
    }
}

/// 회수율 (%). 지출이 없으면 100
pub fn break_even_pct(spent: f64, earned: f64) -> f64 {
    if spent <= 0.0 {
        return 100.0;
    }
    (earned / spent * 100.0).clamp(0.0, 100.0)
}

/// 단리 기준 남은 개월 수. 이미 회수했으면 0, 월 지급액이 없으면 None
pub fn months_to_break_even(spent: f64, earned: f64, monthly: f64) -> Option<u32> {
    let remaining = spent - earned;
    if remaining <= 0.0 {
        return Some(0);
    }
    if monthly <= 0.0 {
        return None;
    }
    Some((remaining / monthly).ceil() as u32)
}

pub fn monthly_payout(holdings: f64, apr: f64) -> f64 {
    holdings * apr / 100.0 / 12.0
}

pub fn yearly_no_compound(monthly: f64) -> f64 {
    monthly * 12.0
}

/// 재투자 시뮬레이션 상태
struct Compounder {
    holdings: f64,
    apr: f64,
    unit_cost: f64,
    carry: f64,
}

impl Compounder {
    fn new(holdings: f64, apr: f64, unit_cost: f64) -> Self {
        Self { holdings, apr, unit_cost, carry: 0.0 }
    }

    /// 한 달 진행. 이번 달 지급액을 반환하고 재투자는 다음 달부터 반영된다
    fn step(&mut self) -> f64 {
        let payout = monthly_payout(self.holdings, self.apr);
        if self.unit_cost > 0.0 {
            let available = payout + self.carry;
            let units = (available / self.unit_cost).floor();
            let reinvested = units * self.unit_cost;
            self.carry = available - reinvested;
            self.holdings += reinvested;
        }
        payout
    }
}

/// 재투자 기준 회수 개월 수. 240개월 안에 회수하지 못하면 None
pub fn compound_months_to_break_even(
    spent: f64,
    earned: f64,
    holdings: f64,
    apr: f64,
    unit_cost: f64,
) -> Option<u32> {
    if spent - earned <= 0.0 {
        return Some(0);
    }

    let mut cumulative = earned;
    let mut sim = Compounder::new(holdings, apr, unit_cost);
    for month in 1..=MAX_SIMULATION_MONTHS {
        let payout = monthly_payout(sim.holdings, sim.apr);
        cumulative += payout;
        if spent - cumulative <= 0.0 {
            return Some(month);
        }
        sim.step();
    }
    None
}

/// 12개월 재투자 시 총 지급액. 단가가 없으면 단리와 같다
pub fn yearly_max_compound(holdings: f64, apr: f64, unit_cost: f64) -> f64 {
    if unit_cost <= 0.0 {
        return yearly_no_compound(monthly_payout(holdings, apr));
    }
    let mut sim = Compounder::new(holdings, apr, unit_cost);
    (0..12).map(|_| sim.step()).sum()
}

/// 단리 회수율을 재투자로 단축되는 비율만큼 보정
pub fn compound_pct(current_pct: f64, linear_months: Option<u32>, compound_months: Option<u32>) -> f64 {
    match (linear_months, compound_months) {
        (_, Some(0)) => 100.0,
        (Some(linear), Some(compound)) if linear > 0 => {
            (current_pct * linear as f64 / compound as f64).min(100.0)
        }
        _ => current_pct,
    }
}

/// 최적 부스터 탐색 입력 (모두 같은 통화 단위)
#[derive(Debug, Clone, Copy)]
pub struct BoosterSearch {
    pub spent: f64,
    pub earned: f64,
    pub holdings: f64,
    pub unit_cost: f64,
    pub current_boosters: u32,
    pub booster_cost: f64,
    pub target_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoosterCandidate {
    pub boosters: u32,
    pub apr: f64,
    pub acquisition_cost: f64,
    pub months: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimalBoosters {
    pub boosters: u32,
    pub months: u32,
    /// 최적 개월 수의 2% 이내인 부스터 개수들
    pub near_optimal: Vec<u32>,
    pub candidates: Vec<BoosterCandidate>,
}

/// 0..=max_boosters 전수 탐색. 동률이면 부스터가 적은 쪽
///
/// 어떤 개수로도 240개월 안에 목표에 닿지 못하면 None.
pub fn optimal_boosters(config: &AprConfig, search: &BoosterSearch) -> Option<OptimalBoosters> {
    let candidates: Vec<BoosterCandidate> = (0..=config.max_boosters)
        .map(|boosters| {
            let apr = config.apr(boosters);
            let acquisition_cost =
                boosters.saturating_sub(search.current_boosters) as f64 * search.booster_cost;
            let adjusted = search.spent * search.target_multiplier + acquisition_cost;
            let months = compound_months_to_break_even(
                adjusted,
                search.earned,
                search.holdings,
                apr,
                search.unit_cost,
            );
            BoosterCandidate { boosters, apr, acquisition_cost, months }
        })
        .collect();

    let (boosters, months) = candidates
        .iter()
        .filter_map(|c| c.months.map(|m| (c.boosters, m)))
        .min_by_key(|(boosters, months)| (*months, *boosters))?;

    let limit = months as f64 * NEAR_OPTIMAL_TOLERANCE;
    let near_optimal = candidates
        .iter()
        .filter(|c| c.months.map(|m| m as f64 <= limit).unwrap_or(false))
        .map(|c| c.boosters)
        .collect();

    Some(OptimalBoosters { boosters, months, near_optimal, candidates })
}
