//! Break-even / yield projection
//!
//! 지갑 집계 + 오늘 가격 + yield engine 을 묶어 계산기 결과를 만든다.
//! USD 모드는 두 체인을 합산하고, POL/ETH 모드는 해당 통화로 산 몫만 본다.

use serde::{Deserialize, Serialize};

use crate::db::WalletStats;
use crate::services::yield_engine::{
    break_even_pct, compound_months_to_break_even, compound_pct, monthly_payout, months_to_break_even,
    optimal_boosters, yearly_max_compound, yearly_no_compound, AprConfig, BoosterSearch, OptimalBoosters,
};

/// 체인별 최소 진주 가격 (재투자 단위)
pub const MIN_PEARL_POL: f64 = 10.0;
pub const MIN_PEARL_ETH: f64 = 0.00075;

/// 부스터 기본 가격 (POL)
pub const DEFAULT_BOOSTER_COST_POL: f64 = 256.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMode {
    #[default]
    Usd,
    Pol,
    Eth,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectionQuery {
    pub mode: Option<ProjectionMode>,
    pub boosters: Option<u32>,
    /// 부스터 1개 가격 (POL)
    pub booster_cost: Option<f64>,
    pub target_multiplier: Option<f64>,
    pub additional_pol: Option<f64>,
    pub additional_eth: Option<f64>,
}

impl ProjectionQuery {
    pub fn validate(&self, config: &AprConfig) -> Result<(), String> {
        if let Some(b) = self.boosters {
            if b > config.max_boosters {
                return Err(format!("boosters must be between 0 and {}", config.max_boosters));
            }
        }
        if let Some(m) = self.target_multiplier {
            if !m.is_finite() || m <= 0.0 {
                return Err("target_multiplier must be a positive number".to_string());
            }
        }
        for (name, value) in [
            ("booster_cost", self.booster_cost),
            ("additional_pol", self.additional_pol),
            ("additional_eth", self.additional_eth),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("{} must be a non-negative number", name));
                }
            }
        }
        Ok(())
    }
}

/// 오늘 시세 (USD)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketPrices {
    pub pol_usd: f64,
    pub eth_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub mode: ProjectionMode,
    pub boosters: u32,
    pub current_boosters: u32,
    pub apr: f64,
    pub holdings: f64,
    pub spent: f64,
    pub earned: f64,
    pub booster_cost: f64,
    pub additional_investment: f64,
    pub total_additional_cost: f64,
    pub adjusted_spent: f64,
    pub unit_cost: f64,
    pub monthly_payout: f64,
    pub yearly_no_compound: f64,
    pub yearly_max_compound: f64,
    pub linear_months: Option<u32>,
    pub compound_months: Option<u32>,
    pub optimal: Option<OptimalBoosters>,
    pub current_pct: f64,
    pub compound_pct: f64,
    pub prices: MarketPrices,
}

/// 모드 통화로 환산한 입력값
struct Denominated {
    holdings: f64,
    spent: f64,
    earned: f64,
    /// 부스터 1개 가격
    booster_unit: f64,
    additional: f64,
    /// 가장 싼 진주 가격
    unit_cost: f64,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// 0 이하 가격은 후보에서 제외
fn cheapest(a: f64, b: f64) -> f64 {
    match (a > 0.0, b > 0.0) {
        (true, true) => a.min(b),
        (true, false) => a,
        (false, true) => b,
        (false, false) => 0.0,
    }
}

fn denominate(stats: &WalletStats, prices: MarketPrices, query: &ProjectionQuery) -> Denominated {
    let booster_cost_pol = query.booster_cost.unwrap_or(DEFAULT_BOOSTER_COST_POL);
    let add_pol = query.additional_pol.unwrap_or(0.0);
    let add_eth = query.additional_eth.unwrap_or(0.0);

    match query.mode.unwrap_or_default() {
        ProjectionMode::Usd => Denominated {
            holdings: stats.holdings_pol_value * prices.pol_usd + stats.holdings_eth_value * prices.eth_usd,
            spent: stats.total_spent_excluding_compounded_usd,
            earned: stats.total_earned_usd,
            booster_unit: booster_cost_pol * prices.pol_usd,
            additional: add_pol * prices.pol_usd + add_eth * prices.eth_usd,
            unit_cost: cheapest(MIN_PEARL_POL * prices.pol_usd, MIN_PEARL_ETH * prices.eth_usd),
        },
        ProjectionMode::Pol => {
            let eth_to_pol = ratio(prices.eth_usd, prices.pol_usd);
            Denominated {
                holdings: stats.holdings_pol_value,
                spent: stats.total_spent_pol - stats.total_compounded_pol,
                earned: stats.total_earned_pol,
                booster_unit: booster_cost_pol,
                additional: add_pol + add_eth * eth_to_pol,
                unit_cost: cheapest(MIN_PEARL_POL, MIN_PEARL_ETH * eth_to_pol),
            }
        }
        ProjectionMode::Eth => {
            let pol_to_eth = ratio(prices.pol_usd, prices.eth_usd);
            Denominated {
                holdings: stats.holdings_eth_value,
                spent: stats.total_spent_eth - stats.total_compounded_eth,
                earned: stats.total_earned_eth,
                booster_unit: booster_cost_pol * pol_to_eth,
                additional: add_eth + add_pol * pol_to_eth,
                unit_cost: cheapest(MIN_PEARL_ETH, MIN_PEARL_POL * pol_to_eth),
            }
        }
    }
}

pub fn project(
    stats: &WalletStats,
    prices: MarketPrices,
    query: &ProjectionQuery,
    config: &AprConfig,
) -> Projection {
    let mode = query.mode.unwrap_or_default();
    let current_boosters = stats.total_boosters.clamp(0, config.max_boosters as i64) as u32;
    let boosters = query.boosters.unwrap_or(current_boosters);
    let multiplier = query.target_multiplier.unwrap_or(1.0);
    let d = denominate(stats, prices, query);

    let apr = config.apr(boosters);
    let booster_cost = boosters.saturating_sub(current_boosters) as f64 * d.booster_unit;
    let holdings = d.holdings + d.additional;
    let spent = d.spent + d.additional;
    let adjusted_spent = spent * multiplier + booster_cost;

    let monthly = monthly_payout(holdings, apr);
    let linear_months = months_to_break_even(adjusted_spent, d.earned, monthly);
    let compound_months = compound_months_to_break_even(adjusted_spent, d.earned, holdings, apr, d.unit_cost);

    let optimal = optimal_boosters(
        config,
        &BoosterSearch {
            spent,
            earned: d.earned,
            holdings,
            unit_cost: d.unit_cost,
            current_boosters,
            booster_cost: d.booster_unit,
            target_multiplier: multiplier,
        },
    );

    let current_pct = break_even_pct(adjusted_spent, d.earned);

    Projection {
        mode,
        boosters,
        current_boosters,
        apr,
        holdings,
        spent,
        earned: d.earned,
        booster_cost,
        additional_investment: d.additional,
        total_additional_cost: booster_cost + d.additional,
        adjusted_spent,
        unit_cost: d.unit_cost,
        monthly_payout: monthly,
        yearly_no_compound: yearly_no_compound(monthly),
        yearly_max_compound: yearly_max_compound(holdings, apr, d.unit_cost),
        linear_months,
        compound_months,
        optimal,
        current_pct,
        compound_pct: compound_pct(current_pct, linear_months, compound_months),
        prices,
    }
}
