//! Batch comparisons built from independent recomputes of scenario variants.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::benefits::{BenefitKind, STANDARD_START_AGE};
use super::engine::compute;
use super::error::Result;
use super::types::{ComputedScenario, Scenario, WithdrawalOrder, WithdrawalPlan};
use super::whatif::{WhatIfAdjustments, apply_what_if};

/// Last age searched for a deferral break-even.
const BREAKEVEN_SEARCH_AGE: u32 = 110;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensitivityParameter {
    ReturnDelta,
    InflationDelta,
    BracketShift,
    EmploymentScale,
    SelfEmploymentScale,
    InvestmentScale,
    ExpenseDelta,
    SavingsDelta,
}

impl SensitivityParameter {
    /// Adjustment set for one sweep point. Scale parameters treat `delta` as
    /// a change from 1.0.
    pub fn adjustments(self, delta: f64) -> WhatIfAdjustments {
        let mut adjustments = WhatIfAdjustments::default();
        match self {
            SensitivityParameter::ReturnDelta => adjustments.return_delta = delta,
            SensitivityParameter::InflationDelta => adjustments.inflation_delta = delta,
            SensitivityParameter::BracketShift => adjustments.bracket_shift = delta,
            SensitivityParameter::EmploymentScale => adjustments.employment_scale = 1.0 + delta,
            SensitivityParameter::SelfEmploymentScale => {
                adjustments.self_employment_scale = 1.0 + delta
            }
            SensitivityParameter::InvestmentScale => adjustments.investment_scale = 1.0 + delta,
            SensitivityParameter::ExpenseDelta => adjustments.expense_delta = delta,
            SensitivityParameter::SavingsDelta => adjustments.savings_delta = delta,
        }
        adjustments
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    pub final_net_worth: f64,
    pub lifetime_gross_income: f64,
    pub lifetime_tax: f64,
    pub lifetime_after_tax_income: f64,
    pub warning_count: usize,
}

impl From<&ComputedScenario> for VariantSummary {
    fn from(result: &ComputedScenario) -> Self {
        let a = &result.analytics;
        Self {
            final_net_worth: a.final_net_worth,
            lifetime_gross_income: a.lifetime_gross_income,
            lifetime_tax: a.lifetime_tax,
            lifetime_after_tax_income: a.lifetime_after_tax_income,
            warning_count: a.warning_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityPoint {
    pub delta: f64,
    pub summary: VariantSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityResult {
    pub parameter: SensitivityParameter,
    pub baseline: VariantSummary,
    pub points: Vec<SensitivityPoint>,
}

pub fn compute_sensitivity(
    scenario: &Scenario,
    parameter: SensitivityParameter,
    deltas: &[f64],
) -> Result<SensitivityResult> {
    let baseline = VariantSummary::from(&compute(scenario)?);
    let points = deltas
        .iter()
        .map(|&delta| -> Result<SensitivityPoint> {
            let variant = apply_what_if(scenario, &parameter.adjustments(delta));
            let result = compute(&variant)?;
            Ok(SensitivityPoint {
                delta,
                summary: VariantSummary::from(&result),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(?parameter, points = points.len(), "sensitivity sweep finished");
    Ok(SensitivityResult {
        parameter,
        baseline,
        points,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOutcome {
    pub order: WithdrawalOrder,
    pub summary: VariantSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalComparison {
    pub strategies: Vec<StrategyOutcome>,
    /// Strategy with the highest final net worth.
    pub best_index: usize,
}

/// Runs the drawdown plan once per withdrawal order.
pub fn compute_withdrawal_strategies(
    scenario: &Scenario,
    plan: &WithdrawalPlan,
) -> Result<WithdrawalComparison> {
    let strategies = WithdrawalOrder::ALL
        .into_iter()
        .map(|order| -> Result<StrategyOutcome> {
            let mut variant = scenario.clone();
            variant.withdrawal_plan = Some(WithdrawalPlan { order, ..*plan });
            let result = compute(&variant)?;
            Ok(StrategyOutcome {
                order,
                summary: VariantSummary::from(&result),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let best_index = strategies
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.summary
                .final_net_worth
                .total_cmp(&b.summary.final_net_worth)
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    Ok(WithdrawalComparison {
        strategies,
        best_index,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeTotal {
    pub age: u32,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferralRow {
    pub start_age: u32,
    /// Today's dollars.
    pub monthly: f64,
    pub annual: f64,
    pub cumulative_by_age: Vec<AgeTotal>,
    /// Age at which cumulative receipts from this start age and from 65 cross.
    pub breakeven_age: Option<u32>,
    pub lifetime_after_tax_income: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferralTable {
    pub benefit: BenefitKind,
    pub horizon_age: u32,
    pub rows: Vec<DeferralRow>,
    /// Start age with the highest projected lifetime after-tax income.
    pub best_index: usize,
}

pub fn compute_cpp_deferral(scenario: &Scenario) -> Result<DeferralTable> {
    compute_deferral(scenario, BenefitKind::Cpp)
}

pub fn compute_oas_deferral(scenario: &Scenario) -> Result<DeferralTable> {
    compute_deferral(scenario, BenefitKind::Oas)
}

pub fn compute_deferral(scenario: &Scenario, benefit: BenefitKind) -> Result<DeferralTable> {
    let assumptions = &scenario.assumptions;
    let last_age = scenario
        .years
        .last()
        .map_or(0, |y| (y.year - assumptions.birth_year).max(0) as u32);
    // every row covers at least its own start age
    let horizon_age = last_age.max(benefit.latest_age());
    let standard_annual = benefit.monthly_amount(&assumptions.benefits, STANDARD_START_AGE) * 12.0;

    let rows = (benefit.earliest_age()..=benefit.latest_age())
        .map(|start_age| -> Result<DeferralRow> {
            let monthly = benefit.monthly_amount(&assumptions.benefits, start_age);
            let annual = monthly * 12.0;

            let mut variant = scenario.clone();
            match benefit {
                BenefitKind::Cpp => variant.assumptions.benefits.cpp_start_age = start_age,
                BenefitKind::Oas => variant.assumptions.benefits.oas_start_age = start_age,
            }
            let result = compute(&variant)?;

            Ok(DeferralRow {
                start_age,
                monthly,
                annual,
                cumulative_by_age: (benefit.earliest_age()..=horizon_age)
                    .map(|age| AgeTotal {
                        age,
                        total: cumulative(annual, start_age, age),
                    })
                    .collect(),
                breakeven_age: breakeven_age(annual, start_age, standard_annual),
                lifetime_after_tax_income: result.analytics.lifetime_after_tax_income,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let best_index = rows
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.lifetime_after_tax_income
                .total_cmp(&b.lifetime_after_tax_income)
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    Ok(DeferralTable {
        benefit,
        horizon_age,
        rows,
        best_index,
    })
}

/// Receipts from `start_age` through `age` inclusive.
fn cumulative(annual: f64, start_age: u32, age: u32) -> f64 {
    if age < start_age {
        0.0
    } else {
        annual * f64::from(age - start_age + 1)
    }
}

/// First age at which the later-starting stream has caught up with the
/// earlier one. `None` for the standard age itself or when it never does.
fn breakeven_age(annual: f64, start_age: u32, standard_annual: f64) -> Option<u32> {
    if start_age == STANDARD_START_AGE {
        return None;
    }
    let ((late_annual, late_start), (early_annual, early_start)) = if start_age > STANDARD_START_AGE
    {
        ((annual, start_age), (standard_annual, STANDARD_START_AGE))
    } else {
        ((standard_annual, STANDARD_START_AGE), (annual, start_age))
    };
    (late_start..=BREAKEVEN_SEARCH_AGE).find(|&age| {
        cumulative(late_annual, late_start, age) >= cumulative(early_annual, early_start, age)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Accounts, Assumptions, YearData};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn retiree() -> Scenario {
        Scenario {
            assumptions: Assumptions {
                birth_year: 1960,
                inflation_rate: 0.0,
                ..Assumptions::default()
            },
            opening_balances: Accounts {
                rrsp: 400_000.0,
                tfsa: 100_000.0,
                fhsa: 0.0,
                non_registered: 150_000.0,
            },
            years: (2024..2034)
                .map(|year| YearData {
                    year,
                    expenses: 45_000.0,
                    ..YearData::default()
                })
                .collect(),
            ..Scenario::default()
        }
    }

    #[test]
    fn cpp_table_matches_adjustment_schedule_and_cumulates_from_start_age() {
        let table = compute_cpp_deferral(&retiree()).unwrap();
        assert_eq!(table.rows.len(), 11);
        assert_eq!(table.horizon_age, 73);

        let at_60 = &table.rows[0];
        assert_eq!(at_60.start_age, 60);
        assert_approx(at_60.monthly, 640.0);
        assert_approx(table.rows[10].monthly, 1_420.0);

        for row in &table.rows {
            let own = row
                .cumulative_by_age
                .iter()
                .find(|t| t.age == row.start_age)
                .unwrap();
            assert_approx(own.total, row.annual);
            let before = row
                .cumulative_by_age
                .iter()
                .find(|t| t.age + 1 == row.start_age);
            if let Some(before) = before {
                assert_approx(before.total, 0.0);
            }
        }
    }

    #[test]
    fn breakeven_against_standard_start() {
        // 65: 12,000/yr; 70: 17,040/yr; 70 catches up at 81
        assert_eq!(breakeven_age(17_040.0, 70, 12_000.0), Some(81));
        assert_eq!(breakeven_age(12_000.0, 65, 12_000.0), None);
        // 60: 7,680/yr from 60; 65 catches up at 73
        assert_eq!(breakeven_age(7_680.0, 60, 12_000.0), Some(73));
    }

    #[test]
    fn oas_table_starts_at_65_and_deferral_changes_lifetime_income() {
        let table = compute_oas_deferral(&retiree()).unwrap();
        assert_eq!(table.rows.first().map(|r| r.start_age), Some(65));
        assert_eq!(table.rows.len(), 6);
        let first = table.rows[0].lifetime_after_tax_income;
        let last = table.rows[5].lifetime_after_tax_income;
        assert!(first != last);
        assert!(table.best_index < table.rows.len());
    }

    #[test]
    fn withdrawal_strategies_cover_every_order() {
        let plan = WithdrawalPlan {
            start_year: 2024,
            end_year: None,
            annual_amount: 40_000.0,
            order: WithdrawalOrder::ProRata,
            inflation_indexed: false,
        };
        let comparison = compute_withdrawal_strategies(&retiree(), &plan).unwrap();
        let orders: Vec<_> = comparison.strategies.iter().map(|s| s.order).collect();
        assert_eq!(orders, WithdrawalOrder::ALL);
        let best = comparison.strategies[comparison.best_index].summary.final_net_worth;
        assert!(
            comparison
                .strategies
                .iter()
                .all(|s| s.summary.final_net_worth <= best)
        );
    }

    #[test]
    fn sensitivity_points_are_independent_variants() {
        let s = retiree();
        let result =
            compute_sensitivity(&s, SensitivityParameter::ReturnDelta, &[-0.02, 0.0, 0.02]).unwrap();
        assert_eq!(result.points.len(), 3);
        assert_eq!(result.points[1].summary, result.baseline);
        assert!(result.points[0].summary.final_net_worth < result.baseline.final_net_worth);
        assert!(result.points[2].summary.final_net_worth > result.baseline.final_net_worth);
    }
}
