use tracing::{debug, info};

use super::analytics::aggregate;
use super::assumptions::{inflation_factors, resolve_assumptions, validate_brackets};
use super::benefits::retirement_income;
use super::error::{Error, Result};
use super::ledger::{CarryForwardState, advance, apply_capital_losses, available_room};
use super::schedule::{PriceIndex, RuleContext, layer_scheduled, resolve_scheduled, validate_items};
use super::tax::{IncomeSources, calculate_tax};
use super::types::{
    AccountKind, Accounts, ComputedScenario, ComputedYear, FieldId, IncomeWaterfall,
    ResolvedAssumptions, Scenario, ScheduledItem, WithdrawalOrder, WithdrawalPlan, YearData,
};
use super::validation::{YearFacts, validate_year};

/// Projects every year of the scenario. Runs a second full pass when any
/// scheduled item needs computed results; fails without a partial result on
/// structurally malformed input.
pub fn compute(scenario: &Scenario) -> Result<ComputedScenario> {
    check_structure(scenario)?;
    let prices = price_index(scenario);
    let resolved = resolve_years(scenario, &prices)?;

    let first = run_pass(scenario, &resolved, &prices, None);
    let needs_second_pass = scenario
        .scheduled
        .iter()
        .any(ScheduledItem::depends_on_results);

    let (years, passes) = if needs_second_pass {
        (run_pass(scenario, &resolved, &prices, Some(&first)), 2)
    } else {
        (first, 1)
    };

    let analytics = aggregate(&years);
    info!(
        years = years.len(),
        passes,
        final_net_worth = analytics.final_net_worth,
        warnings = analytics.warning_count,
        "scenario computed"
    );
    Ok(ComputedScenario {
        years,
        analytics,
        passes,
    })
}

/// Per-year resolved assumptions for the scenario's years, as the projection
/// would use them.
pub fn resolve_scenario_assumptions(scenario: &Scenario) -> Result<Vec<ResolvedAssumptions>> {
    check_structure(scenario)?;
    resolve_years(scenario, &price_index(scenario))
}

/// How far `base_year` may sit from the projected years.
const MAX_BASE_YEAR_DISTANCE: i32 = 150;

fn check_structure(scenario: &Scenario) -> Result<()> {
    let Some(first) = scenario.years.first() else {
        return Err(Error::EmptyScenario);
    };
    for (offset, entry) in scenario.years.iter().enumerate() {
        let expected = first.year + offset as i32;
        if entry.year != expected {
            return Err(Error::NonContiguousYears {
                expected,
                found: entry.year,
            });
        }
        for field in FieldId::ALL {
            if !field.get(entry).is_finite() {
                return Err(Error::NonFinite {
                    field: field.key(),
                    year: entry.year,
                });
            }
        }
    }

    if let Some(base_year) = scenario.assumptions.base_year {
        let last_year = first.year + scenario.years.len() as i32 - 1;
        let low = first.year.saturating_sub(MAX_BASE_YEAR_DISTANCE);
        let high = last_year.saturating_add(MAX_BASE_YEAR_DISTANCE);
        if !(low..=high).contains(&base_year) {
            return Err(Error::BaseYearOutOfRange {
                base_year,
                max_distance: MAX_BASE_YEAR_DISTANCE,
            });
        }
    }

    if !scenario.assumptions.inflation_rate.is_finite() {
        return Err(Error::NonFinite {
            field: "inflationRate",
            year: first.year,
        });
    }
    if scenario.opening_balances.iter().any(|(_, v)| !v.is_finite()) {
        return Err(Error::NonFinite {
            field: "openingBalances",
            year: first.year,
        });
    }
    validate_items(&scenario.scheduled)
}

fn price_index(scenario: &Scenario) -> PriceIndex {
    let first_year = scenario.years.first().map_or(0, |y| y.year);
    PriceIndex {
        first_year,
        factors: inflation_factors(
            &scenario.assumptions,
            &scenario.overrides,
            first_year,
            scenario.years.len(),
        ),
        base_rate: scenario.assumptions.inflation_rate,
    }
}

fn resolve_years(scenario: &Scenario, prices: &PriceIndex) -> Result<Vec<ResolvedAssumptions>> {
    scenario
        .years
        .iter()
        .zip(&prices.factors)
        .map(|(entry, &factor)| -> Result<ResolvedAssumptions> {
            let resolved = resolve_assumptions(
                &scenario.assumptions,
                entry.year,
                factor,
                scenario.overrides.get(&entry.year),
            );
            validate_brackets(&resolved.tax.federal.brackets, "federal", entry.year)?;
            validate_brackets(&resolved.tax.provincial.brackets, "provincial", entry.year)?;
            Ok(resolved)
        })
        .collect()
}

fn run_pass(
    scenario: &Scenario,
    resolved: &[ResolvedAssumptions],
    prices: &PriceIndex,
    prior: Option<&[ComputedYear]>,
) -> Vec<ComputedYear> {
    let mut carry = CarryForwardState::opening(scenario);
    let mut years = Vec::with_capacity(scenario.years.len());

    for (index, (manual, resolved)) in scenario.years.iter().zip(resolved).enumerate() {
        let prior_year = prior.and_then(|p| p.get(index));
        let (computed, next) =
            project_year(scenario, manual, resolved, &carry, prior_year, prices, index == 0);
        debug!(
            year = computed.year,
            pass = if prior.is_some() { 2 } else { 1 },
            net_worth = computed.net_worth,
            "year projected"
        );
        years.push(computed);
        carry = next;
    }
    years
}

fn project_year(
    scenario: &Scenario,
    manual: &YearData,
    resolved: &ResolvedAssumptions,
    carry: &CarryForwardState,
    prior: Option<&ComputedYear>,
    prices: &PriceIndex,
    first_year: bool,
) -> (ComputedYear, CarryForwardState) {
    let year = manual.year;
    let room = available_room(carry, resolved);

    let ctx = RuleContext {
        year,
        prior,
        room,
        capital_loss_carry_forward: carry.capital_loss,
        prices,
    };
    let scheduled = resolve_scheduled(&scenario.scheduled, &ctx);
    let mut inputs = layer_scheduled(manual, &scheduled);
    if let Some(plan) = &scenario.withdrawal_plan {
        apply_withdrawal_plan(plan, year, &mut inputs, &carry.balances, prices);
    }

    let losses = apply_capital_losses(
        carry.capital_loss,
        inputs.capital_loss_applied,
        inputs.capital_gains_realized,
    );

    let assumptions = &scenario.assumptions;
    let age = year - assumptions.birth_year;
    let benefits = retirement_income(&assumptions.benefits, age, resolved.inflation_factor);

    let sources = IncomeSources {
        employment: inputs.employment_income.max(0.0),
        self_employment: inputs.self_employment_income.max(0.0),
        interest: inputs.interest_income.max(0.0),
        eligible_dividends: inputs.eligible_dividends.max(0.0),
        non_eligible_dividends: inputs.non_eligible_dividends.max(0.0),
        pension: inputs.pension_income.max(0.0),
        other: inputs.other_income.max(0.0),
        rrsp_withdrawals: inputs.withdrawals.rrsp.max(0.0),
        cpp_benefit: benefits.cpp,
        oas_benefit: benefits.oas,
        capital_gains: inputs.capital_gains_realized.max(0.0),
        capital_loss_applied: losses.applied,
        rrsp_deduction: inputs.contributions.rrsp.max(0.0),
        fhsa_deduction: inputs.contributions.fhsa.max(0.0),
        other_deductions: inputs.other_deductions.max(0.0),
    };
    let outcome = calculate_tax(&sources, &resolved.tax);

    let ledger = advance(
        carry,
        &inputs,
        resolved,
        &assumptions.allocations,
        &scenario.liabilities,
        losses,
    );

    let warnings = validate_year(&YearFacts {
        year,
        first_year,
        inputs: &inputs,
        room: &ledger.available,
        opening_balances: &carry.balances,
        capital_loss_available: losses.available,
        benefits: &assumptions.benefits,
    });

    let gross_income = sources.employment
        + sources.self_employment
        + sources.interest
        + sources.eligible_dividends
        + sources.non_eligible_dividends
        + sources.pension
        + sources.other
        + sources.rrsp_withdrawals
        + benefits.cpp
        + benefits.oas;
    let income_tax = outcome.breakdown.income_tax;
    let payroll = outcome.payroll.total();
    let total_tax = income_tax + payroll;
    let after_tax_income = gross_income - total_tax;
    let contributions: f64 = inputs.contributions.iter().map(|(_, v)| v.max(0.0)).sum();
    let withdrawals: f64 = inputs.withdrawals.iter().map(|(_, v)| v.max(0.0)).sum();
    // RRSP withdrawals are already in gross income
    let untaxed_withdrawals = withdrawals - sources.rrsp_withdrawals;
    let expenses = inputs.expenses.max(0.0);
    let debt_payments = ledger.liabilities.payments;

    let waterfall = IncomeWaterfall {
        gross_income,
        income_tax,
        payroll,
        total_tax,
        after_tax_income,
        contributions,
        withdrawals,
        expenses,
        debt_payments,
        net_cash_flow: after_tax_income + untaxed_withdrawals
            - contributions
            - expenses
            - debt_payments,
    };

    let net_worth =
        ledger.accounts.iter().map(|(_, a)| a.closing).sum::<f64>() - ledger.liabilities.closing_balance;

    let computed = ComputedYear {
        year,
        age,
        inflation_factor: resolved.inflation_factor,
        inputs,
        tax: outcome.breakdown,
        payroll: outcome.payroll,
        accounts: ledger.accounts,
        room: ledger.room,
        waterfall,
        retirement_income: benefits,
        liabilities: ledger.liabilities,
        net_worth,
        warnings,
    };
    (computed, ledger.next)
}

fn drawdown_sequence(order: WithdrawalOrder) -> &'static [AccountKind] {
    match order {
        WithdrawalOrder::RrspFirst => &[
            AccountKind::Rrsp,
            AccountKind::NonRegistered,
            AccountKind::Tfsa,
        ],
        WithdrawalOrder::TfsaFirst => &[
            AccountKind::Tfsa,
            AccountKind::NonRegistered,
            AccountKind::Rrsp,
        ],
        WithdrawalOrder::NonRegisteredFirst | WithdrawalOrder::ProRata => &[
            AccountKind::NonRegistered,
            AccountKind::Tfsa,
            AccountKind::Rrsp,
        ],
    }
}

/// Sources the plan's amount from balances, writing only into withdrawal
/// fields that are still zero. FHSA balances are never drawn down.
fn apply_withdrawal_plan(
    plan: &WithdrawalPlan,
    year: i32,
    inputs: &mut YearData,
    balances: &Accounts<f64>,
    prices: &PriceIndex,
) {
    if year < plan.start_year || plan.end_year.is_some_and(|end| year > end) {
        return;
    }

    let mut target = plan.annual_amount.max(0.0);
    if plan.inflation_indexed {
        target *= prices.between(plan.start_year, year);
    }
    let already: f64 = inputs.withdrawals.iter().map(|(_, v)| v.max(0.0)).sum();
    let mut remaining = target - already;
    if remaining <= 0.0 {
        return;
    }

    let capacity = balances.map(|kind, balance| {
        if kind == AccountKind::Fhsa || *inputs.withdrawals.get(kind) != 0.0 {
            0.0
        } else {
            (balance + inputs.contributions.get(kind).max(0.0)).max(0.0)
        }
    });

    if plan.order == WithdrawalOrder::ProRata {
        let total = capacity.total();
        if total > 0.0 {
            let share = remaining.min(total) / total;
            for (kind, available) in capacity.iter() {
                if *available > 0.0 {
                    *inputs.withdrawals.get_mut(kind) = available * share;
                }
            }
            remaining -= remaining.min(total);
        }
    } else {
        for &kind in drawdown_sequence(plan.order) {
            if remaining <= 0.0 {
                break;
            }
            let take = capacity.get(kind).min(remaining);
            if take > 0.0 {
                *inputs.withdrawals.get_mut(kind) = take;
                remaining -= take;
            }
        }
    }

    if remaining > 1e-9 {
        debug!(year, shortfall = remaining, "withdrawal plan exceeds available balances");
    }
}
