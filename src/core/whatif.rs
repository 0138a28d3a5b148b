use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::types::{AccountKind, Accounts, Allocation, Amount, Bracket, FieldId, Scenario};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRedirect {
    pub from: AccountKind,
    pub to: AccountKind,
    /// Share of the `from` contribution moved to `to`, in 0..=1.
    pub fraction: f64,
}

/// Adjustments layered over a scenario to produce a variant. The default
/// value changes nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WhatIfAdjustments {
    pub return_delta: f64,
    pub inflation_delta: f64,
    /// Relative shift of every bracket threshold; 0.05 raises thresholds by 5%.
    pub bracket_shift: f64,
    pub employment_scale: f64,
    pub self_employment_scale: f64,
    /// Applies to interest, dividends and realized gains.
    pub investment_scale: f64,
    pub contribution_redirect: Option<ContributionRedirect>,
    pub allocation_override: Option<Allocation>,
    pub expense_delta: f64,
    /// Extra annual saving into the non-registered account.
    pub savings_delta: f64,
}

impl Default for WhatIfAdjustments {
    fn default() -> Self {
        Self {
            return_delta: 0.0,
            inflation_delta: 0.0,
            bracket_shift: 0.0,
            employment_scale: 1.0,
            self_employment_scale: 1.0,
            investment_scale: 1.0,
            contribution_redirect: None,
            allocation_override: None,
            expense_delta: 0.0,
            savings_delta: 0.0,
        }
    }
}

impl WhatIfAdjustments {
    pub fn is_neutral(&self) -> bool {
        let redirect_neutral = self
            .contribution_redirect
            .is_none_or(|r| r.fraction == 0.0 || r.from == r.to);
        self.return_delta == 0.0
            && self.inflation_delta == 0.0
            && self.bracket_shift == 0.0
            && self.employment_scale == 1.0
            && self.self_employment_scale == 1.0
            && self.investment_scale == 1.0
            && redirect_neutral
            && self.allocation_override.is_none()
            && self.expense_delta == 0.0
            && self.savings_delta == 0.0
    }
}

/// Returns the scenario unchanged (borrowed) for neutral adjustments, or an
/// adjusted copy. The input is never modified.
pub fn apply_what_if<'a>(scenario: &'a Scenario, adjustments: &WhatIfAdjustments) -> Cow<'a, Scenario> {
    if adjustments.is_neutral() {
        return Cow::Borrowed(scenario);
    }

    let mut variant = scenario.clone();
    apply_macro_deltas(&mut variant, adjustments);
    apply_bracket_shift(&mut variant, adjustments.bracket_shift);
    apply_income_scaling(&mut variant, adjustments);
    if let Some(redirect) = adjustments.contribution_redirect {
        apply_redirect(&mut variant, redirect);
    }
    if let Some(allocation) = adjustments.allocation_override {
        variant.assumptions.allocations = Accounts::splat(allocation);
    }
    shift_field(&mut variant, FieldId::Expenses, adjustments.expense_delta);
    shift_field(
        &mut variant,
        FieldId::NonRegisteredContribution,
        adjustments.savings_delta,
    );
    Cow::Owned(variant)
}

fn apply_macro_deltas(scenario: &mut Scenario, adjustments: &WhatIfAdjustments) {
    let delta = adjustments.return_delta;
    if delta != 0.0 {
        let returns = &mut scenario.assumptions.returns;
        returns.equity += delta;
        returns.fixed_income += delta;
        returns.cash += delta;
        for returns in scenario.overrides.values_mut().filter_map(|o| o.returns.as_mut()) {
            returns.equity += delta;
            returns.fixed_income += delta;
            returns.cash += delta;
        }
    }

    let delta = adjustments.inflation_delta;
    if delta != 0.0 {
        scenario.assumptions.inflation_rate += delta;
        for rate in scenario
            .overrides
            .values_mut()
            .filter_map(|o| o.inflation_rate.as_mut())
        {
            *rate += delta;
        }
    }
}

fn shift_brackets(brackets: &mut [Bracket], shift: f64) {
    for bracket in brackets {
        bracket.threshold = (bracket.threshold * (1.0 + shift)).round();
    }
}

fn apply_bracket_shift(scenario: &mut Scenario, shift: f64) {
    if shift == 0.0 {
        return;
    }
    let tax = &mut scenario.assumptions.tax;
    shift_brackets(&mut tax.federal.brackets, shift);
    shift_brackets(&mut tax.provincial.brackets, shift);
    for overrides in scenario.overrides.values_mut() {
        if let Some(brackets) = overrides.federal_brackets.as_mut() {
            shift_brackets(brackets, shift);
        }
        if let Some(brackets) = overrides.provincial_brackets.as_mut() {
            shift_brackets(brackets, shift);
        }
    }
}

/// Multiplies manual entries and fixed scheduled amounts on `field`.
fn scale_field(scenario: &mut Scenario, field: FieldId, scale: f64) {
    if scale == 1.0 {
        return;
    }
    for year in &mut scenario.years {
        let value = field.get(year);
        field.set(year, value * scale);
    }
    for item in scenario.scheduled.iter_mut().filter(|i| i.field == field) {
        if let Amount::Fixed { value } = &mut item.amount {
            *value *= scale;
        }
    }
}

fn apply_income_scaling(scenario: &mut Scenario, adjustments: &WhatIfAdjustments) {
    let scale = adjustments.employment_scale.max(0.0);
    scale_field(scenario, FieldId::EmploymentIncome, scale);
    let scale = adjustments.self_employment_scale.max(0.0);
    scale_field(scenario, FieldId::SelfEmploymentIncome, scale);
    let scale = adjustments.investment_scale.max(0.0);
    for field in [
        FieldId::InterestIncome,
        FieldId::EligibleDividends,
        FieldId::NonEligibleDividends,
        FieldId::CapitalGainsRealized,
    ] {
        scale_field(scenario, field, scale);
    }
}

fn apply_redirect(scenario: &mut Scenario, redirect: ContributionRedirect) {
    if !redirect.from.is_registered() || !redirect.to.is_registered() {
        warn!(
            from = redirect.from.label(),
            to = redirect.to.label(),
            "contribution redirect ignored: both accounts must be registered"
        );
        return;
    }
    if redirect.from == redirect.to {
        return;
    }
    let fraction = redirect.fraction.clamp(0.0, 1.0);
    for year in &mut scenario.years {
        let moved = year.contributions.get(redirect.from).max(0.0) * fraction;
        *year.contributions.get_mut(redirect.from) -= moved;
        *year.contributions.get_mut(redirect.to) += moved;
    }
}

/// Adds `delta` to `field` in every year, never below zero. Years left at
/// zero are only filled when no scheduled item targets the field, so the
/// delta never masks a scheduled amount; fixed scheduled amounts shift too.
/// Returns how many years dropped the delta because only percentage items
/// target the field.
fn shift_field(scenario: &mut Scenario, field: FieldId, delta: f64) -> usize {
    if delta == 0.0 {
        return 0;
    }
    let mut targeting = scenario.scheduled.iter().filter(|i| i.field == field).peekable();
    let scheduled = targeting.peek().is_some();
    let percentage_only = targeting.all(|i| matches!(i.amount, Amount::Percentage { .. }));

    let mut skipped = 0;
    for year in &mut scenario.years {
        let value = field.get(year);
        if value != 0.0 || !scheduled {
            field.set(year, (value + delta).max(0.0));
        } else {
            skipped += 1;
        }
    }
    for item in scenario.scheduled.iter_mut().filter(|i| i.field == field) {
        if let Amount::Fixed { value } = &mut item.amount {
            *value = (*value + delta).max(0.0);
        }
    }

    let dropped = if scheduled && percentage_only { skipped } else { 0 };
    if dropped > 0 {
        warn!(
            field = field.key(),
            years = dropped,
            delta,
            "flat delta ignored: field is scheduled as a percentage"
        );
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AssumptionOverrides, Growth, ScheduledItem, YearData};

    fn scenario() -> Scenario {
        let mut years: Vec<YearData> = (2024..2027)
            .map(|year| YearData {
                year,
                employment_income: 100_000.0,
                interest_income: 1_000.0,
                expenses: 30_000.0,
                ..YearData::default()
            })
            .collect();
        years[0].contributions.rrsp = 10_000.0;
        let mut scenario = Scenario {
            years,
            ..Scenario::default()
        };
        scenario.overrides.insert(
            2025,
            AssumptionOverrides {
                inflation_rate: Some(0.03),
                federal_brackets: Some(scenario.assumptions.tax.federal.brackets.clone()),
                ..AssumptionOverrides::default()
            },
        );
        scenario
    }

    #[test]
    fn neutral_adjustments_return_the_same_reference() {
        let s = scenario();
        let result = apply_what_if(&s, &WhatIfAdjustments::default());
        assert!(matches!(result, Cow::Borrowed(_)));
        assert!(std::ptr::eq(result.as_ref(), &s));
    }

    #[test]
    fn adjustments_never_touch_the_input() {
        let s = scenario();
        let before = s.clone();
        let adjustments = WhatIfAdjustments {
            return_delta: -0.01,
            inflation_delta: 0.01,
            bracket_shift: 0.1,
            employment_scale: 0.5,
            expense_delta: 5_000.0,
            ..WhatIfAdjustments::default()
        };
        let variant = apply_what_if(&s, &adjustments);
        assert_eq!(s, before);
        assert!(matches!(variant, Cow::Owned(_)));

        assert_eq!(variant.years[0].employment_income, 50_000.0);
        assert_eq!(variant.years[0].expenses, 35_000.0);
        assert!((variant.assumptions.inflation_rate - 0.03).abs() < 1e-12);
        assert!((variant.overrides[&2025].inflation_rate.unwrap() - 0.04).abs() < 1e-12);
        assert_eq!(variant.assumptions.tax.federal.brackets[1].threshold, 61_454.0);
        assert_eq!(
            variant.overrides[&2025].federal_brackets.as_ref().unwrap()[1].threshold,
            61_454.0
        );
        assert!((variant.assumptions.returns.equity - 0.05).abs() < 1e-12);
    }

    #[test]
    fn redirect_is_zero_sum_between_registered_accounts() {
        let s = scenario();
        let adjustments = WhatIfAdjustments {
            contribution_redirect: Some(ContributionRedirect {
                from: AccountKind::Rrsp,
                to: AccountKind::Tfsa,
                fraction: 0.25,
            }),
            ..WhatIfAdjustments::default()
        };
        let variant = apply_what_if(&s, &adjustments);
        assert_eq!(variant.years[0].contributions.rrsp, 7_500.0);
        assert_eq!(variant.years[0].contributions.tfsa, 2_500.0);
        assert_eq!(
            variant.years[0].contributions.total(),
            s.years[0].contributions.total()
        );

        let to_cash = WhatIfAdjustments {
            contribution_redirect: Some(ContributionRedirect {
                from: AccountKind::Rrsp,
                to: AccountKind::NonRegistered,
                fraction: 0.5,
            }),
            ..WhatIfAdjustments::default()
        };
        let variant = apply_what_if(&s, &to_cash);
        assert_eq!(variant.years[0].contributions, s.years[0].contributions);
    }

    #[test]
    fn flat_deltas_clamp_at_zero_and_respect_scheduled_fields() {
        let mut s = scenario();
        s.years[1].expenses = 0.0;
        s.scheduled.push(ScheduledItem {
            name: "rent".to_string(),
            field: FieldId::Expenses,
            amount: Amount::Fixed { value: 20_000.0 },
            min_amount: None,
            max_amount: None,
            min_ref: None,
            max_ref: None,
            start_year: 2025,
            end_year: Some(2025),
            growth: Growth::None,
            conditions: Vec::new(),
        });
        let adjustments = WhatIfAdjustments {
            expense_delta: -40_000.0,
            savings_delta: 2_000.0,
            ..WhatIfAdjustments::default()
        };
        let variant = apply_what_if(&s, &adjustments);
        assert_eq!(variant.years[0].expenses, 0.0);
        assert_eq!(variant.years[1].expenses, 0.0);
        assert_eq!(
            variant.scheduled[0].amount,
            Amount::Fixed { value: 0.0 }
        );
        assert!(variant.years.iter().all(|y| y.contributions.non_registered == 2_000.0));
    }

    #[test]
    fn flat_delta_on_percentage_scheduled_field_is_reported() {
        let mut s = scenario();
        s.years[2].contributions.non_registered = 1_000.0;
        s.scheduled.push(ScheduledItem {
            name: "save a tenth".to_string(),
            field: FieldId::NonRegisteredContribution,
            amount: Amount::Percentage {
                fraction: 0.1,
                of: crate::core::types::Quantity::Field(FieldId::EmploymentIncome),
            },
            min_amount: None,
            max_amount: None,
            min_ref: None,
            max_ref: None,
            start_year: 2024,
            end_year: None,
            growth: Growth::None,
            conditions: Vec::new(),
        });
        let original = s.scheduled[0].amount;

        let dropped = shift_field(&mut s, FieldId::NonRegisteredContribution, 500.0);
        assert_eq!(dropped, 2);
        assert_eq!(s.years[0].contributions.non_registered, 0.0);
        assert_eq!(s.years[2].contributions.non_registered, 1_500.0);
        assert_eq!(s.scheduled[0].amount, original);

        // a fixed item alongside absorbs the delta
        let mut mixed = scenario();
        mixed.scheduled.push(ScheduledItem {
            amount: Amount::Fixed { value: 300.0 },
            ..s.scheduled[0].clone()
        });
        mixed.scheduled.push(s.scheduled[0].clone());
        assert_eq!(
            shift_field(&mut mixed, FieldId::NonRegisteredContribution, 500.0),
            0
        );
        assert_eq!(mixed.scheduled[0].amount, Amount::Fixed { value: 800.0 });
    }

    #[test]
    fn allocation_override_applies_to_every_account() {
        let s = scenario();
        let all_cash = Allocation {
            equity: 0.0,
            fixed_income: 0.0,
            cash: 1.0,
        };
        let adjustments = WhatIfAdjustments {
            allocation_override: Some(all_cash),
            ..WhatIfAdjustments::default()
        };
        let variant = apply_what_if(&s, &adjustments);
        assert!(variant.assumptions.allocations.iter().all(|(_, a)| *a == all_cash));
    }
}
