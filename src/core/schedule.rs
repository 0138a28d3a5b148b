use std::collections::BTreeMap;

use tracing::debug;

use super::error::{Error, Result};
use super::ledger::AvailableRoom;
use super::types::{
    AccountKind, Amount, Comparator, ComputedYear, Condition, FieldId, Growth, Quantity,
    ScheduledItem, YearData,
};

const EQ_TOLERANCE: f64 = 1e-9;

impl FieldId {
    pub const ALL: [FieldId; 19] = [
        FieldId::EmploymentIncome,
        FieldId::SelfEmploymentIncome,
        FieldId::InterestIncome,
        FieldId::EligibleDividends,
        FieldId::NonEligibleDividends,
        FieldId::PensionIncome,
        FieldId::OtherIncome,
        FieldId::CapitalGainsRealized,
        FieldId::CapitalLossApplied,
        FieldId::OtherDeductions,
        FieldId::Expenses,
        FieldId::RrspContribution,
        FieldId::TfsaContribution,
        FieldId::FhsaContribution,
        FieldId::NonRegisteredContribution,
        FieldId::RrspWithdrawal,
        FieldId::TfsaWithdrawal,
        FieldId::FhsaWithdrawal,
        FieldId::NonRegisteredWithdrawal,
    ];

    pub fn contribution(kind: AccountKind) -> Self {
        match kind {
            AccountKind::Rrsp => FieldId::RrspContribution,
            AccountKind::Tfsa => FieldId::TfsaContribution,
            AccountKind::Fhsa => FieldId::FhsaContribution,
            AccountKind::NonRegistered => FieldId::NonRegisteredContribution,
        }
    }

    pub fn withdrawal(kind: AccountKind) -> Self {
        match kind {
            AccountKind::Rrsp => FieldId::RrspWithdrawal,
            AccountKind::Tfsa => FieldId::TfsaWithdrawal,
            AccountKind::Fhsa => FieldId::FhsaWithdrawal,
            AccountKind::NonRegistered => FieldId::NonRegisteredWithdrawal,
        }
    }

    /// JSON path of the field inside a year entry.
    pub fn key(self) -> &'static str {
        match self {
            FieldId::EmploymentIncome => "employmentIncome",
            FieldId::SelfEmploymentIncome => "selfEmploymentIncome",
            FieldId::InterestIncome => "interestIncome",
            FieldId::EligibleDividends => "eligibleDividends",
            FieldId::NonEligibleDividends => "nonEligibleDividends",
            FieldId::PensionIncome => "pensionIncome",
            FieldId::OtherIncome => "otherIncome",
            FieldId::CapitalGainsRealized => "capitalGainsRealized",
            FieldId::CapitalLossApplied => "capitalLossApplied",
            FieldId::OtherDeductions => "otherDeductions",
            FieldId::Expenses => "expenses",
            FieldId::RrspContribution => "contributions.rrsp",
            FieldId::TfsaContribution => "contributions.tfsa",
            FieldId::FhsaContribution => "contributions.fhsa",
            FieldId::NonRegisteredContribution => "contributions.nonRegistered",
            FieldId::RrspWithdrawal => "withdrawals.rrsp",
            FieldId::TfsaWithdrawal => "withdrawals.tfsa",
            FieldId::FhsaWithdrawal => "withdrawals.fhsa",
            FieldId::NonRegisteredWithdrawal => "withdrawals.nonRegistered",
        }
    }

    pub fn get(self, data: &YearData) -> f64 {
        match self {
            FieldId::EmploymentIncome => data.employment_income,
            FieldId::SelfEmploymentIncome => data.self_employment_income,
            FieldId::InterestIncome => data.interest_income,
            FieldId::EligibleDividends => data.eligible_dividends,
            FieldId::NonEligibleDividends => data.non_eligible_dividends,
            FieldId::PensionIncome => data.pension_income,
            FieldId::OtherIncome => data.other_income,
            FieldId::CapitalGainsRealized => data.capital_gains_realized,
            FieldId::CapitalLossApplied => data.capital_loss_applied,
            FieldId::OtherDeductions => data.other_deductions,
            FieldId::Expenses => data.expenses,
            FieldId::RrspContribution => data.contributions.rrsp,
            FieldId::TfsaContribution => data.contributions.tfsa,
            FieldId::FhsaContribution => data.contributions.fhsa,
            FieldId::NonRegisteredContribution => data.contributions.non_registered,
            FieldId::RrspWithdrawal => data.withdrawals.rrsp,
            FieldId::TfsaWithdrawal => data.withdrawals.tfsa,
            FieldId::FhsaWithdrawal => data.withdrawals.fhsa,
            FieldId::NonRegisteredWithdrawal => data.withdrawals.non_registered,
        }
    }

    pub fn set(self, data: &mut YearData, value: f64) {
        let slot = match self {
            FieldId::EmploymentIncome => &mut data.employment_income,
            FieldId::SelfEmploymentIncome => &mut data.self_employment_income,
            FieldId::InterestIncome => &mut data.interest_income,
            FieldId::EligibleDividends => &mut data.eligible_dividends,
            FieldId::NonEligibleDividends => &mut data.non_eligible_dividends,
            FieldId::PensionIncome => &mut data.pension_income,
            FieldId::OtherIncome => &mut data.other_income,
            FieldId::CapitalGainsRealized => &mut data.capital_gains_realized,
            FieldId::CapitalLossApplied => &mut data.capital_loss_applied,
            FieldId::OtherDeductions => &mut data.other_deductions,
            FieldId::Expenses => &mut data.expenses,
            FieldId::RrspContribution => &mut data.contributions.rrsp,
            FieldId::TfsaContribution => &mut data.contributions.tfsa,
            FieldId::FhsaContribution => &mut data.contributions.fhsa,
            FieldId::NonRegisteredContribution => &mut data.contributions.non_registered,
            FieldId::RrspWithdrawal => &mut data.withdrawals.rrsp,
            FieldId::TfsaWithdrawal => &mut data.withdrawals.tfsa,
            FieldId::FhsaWithdrawal => &mut data.withdrawals.fhsa,
            FieldId::NonRegisteredWithdrawal => &mut data.withdrawals.non_registered,
        };
        *slot = value;
    }
}

/// Cumulative inflation factors for the projected years, extrapolated at
/// `base_rate` outside them.
#[derive(Debug, Clone)]
pub struct PriceIndex {
    pub first_year: i32,
    pub factors: Vec<f64>,
    pub base_rate: f64,
}

impl PriceIndex {
    pub fn factor(&self, year: i32) -> f64 {
        let Some(last) = self.factors.last().copied() else {
            return 1.0;
        };
        let offset = year - self.first_year;
        if offset < 0 {
            self.factors[0] / (1.0 + self.base_rate).powi(-offset)
        } else if let Some(factor) = self.factors.get(offset as usize) {
            *factor
        } else {
            let beyond = offset - (self.factors.len() as i32 - 1);
            last * (1.0 + self.base_rate).powi(beyond)
        }
    }

    /// Growth of prices from `from` to `to`.
    pub fn between(&self, from: i32, to: i32) -> f64 {
        let start = self.factor(from);
        if start == 0.0 {
            return 1.0;
        }
        self.factor(to) / start
    }
}

/// What a rule can see while one year is being projected.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub year: i32,
    /// Same calendar year from the previous full pass, if any.
    pub prior: Option<&'a ComputedYear>,
    pub room: AvailableRoom,
    pub capital_loss_carry_forward: f64,
    pub prices: &'a PriceIndex,
}

impl RuleContext<'_> {
    pub fn lookup(&self, quantity: Quantity) -> Option<f64> {
        let value = match quantity {
            Quantity::RrspRoom => Some(self.room.rrsp),
            Quantity::TfsaRoom => Some(self.room.tfsa),
            Quantity::FhsaRoom => Some(self.room.fhsa),
            Quantity::CapitalLossCarryForward => Some(self.capital_loss_carry_forward),
            computed => self.prior.map(|prior| computed_quantity(prior, computed)),
        };
        value.filter(|v| v.is_finite())
    }
}

fn computed_quantity(year: &ComputedYear, quantity: Quantity) -> f64 {
    match quantity {
        Quantity::Field(field) => field.get(&year.inputs),
        Quantity::GrossIncome => year.waterfall.gross_income,
        Quantity::NetIncome => year.tax.net_income,
        Quantity::TaxableIncome => year.tax.taxable_income,
        Quantity::TotalTax => year.waterfall.total_tax,
        Quantity::AfterTaxIncome => year.waterfall.after_tax_income,
        Quantity::NetCashFlow => year.waterfall.net_cash_flow,
        Quantity::NetWorth => year.net_worth,
        Quantity::Balance(kind) => year.accounts.get(kind).closing,
        Quantity::RrspRoom => year.room.rrsp,
        Quantity::TfsaRoom => year.room.tfsa,
        Quantity::FhsaRoom => year.room.fhsa,
        Quantity::CapitalLossCarryForward => year.room.capital_loss_carry_forward,
    }
}

fn holds(condition: &Condition, actual: f64) -> bool {
    let value = condition.value;
    match condition.comparator {
        Comparator::Gt => actual > value,
        Comparator::Lt => actual < value,
        Comparator::Gte => actual >= value,
        Comparator::Lte => actual <= value,
        Comparator::Eq => (actual - value).abs() <= EQ_TOLERANCE,
        Comparator::Between => condition
            .value2
            .is_some_and(|upper| actual >= value && actual <= upper),
    }
}

fn growth_factor(item: &ScheduledItem, ctx: &RuleContext<'_>) -> f64 {
    let years = ctx.year - item.start_year;
    match item.growth {
        Growth::None => 1.0,
        Growth::Fixed { rate } => (1.0 + rate).powi(years),
        Growth::Inflation => ctx.prices.between(item.start_year, ctx.year),
    }
}

/// Value an item contributes this year, or `None` when it is inactive.
pub fn evaluate_item(item: &ScheduledItem, ctx: &RuleContext<'_>) -> Option<f64> {
    if ctx.year < item.start_year || item.end_year.is_some_and(|end| ctx.year > end) {
        return None;
    }
    if item.depends_on_results() && ctx.prior.is_none() {
        return None;
    }

    for condition in &item.conditions {
        let Some(actual) = ctx.lookup(condition.quantity) else {
            debug!(item = %item.name, year = ctx.year, quantity = ?condition.quantity, "condition reference unavailable");
            return None;
        };
        if !holds(condition, actual) {
            return None;
        }
    }

    let mut value = match item.amount {
        Amount::Fixed { value } => value * growth_factor(item, ctx),
        Amount::Percentage { fraction, of } => match ctx.lookup(of) {
            Some(reference) => fraction * reference,
            None => {
                debug!(item = %item.name, year = ctx.year, quantity = ?of, "percentage reference unavailable");
                0.0
            }
        },
    };

    if let Some(min) = item.min_amount {
        value = value.max(min);
    }
    if let Some(max) = item.max_amount {
        value = value.min(max);
    }
    if let Some(min) = item.min_ref.and_then(|q| ctx.lookup(q)) {
        value = value.max(min);
    }
    if let Some(max) = item.max_ref.and_then(|q| ctx.lookup(q)) {
        value = value.min(max);
    }

    if !value.is_finite() {
        debug!(item = %item.name, year = ctx.year, "non-finite scheduled amount");
        return Some(0.0);
    }
    Some(value.max(0.0))
}

/// Active values per field; a later item replaces an earlier one on the same field.
pub fn resolve_scheduled(items: &[ScheduledItem], ctx: &RuleContext<'_>) -> BTreeMap<FieldId, f64> {
    let mut resolved = BTreeMap::new();
    for item in items {
        if let Some(value) = evaluate_item(item, ctx) {
            if resolved.insert(item.field, value).is_some() {
                debug!(year = ctx.year, field = item.field.key(), item = %item.name, "scheduled item replaces earlier value");
            }
        }
    }
    resolved
}

/// Scheduled values fill only fields the user left at zero.
pub fn layer_scheduled(manual: &YearData, scheduled: &BTreeMap<FieldId, f64>) -> YearData {
    let mut effective = manual.clone();
    for (&field, &value) in scheduled {
        if field.get(manual) == 0.0 {
            field.set(&mut effective, value);
        }
    }
    effective
}

pub fn validate_items(items: &[ScheduledItem]) -> Result<()> {
    for (index, item) in items.iter().enumerate() {
        let malformed = |reason: &str| Error::MalformedRule {
            index,
            reason: reason.to_string(),
        };

        if item.end_year.is_some_and(|end| end < item.start_year) {
            return Err(malformed("end year precedes start year"));
        }
        let amount_finite = match item.amount {
            Amount::Fixed { value } => value.is_finite(),
            Amount::Percentage { fraction, .. } => fraction.is_finite(),
        };
        if !amount_finite {
            return Err(malformed("amount is not finite"));
        }
        if let Growth::Fixed { rate } = item.growth {
            if !rate.is_finite() || rate <= -1.0 {
                return Err(malformed("growth rate must be finite and above -100%"));
            }
        }
        if [item.min_amount, item.max_amount]
            .into_iter()
            .flatten()
            .any(|v| !v.is_finite())
        {
            return Err(malformed("cap is not finite"));
        }
        for condition in &item.conditions {
            if !condition.value.is_finite() {
                return Err(malformed("condition value is not finite"));
            }
            if condition.comparator == Comparator::Between {
                match condition.value2 {
                    Some(upper) if upper.is_finite() && upper >= condition.value => {}
                    Some(_) => return Err(malformed("between upper bound is below lower bound")),
                    None => return Err(malformed("between requires a second bound")),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn prices() -> PriceIndex {
        PriceIndex {
            first_year: 2024,
            factors: vec![1.0, 1.02, 1.0404],
            base_rate: 0.02,
        }
    }

    fn fixed(field: FieldId, value: f64, start_year: i32) -> ScheduledItem {
        ScheduledItem {
            name: format!("{field:?}"),
            field,
            amount: Amount::Fixed { value },
            min_amount: None,
            max_amount: None,
            min_ref: None,
            max_ref: None,
            start_year,
            end_year: None,
            growth: Growth::None,
            conditions: Vec::new(),
        }
    }

    fn ctx<'a>(year: i32, prior: Option<&'a ComputedYear>, prices: &'a PriceIndex) -> RuleContext<'a> {
        RuleContext {
            year,
            prior,
            room: AvailableRoom::default(),
            capital_loss_carry_forward: 0.0,
            prices,
        }
    }

    #[test]
    fn field_table_round_trips_every_field() {
        let mut data = YearData::default();
        for (i, field) in FieldId::ALL.iter().enumerate() {
            field.set(&mut data, i as f64 + 1.0);
        }
        for (i, field) in FieldId::ALL.iter().enumerate() {
            assert_approx(field.get(&data), i as f64 + 1.0);
        }
    }

    #[test]
    fn window_and_growth_shape_fixed_amounts() {
        let prices = prices();
        let mut item = fixed(FieldId::Expenses, 1_000.0, 2024);
        item.end_year = Some(2025);
        item.growth = Growth::Fixed { rate: 0.1 };

        assert_eq!(evaluate_item(&item, &ctx(2023, None, &prices)), None);
        assert_approx(evaluate_item(&item, &ctx(2025, None, &prices)).unwrap(), 1_100.0);
        assert_eq!(evaluate_item(&item, &ctx(2026, None, &prices)), None);

        item.growth = Growth::Inflation;
        item.end_year = None;
        assert_approx(evaluate_item(&item, &ctx(2026, None, &prices)).unwrap(), 1_040.4);
        // beyond the projected years the base rate extrapolates
        assert_approx(
            evaluate_item(&item, &ctx(2027, None, &prices)).unwrap(),
            1_040.4 * 1.02,
        );
    }

    #[test]
    fn conditional_and_percentage_rules_wait_for_prior_pass() {
        let prices = prices();
        let mut item = fixed(FieldId::RrspContribution, 5_000.0, 2024);
        item.conditions.push(Condition {
            quantity: Quantity::Field(FieldId::EmploymentIncome),
            comparator: Comparator::Gte,
            value: 50_000.0,
            value2: None,
        });
        assert_eq!(evaluate_item(&item, &ctx(2024, None, &prices)), None);

        let mut prior = ComputedYear::default();
        prior.inputs.employment_income = 60_000.0;
        assert_eq!(
            evaluate_item(&item, &ctx(2024, Some(&prior), &prices)),
            Some(5_000.0)
        );
        prior.inputs.employment_income = 40_000.0;
        assert_eq!(evaluate_item(&item, &ctx(2024, Some(&prior), &prices)), None);
    }

    #[test]
    fn between_is_inclusive() {
        let condition = Condition {
            quantity: Quantity::NetWorth,
            comparator: Comparator::Between,
            value: 10.0,
            value2: Some(20.0),
        };
        assert!(holds(&condition, 10.0));
        assert!(holds(&condition, 20.0));
        assert!(!holds(&condition, 20.01));
    }

    #[test]
    fn percentage_of_gains_is_capped_by_live_loss_carry_forward() {
        let prices = prices();
        let mut prior = ComputedYear::default();
        prior.inputs.capital_gains_realized = 10_000.0;
        let item = ScheduledItem {
            amount: Amount::Percentage {
                fraction: 1.0,
                of: Quantity::Field(FieldId::CapitalGainsRealized),
            },
            max_ref: Some(Quantity::CapitalLossCarryForward),
            ..fixed(FieldId::CapitalLossApplied, 0.0, 2024)
        };
        let mut context = ctx(2024, Some(&prior), &prices);
        context.capital_loss_carry_forward = 6_000.0;
        assert_eq!(evaluate_item(&item, &context), Some(6_000.0));
    }

    #[test]
    fn caps_apply_then_floor_at_zero() {
        let prices = prices();
        let mut item = fixed(FieldId::OtherIncome, -50.0, 2024);
        assert_eq!(evaluate_item(&item, &ctx(2024, None, &prices)), Some(0.0));
        item.amount = Amount::Fixed { value: 900.0 };
        item.max_amount = Some(500.0);
        item.max_ref = Some(Quantity::TfsaRoom);
        let mut context = ctx(2024, None, &prices);
        context.room.tfsa = 300.0;
        assert_eq!(evaluate_item(&item, &context), Some(300.0));
    }

    #[test]
    fn later_item_wins_and_manual_entries_are_never_replaced() {
        let prices = prices();
        let items = vec![
            fixed(FieldId::Expenses, 1_000.0, 2024),
            fixed(FieldId::Expenses, 2_000.0, 2024),
            fixed(FieldId::InterestIncome, 300.0, 2024),
        ];
        let scheduled = resolve_scheduled(&items, &ctx(2024, None, &prices));
        assert_eq!(scheduled.get(&FieldId::Expenses), Some(&2_000.0));

        let manual = YearData {
            year: 2024,
            interest_income: 50.0,
            ..YearData::default()
        };
        let effective = layer_scheduled(&manual, &scheduled);
        assert_approx(effective.expenses, 2_000.0);
        assert_approx(effective.interest_income, 50.0);
    }

    #[test]
    fn malformed_items_are_rejected_with_their_index() {
        let mut inverted = fixed(FieldId::Expenses, 1.0, 2030);
        inverted.end_year = Some(2025);
        assert!(matches!(
            validate_items(&[fixed(FieldId::Expenses, 1.0, 2024), inverted]),
            Err(Error::MalformedRule { index: 1, .. })
        ));

        let mut open_between = fixed(FieldId::Expenses, 1.0, 2024);
        open_between.conditions.push(Condition {
            quantity: Quantity::NetWorth,
            comparator: Comparator::Between,
            value: 1.0,
            value2: None,
        });
        assert!(matches!(
            validate_items(&[open_between]),
            Err(Error::MalformedRule { index: 0, .. })
        ));
    }
}
