use super::types::{
    Bracket, CapitalGainsRules, InclusionMode, Jurisdiction, PayrollContributions, TaxBreakdown,
    TaxParameters,
};

/// One year's income and deductions by category, before any gross-up or inclusion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IncomeSources {
    pub employment: f64,
    pub self_employment: f64,
    pub interest: f64,
    pub eligible_dividends: f64,
    pub non_eligible_dividends: f64,
    pub pension: f64,
    pub other: f64,
    pub rrsp_withdrawals: f64,
    pub cpp_benefit: f64,
    pub oas_benefit: f64,
    pub capital_gains: f64,
    pub capital_loss_applied: f64,
    pub rrsp_deduction: f64,
    pub fhsa_deduction: f64,
    pub other_deductions: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxOutcome {
    pub breakdown: TaxBreakdown,
    pub payroll: PayrollContributions,
}

#[derive(Debug, Clone, Copy)]
struct JurisdictionTax {
    tax: f64,
    dividend_credit: f64,
}

pub fn calculate_tax(income: &IncomeSources, params: &TaxParameters) -> TaxOutcome {
    let payroll = payroll_contributions(income.employment, income.self_employment, params);

    let grossed_eligible =
        income.eligible_dividends.max(0.0) * (1.0 + params.eligible_dividend_gross_up);
    let grossed_non_eligible =
        income.non_eligible_dividends.max(0.0) * (1.0 + params.non_eligible_dividend_gross_up);
    let taxable_gains = taxable_capital_gains(
        income.capital_gains,
        income.capital_loss_applied,
        &params.capital_gains,
    );

    let total_income = income.employment
        + income.self_employment
        + income.interest
        + grossed_eligible
        + grossed_non_eligible
        + income.pension
        + income.other
        + income.rrsp_withdrawals.max(0.0)
        + income.cpp_benefit.max(0.0)
        + income.oas_benefit.max(0.0)
        + taxable_gains;

    let deductions = income.rrsp_deduction.max(0.0)
        + income.fhsa_deduction.max(0.0)
        + income.other_deductions.max(0.0)
        + payroll.self_employed_deduction;
    let net_income = total_income - deductions;
    let taxable_income = net_income.max(0.0);

    // Only the employee share of payroll contributions earns the credit.
    let payroll_credit_base = (payroll.total() - payroll.self_employed_deduction).max(0.0);

    let federal = jurisdiction_tax(
        &params.federal,
        taxable_income,
        payroll_credit_base,
        grossed_eligible,
        grossed_non_eligible,
    );
    let provincial = jurisdiction_tax(
        &params.provincial,
        taxable_income,
        payroll_credit_base,
        grossed_eligible,
        grossed_non_eligible,
    );

    let oas_clawback = oas_recovery_tax(net_income, income.oas_benefit, params);
    let income_tax = federal.tax + provincial.tax + oas_clawback;

    let mut marginal_rate = marginal_bracket_rate(taxable_income, &params.federal.brackets)
        + marginal_bracket_rate(taxable_income, &params.provincial.brackets);
    if oas_clawback > 0.0 && oas_clawback < income.oas_benefit {
        marginal_rate += params.oas.clawback_rate;
    }
    let average_rate = if total_income > 0.0 {
        income_tax / total_income
    } else {
        0.0
    };

    TaxOutcome {
        breakdown: TaxBreakdown {
            total_income: round_cents(total_income),
            deductions: round_cents(deductions),
            net_income: round_cents(net_income),
            taxable_income: round_cents(taxable_income),
            taxable_capital_gains: round_cents(taxable_gains),
            grossed_up_dividends: round_cents(grossed_eligible + grossed_non_eligible),
            federal_tax: round_cents(federal.tax),
            provincial_tax: round_cents(provincial.tax),
            federal_dividend_credit: round_cents(federal.dividend_credit),
            provincial_dividend_credit: round_cents(provincial.dividend_credit),
            oas_clawback: round_cents(oas_clawback),
            income_tax: round_cents(income_tax),
            marginal_rate,
            average_rate,
        },
        payroll: PayrollContributions {
            cpp: round_cents(payroll.cpp),
            cpp2: round_cents(payroll.cpp2),
            ei: round_cents(payroll.ei),
            self_employed_deduction: round_cents(payroll.self_employed_deduction),
        },
    }
}

fn jurisdiction_tax(
    jurisdiction: &Jurisdiction,
    taxable_income: f64,
    payroll_credit_base: f64,
    grossed_eligible: f64,
    grossed_non_eligible: f64,
) -> JurisdictionTax {
    let gross = bracket_tax(taxable_income, &jurisdiction.brackets);
    let lowest = lowest_rate(&jurisdiction.brackets);
    let personal_credits =
        (jurisdiction.basic_personal_amount.max(0.0) + payroll_credit_base) * lowest;
    let dividend_credit = grossed_eligible * jurisdiction.eligible_dividend_credit_rate
        + grossed_non_eligible * jurisdiction.non_eligible_dividend_credit_rate;

    JurisdictionTax {
        tax: (gross - personal_credits - dividend_credit).max(0.0),
        dividend_credit,
    }
}

/// Σ rate × (min(income, upper) − lower) over every bracket the income reaches.
pub fn bracket_tax(income: f64, brackets: &[Bracket]) -> f64 {
    if income <= 0.0 {
        return 0.0;
    }
    let mut tax = 0.0;
    for (idx, bracket) in brackets.iter().enumerate() {
        if income <= bracket.threshold {
            break;
        }
        let upper = brackets
            .get(idx + 1)
            .map(|next| next.threshold)
            .unwrap_or(f64::INFINITY);
        tax += bracket.rate * (income.min(upper) - bracket.threshold);
    }
    tax.max(0.0)
}

pub fn marginal_bracket_rate(income: f64, brackets: &[Bracket]) -> f64 {
    brackets
        .iter()
        .rev()
        .find(|b| income >= b.threshold)
        .or_else(|| brackets.first())
        .map(|b| b.rate)
        .unwrap_or(0.0)
}

fn lowest_rate(brackets: &[Bracket]) -> f64 {
    brackets.first().map(|b| b.rate).unwrap_or(0.0)
}

/// CPP first and second tier plus EI. Self-employed earnings pay both halves of
/// CPP and the employer half becomes a deduction.
pub fn payroll_contributions(
    employment: f64,
    self_employment: f64,
    params: &TaxParameters,
) -> PayrollContributions {
    let cpp = &params.cpp;
    let employment = employment.max(0.0);
    let self_employment = self_employment.max(0.0);

    let first_tier =
        |earnings: f64| (earnings.min(cpp.primary_ceiling) - cpp.basic_exemption).max(0.0);
    let second_tier =
        |earnings: f64| (earnings.min(cpp.additional_ceiling) - cpp.primary_ceiling).max(0.0);

    let employee_first = first_tier(employment);
    let self_employed_first = (first_tier(employment + self_employment) - employee_first).max(0.0);
    let employee_second = second_tier(employment);
    let self_employed_second =
        (second_tier(employment + self_employment) - employee_second).max(0.0);

    let employer_half =
        self_employed_first * cpp.rate + self_employed_second * cpp.second_rate;

    let insurable = if params.ei.self_employed_opt_in {
        employment + self_employment
    } else {
        employment
    };
    let ei = insurable.min(params.ei.max_insurable_earnings).max(0.0) * params.ei.rate;

    PayrollContributions {
        cpp: (employee_first + 2.0 * self_employed_first) * cpp.rate,
        cpp2: (employee_second + 2.0 * self_employed_second) * cpp.second_rate,
        ei,
        self_employed_deduction: employer_half,
    }
}

/// Included portion of realized gains after applying carried-forward losses.
pub fn taxable_capital_gains(gains: f64, loss_applied: f64, rules: &CapitalGainsRules) -> f64 {
    let net = (gains - loss_applied.max(0.0)).max(0.0);
    match rules.mode {
        InclusionMode::Flat => net * rules.inclusion_rate,
        InclusionMode::Tiered => {
            let lower = net.min(rules.tier_threshold.max(0.0));
            let upper = (net - lower).max(0.0);
            lower * rules.inclusion_rate + upper * rules.upper_inclusion_rate
        }
    }
}

fn oas_recovery_tax(net_income: f64, oas_received: f64, params: &TaxParameters) -> f64 {
    if oas_received <= 0.0 {
        return 0.0;
    }
    let excess = (net_income - params.oas.clawback_threshold).max(0.0);
    (excess * params.oas.clawback_rate).min(oas_received)
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::defaults::tax_parameters;
    use crate::core::types::Province;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn ontario() -> TaxParameters {
        tax_parameters(Province::Ontario)
    }

    #[test]
    fn federal_bracket_tax_matches_hand_calculation() {
        let params = ontario();
        // 55,867 * 15% + (75,000 - 55,867) * 20.5%
        assert_approx(
            bracket_tax(75_000.0, &params.federal.brackets),
            8_380.05 + 3_922.265,
        );
        assert_approx(bracket_tax(0.0, &params.federal.brackets), 0.0);
        assert_approx(bracket_tax(-5_000.0, &params.federal.brackets), 0.0);
    }

    #[test]
    fn rrsp_deduction_reduces_taxable_income_one_for_one() {
        let income = IncomeSources {
            employment: 80_000.0,
            rrsp_deduction: 5_000.0,
            ..IncomeSources::default()
        };
        let outcome = calculate_tax(&income, &ontario());
        assert_approx(outcome.breakdown.net_income, 75_000.0);
        assert_approx(outcome.breakdown.taxable_income, 75_000.0);
        assert_approx(outcome.breakdown.deductions, 5_000.0);
    }

    #[test]
    fn employee_payroll_caps_at_ceilings() {
        let payroll = payroll_contributions(100_000.0, 0.0, &ontario());
        assert_approx(payroll.cpp, (68_500.0 - 3_500.0) * 0.0595);
        assert_approx(payroll.cpp2, (73_200.0 - 68_500.0) * 0.04);
        assert_approx(payroll.ei, 63_200.0 * 0.0166);
        assert_approx(payroll.self_employed_deduction, 0.0);
    }

    #[test]
    fn self_employed_pays_both_halves_and_skips_ei_without_opt_in() {
        let payroll = payroll_contributions(0.0, 50_000.0, &ontario());
        assert_approx(payroll.cpp, 46_500.0 * 0.119);
        assert_approx(payroll.self_employed_deduction, 46_500.0 * 0.0595);
        assert_approx(payroll.ei, 0.0);

        let mut params = ontario();
        params.ei.self_employed_opt_in = true;
        let payroll = payroll_contributions(0.0, 50_000.0, &params);
        assert_approx(payroll.ei, 50_000.0 * 0.0166);
    }

    #[test]
    fn mixed_earnings_share_one_basic_exemption() {
        let payroll = payroll_contributions(40_000.0, 10_000.0, &ontario());
        let employee = (40_000.0 - 3_500.0) * 0.0595;
        let self_employed = 10_000.0 * 0.119;
        assert_approx(payroll.cpp, employee + self_employed);
    }

    #[test]
    fn tiered_inclusion_splits_at_threshold() {
        let mut rules = ontario().capital_gains;
        rules.mode = InclusionMode::Tiered;
        let included = taxable_capital_gains(300_000.0, 0.0, &rules);
        assert_approx_tol(included, 125_000.0 + 50_000.0 * 2.0 / 3.0, 1e-6);

        rules.mode = InclusionMode::Flat;
        assert_approx(taxable_capital_gains(300_000.0, 0.0, &rules), 150_000.0);
    }

    #[test]
    fn applied_losses_offset_gains_but_not_below_zero() {
        let rules = ontario().capital_gains;
        assert_approx(taxable_capital_gains(10_000.0, 6_000.0, &rules), 2_000.0);
        assert_approx(taxable_capital_gains(10_000.0, 16_000.0, &rules), 0.0);
    }

    #[test]
    fn dividend_credits_never_push_tax_negative() {
        let income = IncomeSources {
            eligible_dividends: 40_000.0,
            ..IncomeSources::default()
        };
        let outcome = calculate_tax(&income, &ontario());
        assert!(outcome.breakdown.federal_dividend_credit > 0.0);
        assert!(outcome.breakdown.federal_tax >= 0.0);
        assert!(outcome.breakdown.provincial_tax >= 0.0);
        assert_approx(outcome.breakdown.grossed_up_dividends, 55_200.0);
    }

    #[test]
    fn oas_recovery_tax_is_fifteen_percent_of_excess_and_capped() {
        let params = ontario();
        assert_approx(oas_recovery_tax(100_997.0, 8_556.0, &params), 1_500.0);
        assert_approx(oas_recovery_tax(500_000.0, 8_556.0, &params), 8_556.0);
        assert_approx(oas_recovery_tax(500_000.0, 0.0, &params), 0.0);
    }

    #[test]
    fn marginal_rate_combines_both_jurisdictions() {
        let income = IncomeSources {
            employment: 75_000.0,
            ..IncomeSources::default()
        };
        let outcome = calculate_tax(&income, &ontario());
        assert_approx(outcome.breakdown.marginal_rate, 0.205 + 0.0915);
        assert!(outcome.breakdown.average_rate > 0.0);
        assert!(outcome.breakdown.average_rate < outcome.breakdown.marginal_rate);
    }

    #[test]
    fn business_losses_clamp_to_zero_tax() {
        let income = IncomeSources {
            self_employment: -40_000.0,
            interest: 1_000.0,
            ..IncomeSources::default()
        };
        let outcome = calculate_tax(&income, &ontario());
        assert_approx(outcome.breakdown.taxable_income, 0.0);
        assert_approx(outcome.breakdown.income_tax, 0.0);
        assert!(outcome.breakdown.net_income < 0.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_tax_payable_is_never_negative(
            employment in -50_000i64..600_000,
            self_employment in -50_000i64..300_000,
            eligible in 0u32..200_000,
            non_eligible in 0u32..100_000,
            gains in -100_000i64..800_000,
            loss_applied in 0u32..100_000,
            rrsp in 0u32..40_000,
            oas in 0u32..10_000,
        ) {
            let income = IncomeSources {
                employment: employment as f64,
                self_employment: self_employment as f64,
                eligible_dividends: eligible as f64,
                non_eligible_dividends: non_eligible as f64,
                capital_gains: gains as f64,
                capital_loss_applied: loss_applied as f64,
                rrsp_deduction: rrsp as f64,
                oas_benefit: oas as f64,
                ..IncomeSources::default()
            };
            let outcome = calculate_tax(&income, &ontario());
            let b = outcome.breakdown;
            prop_assert!(b.federal_tax >= 0.0);
            prop_assert!(b.provincial_tax >= 0.0);
            prop_assert!(b.oas_clawback >= 0.0 && b.oas_clawback <= oas as f64);
            prop_assert!(b.income_tax >= 0.0);
            prop_assert!(b.income_tax.is_finite());
            prop_assert!(outcome.payroll.total() >= 0.0);
        }
    }
}
