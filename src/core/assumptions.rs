use std::collections::BTreeMap;

use super::error::{Error, Result};
use super::types::{AssumptionOverrides, Assumptions, Bracket, ResolvedAssumptions, TaxParameters};

const TFSA_ROUNDING: f64 = 500.0;

/// Resolves one year's assumptions: dollar thresholds are indexed by the
/// cumulative inflation factor, rates are left alone, and any field present in
/// `overrides` replaces the indexed value outright.
pub fn resolve_assumptions(
    base: &Assumptions,
    year: i32,
    cumulative_factor: f64,
    overrides: Option<&AssumptionOverrides>,
) -> ResolvedAssumptions {
    let factor = if base.auto_index {
        cumulative_factor
    } else {
        1.0
    };

    let mut tax = base.tax.clone();
    index_thresholds(&mut tax, factor);

    let mut resolved = ResolvedAssumptions {
        year,
        inflation_factor: cumulative_factor,
        inflation_rate: base.inflation_rate,
        tax,
        returns: base.returns,
    };

    if let Some(overrides) = overrides {
        apply_overrides(&mut resolved, overrides);
    }
    resolved
}

fn index_thresholds(tax: &mut TaxParameters, factor: f64) {
    for bracket in tax
        .federal
        .brackets
        .iter_mut()
        .chain(tax.provincial.brackets.iter_mut())
    {
        bracket.threshold = index_dollars(bracket.threshold, factor);
    }
    tax.federal.basic_personal_amount = index_dollars(tax.federal.basic_personal_amount, factor);
    tax.provincial.basic_personal_amount =
        index_dollars(tax.provincial.basic_personal_amount, factor);

    tax.cpp.primary_ceiling = index_dollars(tax.cpp.primary_ceiling, factor);
    tax.cpp.additional_ceiling = index_dollars(tax.cpp.additional_ceiling, factor);
    tax.ei.max_insurable_earnings = index_dollars(tax.ei.max_insurable_earnings, factor);

    tax.limits.rrsp_dollar_limit = index_dollars(tax.limits.rrsp_dollar_limit, factor);
    tax.limits.tfsa_annual_limit =
        index_rounded_to(tax.limits.tfsa_annual_limit, factor, TFSA_ROUNDING);

    tax.oas.clawback_threshold = index_dollars(tax.oas.clawback_threshold, factor);
}

/// Scales a dollar amount and rounds to the dollar. A factor of exactly one
/// is the base year and leaves the value untouched.
pub fn index_dollars(value: f64, factor: f64) -> f64 {
    if factor == 1.0 {
        value
    } else {
        (value * factor).round()
    }
}

fn index_rounded_to(value: f64, factor: f64, step: f64) -> f64 {
    if factor == 1.0 {
        value
    } else {
        ((value * factor) / step).round() * step
    }
}

fn apply_overrides(resolved: &mut ResolvedAssumptions, overrides: &AssumptionOverrides) {
    let tax = &mut resolved.tax;

    if let Some(v) = overrides.inflation_rate {
        resolved.inflation_rate = v;
    }
    if let Some(v) = &overrides.federal_brackets {
        tax.federal.brackets = v.clone();
    }
    if let Some(v) = &overrides.provincial_brackets {
        tax.provincial.brackets = v.clone();
    }
    if let Some(v) = overrides.federal_basic_personal_amount {
        tax.federal.basic_personal_amount = v;
    }
    if let Some(v) = overrides.provincial_basic_personal_amount {
        tax.provincial.basic_personal_amount = v;
    }
    if let Some(v) = overrides.capital_gains_inclusion_rate {
        tax.capital_gains.inclusion_rate = v;
    }
    if let Some(v) = overrides.cpp_basic_exemption {
        tax.cpp.basic_exemption = v;
    }
    if let Some(v) = overrides.cpp_primary_ceiling {
        tax.cpp.primary_ceiling = v;
    }
    if let Some(v) = overrides.cpp_additional_ceiling {
        tax.cpp.additional_ceiling = v;
    }
    if let Some(v) = overrides.cpp_rate {
        tax.cpp.rate = v;
    }
    if let Some(v) = overrides.cpp_second_rate {
        tax.cpp.second_rate = v;
    }
    if let Some(v) = overrides.ei_max_insurable_earnings {
        tax.ei.max_insurable_earnings = v;
    }
    if let Some(v) = overrides.ei_rate {
        tax.ei.rate = v;
    }
    if let Some(v) = overrides.rrsp_dollar_limit {
        tax.limits.rrsp_dollar_limit = v;
    }
    if let Some(v) = overrides.tfsa_annual_limit {
        tax.limits.tfsa_annual_limit = v;
    }
    if let Some(v) = overrides.fhsa_annual_limit {
        tax.limits.fhsa_annual_limit = v;
    }
    if let Some(v) = overrides.fhsa_lifetime_limit {
        tax.limits.fhsa_lifetime_limit = v;
    }
    if let Some(v) = overrides.oas_clawback_threshold {
        tax.oas.clawback_threshold = v;
    }
    if let Some(v) = overrides.returns {
        resolved.returns = v;
    }
}

pub fn inflation_rate_for(
    base: &Assumptions,
    overrides: &BTreeMap<i32, AssumptionOverrides>,
    year: i32,
) -> f64 {
    overrides
        .get(&year)
        .and_then(|o| o.inflation_rate)
        .unwrap_or(base.inflation_rate)
}

/// Cumulative price index for each year in `first_year..first_year + count`,
/// equal to 1.0 at the base year.
pub fn inflation_factors(
    base: &Assumptions,
    overrides: &BTreeMap<i32, AssumptionOverrides>,
    first_year: i32,
    count: usize,
) -> Vec<f64> {
    let base_year = base.base_year.unwrap_or(first_year);
    let growth = |y: i32| 1.0 + inflation_rate_for(base, overrides, y);

    let mut factor = 1.0;
    if first_year > base_year {
        for y in (base_year + 1)..=first_year {
            factor *= growth(y);
        }
    } else {
        for y in (first_year + 1)..=base_year {
            factor /= growth(y).max(1e-9);
        }
    }

    let mut factors = Vec::with_capacity(count);
    for offset in 0..count {
        if offset > 0 {
            factor *= growth(first_year + offset as i32);
        }
        factors.push(factor);
    }
    factors
}

/// Brackets must start at zero and strictly ascend with finite values.
pub fn validate_brackets(brackets: &[Bracket], jurisdiction: &'static str, year: i32) -> Result<()> {
    let Some(first) = brackets.first() else {
        return Err(Error::MissingBaseBracket { jurisdiction, year });
    };
    if first.threshold != 0.0 {
        return Err(Error::MissingBaseBracket { jurisdiction, year });
    }
    if brackets
        .iter()
        .any(|b| !b.threshold.is_finite() || !b.rate.is_finite())
    {
        return Err(Error::NonFinite {
            field: jurisdiction,
            year,
        });
    }
    if brackets.windows(2).any(|w| w[0].threshold >= w[1].threshold) {
        return Err(Error::UnsortedBrackets { jurisdiction, year });
    }
    Ok(())
}
