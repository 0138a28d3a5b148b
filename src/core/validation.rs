//! Per-year compliance checks. Findings are attached to the year and never
//! stop the projection.

use super::benefits::BenefitKind;
use super::ledger::AvailableRoom;
use super::types::{
    AccountKind, Accounts, FieldId, RetirementBenefits, Severity, ValidationWarning, YearData,
};

/// RRSP excess tolerated before the penalty tax applies.
pub const RRSP_OVER_CONTRIBUTION_BUFFER: f64 = 2_000.0;

/// Everything the rules look at for one year.
#[derive(Debug, Clone, Copy)]
pub struct YearFacts<'a> {
    pub year: i32,
    pub first_year: bool,
    pub inputs: &'a YearData,
    pub room: &'a AvailableRoom,
    pub opening_balances: &'a Accounts<f64>,
    pub capital_loss_available: f64,
    pub benefits: &'a RetirementBenefits,
}

type Rule = fn(&YearFacts<'_>, &mut Vec<ValidationWarning>);

const RULES: &[Rule] = &[
    contribution_room,
    fhsa_lifetime_limit,
    withdrawal_balance,
    capital_loss_carry_forward,
    negative_entries,
    benefit_start_ages,
];

pub fn validate_year(facts: &YearFacts<'_>) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    for rule in RULES {
        rule(facts, &mut warnings);
    }
    warnings
}

fn push(
    out: &mut Vec<ValidationWarning>,
    year: i32,
    field: &str,
    severity: Severity,
    message: String,
) {
    out.push(ValidationWarning {
        year,
        field: field.to_string(),
        message,
        severity,
    });
}

fn contribution_room(facts: &YearFacts<'_>, out: &mut Vec<ValidationWarning>) {
    let checks = [
        (AccountKind::Rrsp, facts.room.rrsp),
        (AccountKind::Tfsa, facts.room.tfsa),
        (AccountKind::Fhsa, facts.room.fhsa),
    ];
    for (kind, room) in checks {
        let contributed = *facts.inputs.contributions.get(kind);
        let excess = contributed - room.max(0.0);
        if contributed <= 0.0 || excess <= 0.0 {
            continue;
        }
        let severity = match kind {
            AccountKind::Rrsp if excess <= RRSP_OVER_CONTRIBUTION_BUFFER => Severity::Warning,
            AccountKind::Rrsp | AccountKind::Tfsa => Severity::Error,
            _ => Severity::Warning,
        };
        push(
            out,
            facts.year,
            FieldId::contribution(kind).key(),
            severity,
            format!(
                "{} contribution of {contributed:.2} exceeds available room of {room:.2} by {excess:.2}",
                kind.label()
            ),
        );
    }
}

fn fhsa_lifetime_limit(facts: &YearFacts<'_>, out: &mut Vec<ValidationWarning>) {
    let contributed = facts.inputs.contributions.fhsa;
    if contributed > facts.room.fhsa_lifetime_remaining {
        push(
            out,
            facts.year,
            FieldId::FhsaContribution.key(),
            Severity::Error,
            format!(
                "FHSA contribution of {contributed:.2} exceeds the {:.2} left under the lifetime limit",
                facts.room.fhsa_lifetime_remaining
            ),
        );
    }
}

fn withdrawal_balance(facts: &YearFacts<'_>, out: &mut Vec<ValidationWarning>) {
    for kind in AccountKind::ALL {
        let withdrawn = *facts.inputs.withdrawals.get(kind);
        let available = facts.opening_balances.get(kind) + facts.inputs.contributions.get(kind).max(0.0);
        if withdrawn > available + 0.005 {
            push(
                out,
                facts.year,
                FieldId::withdrawal(kind).key(),
                Severity::Error,
                format!(
                    "{} withdrawal of {withdrawn:.2} exceeds the available balance of {available:.2}",
                    kind.label()
                ),
            );
        }
    }
}

fn capital_loss_carry_forward(facts: &YearFacts<'_>, out: &mut Vec<ValidationWarning>) {
    let requested = facts.inputs.capital_loss_applied;
    if requested > facts.capital_loss_available + 0.005 {
        push(
            out,
            facts.year,
            FieldId::CapitalLossApplied.key(),
            Severity::Warning,
            format!(
                "capital loss applied of {requested:.2} exceeds the carry-forward of {:.2}; only the carry-forward is used",
                facts.capital_loss_available
            ),
        );
    }
}

fn negative_entries(facts: &YearFacts<'_>, out: &mut Vec<ValidationWarning>) {
    for field in FieldId::ALL {
        // a negative realized gain is a net capital loss
        if field == FieldId::CapitalGainsRealized {
            continue;
        }
        let value = field.get(facts.inputs);
        if value < 0.0 {
            push(
                out,
                facts.year,
                field.key(),
                Severity::Warning,
                format!("negative value {value:.2} is treated as zero"),
            );
        }
    }
}

fn benefit_start_ages(facts: &YearFacts<'_>, out: &mut Vec<ValidationWarning>) {
    if !facts.first_year {
        return;
    }
    for (kind, field) in [
        (BenefitKind::Cpp, "assumptions.benefits.cppStartAge"),
        (BenefitKind::Oas, "assumptions.benefits.oasStartAge"),
    ] {
        let requested = kind.start_age(facts.benefits);
        let clamped = kind.clamp_age(requested);
        if requested != clamped {
            push(
                out,
                facts.year,
                field,
                Severity::Warning,
                format!(
                    "start age {requested} is outside {}-{}; {clamped} is used",
                    kind.earliest_age(),
                    kind.latest_age()
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn benefits() -> RetirementBenefits {
        RetirementBenefits {
            cpp_monthly_at_65: 1_000.0,
            cpp_start_age: 65,
            oas_monthly_at_65: 700.0,
            oas_start_age: 65,
        }
    }

    fn room() -> AvailableRoom {
        AvailableRoom {
            rrsp: 10_000.0,
            tfsa: 7_000.0,
            fhsa: 8_000.0,
            fhsa_lifetime_remaining: 40_000.0,
        }
    }

    fn check(inputs: &YearData, room: &AvailableRoom, benefits: &RetirementBenefits) -> Vec<ValidationWarning> {
        let balances = Accounts {
            rrsp: 1_000.0,
            tfsa: 1_000.0,
            fhsa: 0.0,
            non_registered: 0.0,
        };
        validate_year(&YearFacts {
            year: 2024,
            first_year: true,
            inputs,
            room,
            opening_balances: &balances,
            capital_loss_available: 500.0,
            benefits,
        })
    }

    #[test]
    fn clean_year_has_no_findings() {
        let mut inputs = YearData::default();
        inputs.contributions.rrsp = 10_000.0;
        inputs.withdrawals.tfsa = 1_000.0;
        assert!(check(&inputs, &room(), &benefits()).is_empty());
    }

    #[test]
    fn rrsp_excess_is_a_warning_within_buffer_and_an_error_beyond() {
        let mut inputs = YearData::default();
        inputs.contributions.rrsp = 11_500.0;
        let findings = check(&inputs, &room(), &benefits());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].field, "contributions.rrsp");

        inputs.contributions.rrsp = 12_500.0;
        let findings = check(&inputs, &room(), &benefits());
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn over_withdrawal_and_excess_loss_are_reported() {
        let mut inputs = YearData::default();
        inputs.withdrawals.rrsp = 1_500.0;
        inputs.capital_loss_applied = 800.0;
        let findings = check(&inputs, &room(), &benefits());
        let fields: Vec<_> = findings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(fields, ["withdrawals.rrsp", "capitalLossApplied"]);
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn fhsa_lifetime_and_negative_entries() {
        let mut inputs = YearData::default();
        inputs.contributions.fhsa = 5_000.0;
        inputs.expenses = -10.0;
        inputs.capital_gains_realized = -3_000.0;
        let mut room = room();
        room.fhsa_lifetime_remaining = 4_000.0;
        let findings = check(&inputs, &room, &benefits());
        let fields: Vec<_> = findings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(fields, ["contributions.fhsa", "expenses"]);
    }

    #[test]
    fn out_of_range_benefit_ages_are_flagged_once() {
        let mut b = benefits();
        b.cpp_start_age = 58;
        b.oas_start_age = 72;
        let findings = check(&YearData::default(), &room(), &b);
        assert_eq!(findings.len(), 2);
        assert!(findings[0].message.contains("60 is used"));
        assert!(findings[1].message.contains("70 is used"));
    }
}
