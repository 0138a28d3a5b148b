//! 2024 parameter tables used when a scenario leaves assumptions unset.

use super::types::{
    Accounts, Allocation, AssetReturns, Assumptions, Bracket, CapitalGainsRules,
    ContributionLimits, CppParameters, EiParameters, InclusionMode, Jurisdiction, OasParameters,
    Province, RetirementBenefits, TaxParameters,
};

fn brackets(rows: &[(f64, f64)]) -> Vec<Bracket> {
    rows.iter()
        .map(|&(threshold, rate)| Bracket { threshold, rate })
        .collect()
}

pub fn federal_jurisdiction() -> Jurisdiction {
    Jurisdiction {
        brackets: brackets(&[
            (0.0, 0.15),
            (55_867.0, 0.205),
            (111_733.0, 0.26),
            (173_205.0, 0.29),
            (246_752.0, 0.33),
        ]),
        basic_personal_amount: 15_705.0,
        eligible_dividend_credit_rate: 0.150198,
        non_eligible_dividend_credit_rate: 0.090301,
    }
}

pub fn provincial_jurisdiction(province: Province) -> Jurisdiction {
    match province {
        Province::Ontario => Jurisdiction {
            brackets: brackets(&[
                (0.0, 0.0505),
                (51_446.0, 0.0915),
                (102_894.0, 0.1116),
                (150_000.0, 0.1216),
                (220_000.0, 0.1316),
            ]),
            basic_personal_amount: 12_399.0,
            eligible_dividend_credit_rate: 0.10,
            non_eligible_dividend_credit_rate: 0.029863,
        },
        Province::BritishColumbia => Jurisdiction {
            brackets: brackets(&[
                (0.0, 0.0506),
                (47_937.0, 0.077),
                (95_875.0, 0.105),
                (110_076.0, 0.1229),
                (133_664.0, 0.147),
                (181_232.0, 0.168),
                (252_752.0, 0.205),
            ]),
            basic_personal_amount: 12_580.0,
            eligible_dividend_credit_rate: 0.12,
            non_eligible_dividend_credit_rate: 0.0196,
        },
        Province::Alberta => Jurisdiction {
            brackets: brackets(&[
                (0.0, 0.10),
                (148_269.0, 0.12),
                (177_922.0, 0.13),
                (237_230.0, 0.14),
                (355_845.0, 0.15),
            ]),
            basic_personal_amount: 21_885.0,
            eligible_dividend_credit_rate: 0.0812,
            non_eligible_dividend_credit_rate: 0.0218,
        },
    }
}

pub fn tax_parameters(province: Province) -> TaxParameters {
    TaxParameters {
        federal: federal_jurisdiction(),
        provincial: provincial_jurisdiction(province),
        eligible_dividend_gross_up: 0.38,
        non_eligible_dividend_gross_up: 0.15,
        capital_gains: CapitalGainsRules {
            mode: InclusionMode::Flat,
            inclusion_rate: 0.5,
            tier_threshold: 250_000.0,
            upper_inclusion_rate: 2.0 / 3.0,
        },
        cpp: CppParameters {
            basic_exemption: 3_500.0,
            primary_ceiling: 68_500.0,
            additional_ceiling: 73_200.0,
            rate: 0.0595,
            second_rate: 0.04,
        },
        ei: EiParameters {
            max_insurable_earnings: 63_200.0,
            rate: 0.0166,
            self_employed_opt_in: false,
        },
        limits: ContributionLimits {
            rrsp_rate: 0.18,
            rrsp_dollar_limit: 31_560.0,
            tfsa_annual_limit: 7_000.0,
            fhsa_annual_limit: 8_000.0,
            fhsa_lifetime_limit: 40_000.0,
        },
        oas: OasParameters {
            clawback_threshold: 90_997.0,
            clawback_rate: 0.15,
        },
    }
}

impl Default for RetirementBenefits {
    fn default() -> Self {
        Self {
            cpp_monthly_at_65: 1_000.0,
            cpp_start_age: 65,
            oas_monthly_at_65: 713.0,
            oas_start_age: 65,
        }
    }
}

impl Default for Assumptions {
    fn default() -> Self {
        let balanced = Allocation {
            equity: 0.6,
            fixed_income: 0.3,
            cash: 0.1,
        };
        Self {
            province: Province::Ontario,
            birth_year: 1985,
            base_year: None,
            inflation_rate: 0.02,
            auto_index: true,
            tax: tax_parameters(Province::Ontario),
            benefits: RetirementBenefits::default(),
            returns: AssetReturns {
                equity: 0.06,
                fixed_income: 0.035,
                cash: 0.02,
            },
            allocations: Accounts::splat(balanced),
        }
    }
}
