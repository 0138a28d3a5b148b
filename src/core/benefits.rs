use serde::{Deserialize, Serialize};

use super::types::{RetirementBenefits, RetirementIncome};

pub const STANDARD_START_AGE: u32 = 65;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenefitKind {
    Cpp,
    Oas,
}

impl BenefitKind {
    pub fn earliest_age(self) -> u32 {
        match self {
            BenefitKind::Cpp => 60,
            BenefitKind::Oas => 65,
        }
    }

    pub fn latest_age(self) -> u32 {
        70
    }

    pub fn clamp_age(self, age: u32) -> u32 {
        age.clamp(self.earliest_age(), self.latest_age())
    }

    /// Multiplier on the age-65 amount for a given start age.
    ///
    /// CPP: -0.6% per month before 65, +0.7% per month after.
    /// OAS: +0.6% per month of deferral.
    pub fn adjustment_factor(self, start_age: u32) -> f64 {
        let age = self.clamp_age(start_age);
        if age < STANDARD_START_AGE {
            let months_early = ((STANDARD_START_AGE - age) * 12) as f64;
            1.0 - 0.006 * months_early
        } else {
            let months_late = ((age - STANDARD_START_AGE) * 12) as f64;
            let monthly_increase = match self {
                BenefitKind::Cpp => 0.007,
                BenefitKind::Oas => 0.006,
            };
            1.0 + monthly_increase * months_late
        }
    }

    pub fn monthly_at_65(self, benefits: &RetirementBenefits) -> f64 {
        match self {
            BenefitKind::Cpp => benefits.cpp_monthly_at_65,
            BenefitKind::Oas => benefits.oas_monthly_at_65,
        }
    }

    pub fn start_age(self, benefits: &RetirementBenefits) -> u32 {
        match self {
            BenefitKind::Cpp => benefits.cpp_start_age,
            BenefitKind::Oas => benefits.oas_start_age,
        }
    }

    /// Monthly amount in base-year dollars when starting at `start_age`.
    pub fn monthly_amount(self, benefits: &RetirementBenefits, start_age: u32) -> f64 {
        self.monthly_at_65(benefits).max(0.0) * self.adjustment_factor(start_age)
    }

    /// Annual amount paid at `age`, scaled to nominal dollars by `inflation_factor`.
    pub fn annual_income(self, benefits: &RetirementBenefits, age: i32, inflation_factor: f64) -> f64 {
        let start_age = self.clamp_age(self.start_age(benefits));
        if age < start_age as i32 {
            return 0.0;
        }
        self.monthly_amount(benefits, start_age) * 12.0 * inflation_factor
    }
}

pub fn retirement_income(
    benefits: &RetirementBenefits,
    age: i32,
    inflation_factor: f64,
) -> RetirementIncome {
    RetirementIncome {
        cpp: BenefitKind::Cpp.annual_income(benefits, age, inflation_factor),
        oas: BenefitKind::Oas.annual_income(benefits, age, inflation_factor),
    }
}
