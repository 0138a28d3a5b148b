mod analytics;
mod assumptions;
mod benefits;
mod compare;
mod defaults;
mod engine;
mod error;
mod ledger;
mod schedule;
mod tax;
mod types;
mod validation;
mod whatif;

pub use analytics::aggregate;
pub use assumptions::{inflation_factors, resolve_assumptions};
pub use benefits::{BenefitKind, retirement_income};
pub use compare::{
    AgeTotal, DeferralRow, DeferralTable, SensitivityParameter, SensitivityPoint,
    SensitivityResult, StrategyOutcome, VariantSummary, WithdrawalComparison,
    compute_cpp_deferral, compute_deferral, compute_oas_deferral, compute_sensitivity,
    compute_withdrawal_strategies,
};
pub use defaults::{federal_jurisdiction, provincial_jurisdiction, tax_parameters};
pub use engine::{compute, resolve_scenario_assumptions};
pub use error::{Error, Result};
pub use tax::{IncomeSources, TaxOutcome, calculate_tax};
pub use types::{
    AccountKind, AccountYear, Accounts, Allocation, Amount, Analytics, AssetReturns,
    AssumptionOverrides, Assumptions, Bracket, CapitalGainsRules, Comparator, ComputedScenario,
    ComputedYear, Condition, ContributionLimits, CppParameters, EiParameters, FieldId, Growth,
    InclusionMode, IncomeWaterfall, Jurisdiction, Liability, LiabilitySummary, OasParameters,
    OpeningCarryForward, PayrollContributions, Province, Quantity, ResolvedAssumptions,
    RetirementBenefits, RetirementIncome, RoomSnapshot, Scenario, ScheduledItem, Severity,
    TaxBreakdown, TaxParameters, ValidationWarning, WithdrawalOrder, WithdrawalPlan, YearData,
};
pub use whatif::{ContributionRedirect, WhatIfAdjustments, apply_what_if};
