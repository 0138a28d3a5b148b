use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountKind {
    Rrsp,
    Tfsa,
    Fhsa,
    NonRegistered,
}

impl AccountKind {
    pub const ALL: [AccountKind; 4] = [
        AccountKind::Rrsp,
        AccountKind::Tfsa,
        AccountKind::Fhsa,
        AccountKind::NonRegistered,
    ];

    pub fn is_registered(self) -> bool {
        !matches!(self, AccountKind::NonRegistered)
    }

    pub fn label(self) -> &'static str {
        match self {
            AccountKind::Rrsp => "RRSP",
            AccountKind::Tfsa => "TFSA",
            AccountKind::Fhsa => "FHSA",
            AccountKind::NonRegistered => "non-registered",
        }
    }
}

/// One value per tracked account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    default,
    rename_all = "camelCase",
    bound(deserialize = "T: Deserialize<'de> + Default")
)]
pub struct Accounts<T> {
    pub rrsp: T,
    pub tfsa: T,
    pub fhsa: T,
    pub non_registered: T,
}

impl<T> Accounts<T> {
    pub fn get(&self, kind: AccountKind) -> &T {
        match kind {
            AccountKind::Rrsp => &self.rrsp,
            AccountKind::Tfsa => &self.tfsa,
            AccountKind::Fhsa => &self.fhsa,
            AccountKind::NonRegistered => &self.non_registered,
        }
    }

    pub fn get_mut(&mut self, kind: AccountKind) -> &mut T {
        match kind {
            AccountKind::Rrsp => &mut self.rrsp,
            AccountKind::Tfsa => &mut self.tfsa,
            AccountKind::Fhsa => &mut self.fhsa,
            AccountKind::NonRegistered => &mut self.non_registered,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(AccountKind, &T) -> U) -> Accounts<U> {
        Accounts {
            rrsp: f(AccountKind::Rrsp, &self.rrsp),
            tfsa: f(AccountKind::Tfsa, &self.tfsa),
            fhsa: f(AccountKind::Fhsa, &self.fhsa),
            non_registered: f(AccountKind::NonRegistered, &self.non_registered),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (AccountKind, &T)> {
        AccountKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }
}

impl<T: Clone> Accounts<T> {
    pub fn splat(value: T) -> Self {
        Self {
            rrsp: value.clone(),
            tfsa: value.clone(),
            fhsa: value.clone(),
            non_registered: value,
        }
    }
}

impl Accounts<f64> {
    pub fn total(&self) -> f64 {
        self.rrsp + self.tfsa + self.fhsa + self.non_registered
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Province {
    #[default]
    #[serde(rename = "ON", alias = "ontario")]
    Ontario,
    #[serde(rename = "BC", alias = "britishColumbia")]
    BritishColumbia,
    #[serde(rename = "AB", alias = "alberta")]
    Alberta,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Bracket {
    /// Lower bound of the bracket; the upper bound is the next threshold.
    pub threshold: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Jurisdiction {
    pub brackets: Vec<Bracket>,
    pub basic_personal_amount: f64,
    pub eligible_dividend_credit_rate: f64,
    pub non_eligible_dividend_credit_rate: f64,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InclusionMode {
    #[default]
    Flat,
    Tiered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CapitalGainsRules {
    pub mode: InclusionMode,
    pub inclusion_rate: f64,
    pub tier_threshold: f64,
    pub upper_inclusion_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CppParameters {
    pub basic_exemption: f64,
    pub primary_ceiling: f64,
    pub additional_ceiling: f64,
    pub rate: f64,
    pub second_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EiParameters {
    pub max_insurable_earnings: f64,
    pub rate: f64,
    pub self_employed_opt_in: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContributionLimits {
    pub rrsp_rate: f64,
    pub rrsp_dollar_limit: f64,
    pub tfsa_annual_limit: f64,
    pub fhsa_annual_limit: f64,
    pub fhsa_lifetime_limit: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OasParameters {
    pub clawback_threshold: f64,
    pub clawback_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxParameters {
    pub federal: Jurisdiction,
    pub provincial: Jurisdiction,
    pub eligible_dividend_gross_up: f64,
    pub non_eligible_dividend_gross_up: f64,
    pub capital_gains: CapitalGainsRules,
    pub cpp: CppParameters,
    pub ei: EiParameters,
    pub limits: ContributionLimits,
    pub oas: OasParameters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetReturns {
    pub equity: f64,
    pub fixed_income: f64,
    pub cash: f64,
}

/// Asset-class weights for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Allocation {
    pub equity: f64,
    pub fixed_income: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetirementBenefits {
    pub cpp_monthly_at_65: f64,
    pub cpp_start_age: u32,
    pub oas_monthly_at_65: f64,
    pub oas_start_age: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Assumptions {
    pub province: Province,
    pub birth_year: i32,
    /// Year the dollar figures are expressed in; `None` means the first projected year.
    pub base_year: Option<i32>,
    pub inflation_rate: f64,
    pub auto_index: bool,
    pub tax: TaxParameters,
    pub benefits: RetirementBenefits,
    pub returns: AssetReturns,
    pub allocations: Accounts<Allocation>,
}

/// Per-year manual overrides. A present field replaces the indexed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssumptionOverrides {
    pub inflation_rate: Option<f64>,
    pub federal_brackets: Option<Vec<Bracket>>,
    pub provincial_brackets: Option<Vec<Bracket>>,
    pub federal_basic_personal_amount: Option<f64>,
    pub provincial_basic_personal_amount: Option<f64>,
    pub capital_gains_inclusion_rate: Option<f64>,
    pub cpp_basic_exemption: Option<f64>,
    pub cpp_primary_ceiling: Option<f64>,
    pub cpp_additional_ceiling: Option<f64>,
    pub cpp_rate: Option<f64>,
    pub cpp_second_rate: Option<f64>,
    pub ei_max_insurable_earnings: Option<f64>,
    pub ei_rate: Option<f64>,
    pub rrsp_dollar_limit: Option<f64>,
    pub tfsa_annual_limit: Option<f64>,
    pub fhsa_annual_limit: Option<f64>,
    pub fhsa_lifetime_limit: Option<f64>,
    pub oas_clawback_threshold: Option<f64>,
    pub returns: Option<AssetReturns>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAssumptions {
    pub year: i32,
    pub inflation_factor: f64,
    pub inflation_rate: f64,
    pub tax: TaxParameters,
    pub returns: AssetReturns,
}

/// Manual entries for one calendar year. Zero means "not entered".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YearData {
    pub year: i32,
    pub employment_income: f64,
    pub self_employment_income: f64,
    pub interest_income: f64,
    pub eligible_dividends: f64,
    pub non_eligible_dividends: f64,
    pub pension_income: f64,
    pub other_income: f64,
    /// Net realized capital gains; a negative value is a net capital loss.
    pub capital_gains_realized: f64,
    pub capital_loss_applied: f64,
    pub other_deductions: f64,
    pub expenses: f64,
    pub contributions: Accounts<f64>,
    pub withdrawals: Accounts<f64>,
    pub eoy_overrides: Accounts<Option<f64>>,
}

/// Every YearData field a scheduled item can target.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldId {
    EmploymentIncome,
    SelfEmploymentIncome,
    InterestIncome,
    EligibleDividends,
    NonEligibleDividends,
    PensionIncome,
    OtherIncome,
    CapitalGainsRealized,
    CapitalLossApplied,
    OtherDeductions,
    Expenses,
    RrspContribution,
    TfsaContribution,
    FhsaContribution,
    NonRegisteredContribution,
    RrspWithdrawal,
    TfsaWithdrawal,
    FhsaWithdrawal,
    NonRegisteredWithdrawal,
}

/// Quantities that rule amounts and conditions can reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Quantity {
    Field(FieldId),
    GrossIncome,
    NetIncome,
    TaxableIncome,
    TotalTax,
    AfterTaxIncome,
    NetCashFlow,
    NetWorth,
    Balance(AccountKind),
    RrspRoom,
    TfsaRoom,
    FhsaRoom,
    CapitalLossCarryForward,
}

impl Quantity {
    /// Carry-forward quantities are known before the year is projected.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Quantity::RrspRoom
                | Quantity::TfsaRoom
                | Quantity::FhsaRoom
                | Quantity::CapitalLossCarryForward
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Amount {
    Fixed { value: f64 },
    Percentage { fraction: f64, of: Quantity },
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Growth {
    #[default]
    None,
    Fixed {
        rate: f64,
    },
    Inflation,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "between")]
    Between,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub quantity: Quantity,
    pub comparator: Comparator,
    pub value: f64,
    #[serde(default)]
    pub value2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledItem {
    #[serde(default)]
    pub name: String,
    pub field: FieldId,
    pub amount: Amount,
    #[serde(default)]
    pub min_amount: Option<f64>,
    #[serde(default)]
    pub max_amount: Option<f64>,
    #[serde(default)]
    pub min_ref: Option<Quantity>,
    #[serde(default)]
    pub max_ref: Option<Quantity>,
    pub start_year: i32,
    #[serde(default)]
    pub end_year: Option<i32>,
    #[serde(default)]
    pub growth: Growth,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ScheduledItem {
    /// Whether the item can only be evaluated against prior-pass results.
    pub fn depends_on_results(&self) -> bool {
        let computed_cap = [self.min_ref, self.max_ref]
            .into_iter()
            .flatten()
            .any(|q| !q.is_live());
        !self.conditions.is_empty()
            || matches!(self.amount, Amount::Percentage { .. })
            || computed_cap
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Liability {
    pub name: String,
    pub balance: f64,
    pub annual_rate: f64,
    pub annual_payment: f64,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithdrawalOrder {
    #[default]
    #[serde(alias = "proRata")]
    ProRata,
    #[serde(alias = "rrspFirst")]
    RrspFirst,
    #[serde(alias = "tfsaFirst")]
    TfsaFirst,
    #[serde(alias = "nonRegisteredFirst")]
    NonRegisteredFirst,
}

impl WithdrawalOrder {
    pub const ALL: [WithdrawalOrder; 4] = [
        WithdrawalOrder::ProRata,
        WithdrawalOrder::RrspFirst,
        WithdrawalOrder::TfsaFirst,
        WithdrawalOrder::NonRegisteredFirst,
    ];
}

/// Recurring drawdown sourced from balances, filling withdrawals left at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WithdrawalPlan {
    pub start_year: i32,
    pub end_year: Option<i32>,
    pub annual_amount: f64,
    pub order: WithdrawalOrder,
    pub inflation_indexed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpeningCarryForward {
    pub rrsp_room: f64,
    pub tfsa_room: f64,
    pub fhsa_room: f64,
    pub capital_loss: f64,
    pub fhsa_lifetime_contributions: f64,
    pub prior_year_earned_income: f64,
    pub prior_year_tfsa_withdrawals: f64,
    /// Adjusted cost base of the non-registered account; `None` means equal to its balance.
    pub non_registered_book_value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Scenario {
    pub assumptions: Assumptions,
    pub opening_balances: Accounts<f64>,
    pub opening_carry_forward: OpeningCarryForward,
    pub years: Vec<YearData>,
    pub scheduled: Vec<ScheduledItem>,
    pub overrides: BTreeMap<i32, AssumptionOverrides>,
    pub liabilities: Vec<Liability>,
    pub withdrawal_plan: Option<WithdrawalPlan>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub year: i32,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub total_income: f64,
    pub deductions: f64,
    pub net_income: f64,
    pub taxable_income: f64,
    pub taxable_capital_gains: f64,
    pub grossed_up_dividends: f64,
    pub federal_tax: f64,
    pub provincial_tax: f64,
    pub federal_dividend_credit: f64,
    pub provincial_dividend_credit: f64,
    pub oas_clawback: f64,
    pub income_tax: f64,
    pub marginal_rate: f64,
    pub average_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollContributions {
    pub cpp: f64,
    pub cpp2: f64,
    pub ei: f64,
    /// Employer half of self-employed CPP, deductible from income.
    pub self_employed_deduction: f64,
}

impl PayrollContributions {
    pub fn total(&self) -> f64 {
        self.cpp + self.cpp2 + self.ei
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountYear {
    pub opening: f64,
    pub contribution: f64,
    pub withdrawal: f64,
    pub blended_rate: f64,
    pub return_amount: f64,
    pub closing: f64,
    pub overridden: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub rrsp: f64,
    pub tfsa: f64,
    pub fhsa: f64,
    pub fhsa_lifetime_contributions: f64,
    pub capital_loss_carry_forward: f64,
    pub capital_loss_applied: f64,
    pub non_registered_book_value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeWaterfall {
    /// Income before tax, including taxable RRSP withdrawals; excludes realized
    /// gains and tax-free withdrawals.
    pub gross_income: f64,
    pub income_tax: f64,
    pub payroll: f64,
    pub total_tax: f64,
    pub after_tax_income: f64,
    pub contributions: f64,
    pub withdrawals: f64,
    pub expenses: f64,
    pub debt_payments: f64,
    pub net_cash_flow: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetirementIncome {
    pub cpp: f64,
    pub oas: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiabilitySummary {
    pub interest: f64,
    pub payments: f64,
    pub closing_balance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedYear {
    pub year: i32,
    pub age: i32,
    pub inflation_factor: f64,
    pub inputs: YearData,
    pub tax: TaxBreakdown,
    pub payroll: PayrollContributions,
    pub accounts: Accounts<AccountYear>,
    pub room: RoomSnapshot,
    pub waterfall: IncomeWaterfall,
    pub retirement_income: RetirementIncome,
    pub liabilities: LiabilitySummary,
    pub net_worth: f64,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub cumulative_cash_flow: Vec<f64>,
    pub cumulative_gross_income: Vec<f64>,
    pub cumulative_after_tax_income: Vec<f64>,
    pub cumulative_tax: Vec<f64>,
    pub lifetime_gross_income: f64,
    pub lifetime_tax: f64,
    pub lifetime_after_tax_income: f64,
    pub lifetime_average_tax_rate: f64,
    pub average_after_tax_income: f64,
    pub final_net_worth: f64,
    pub peak_net_worth: f64,
    pub peak_net_worth_year: Option<i32>,
    pub warning_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedScenario {
    pub years: Vec<ComputedYear>,
    pub analytics: Analytics,
    pub passes: u8,
}
