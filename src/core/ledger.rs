use super::types::{
    AccountKind, AccountYear, Accounts, Allocation, AssetReturns, Liability, LiabilitySummary,
    ResolvedAssumptions, RoomSnapshot, Scenario, YearData,
};

/// Balances and limits threaded from one projected year into the next.
#[derive(Debug, Clone, PartialEq)]
pub struct CarryForwardState {
    pub rrsp_room: f64,
    pub tfsa_room: f64,
    pub fhsa_room: f64,
    pub capital_loss: f64,
    pub fhsa_lifetime_contributions: f64,
    pub prior_year_earned_income: f64,
    pub prior_year_tfsa_withdrawals: f64,
    pub balances: Accounts<f64>,
    pub non_registered_book_value: f64,
    pub liability_balances: Vec<f64>,
}

impl CarryForwardState {
    pub fn opening(scenario: &Scenario) -> Self {
        let opening = &scenario.opening_carry_forward;
        let balances = scenario.opening_balances.map(|_, v| v.max(0.0));
        Self {
            rrsp_room: opening.rrsp_room,
            tfsa_room: opening.tfsa_room,
            fhsa_room: opening.fhsa_room,
            capital_loss: opening.capital_loss.max(0.0),
            fhsa_lifetime_contributions: opening.fhsa_lifetime_contributions.max(0.0),
            prior_year_earned_income: opening.prior_year_earned_income,
            prior_year_tfsa_withdrawals: opening.prior_year_tfsa_withdrawals.max(0.0),
            non_registered_book_value: opening
                .non_registered_book_value
                .unwrap_or(balances.non_registered)
                .max(0.0),
            balances,
            liability_balances: scenario
                .liabilities
                .iter()
                .map(|l| l.balance.max(0.0))
                .collect(),
        }
    }
}

/// Contribution room available during a year, before that year's contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvailableRoom {
    pub rrsp: f64,
    pub tfsa: f64,
    pub fhsa: f64,
    pub fhsa_lifetime_remaining: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CapitalLossUse {
    pub available: f64,
    pub applied: f64,
    pub remaining: f64,
}

#[derive(Debug, Clone)]
pub struct LedgerYear {
    pub accounts: Accounts<AccountYear>,
    pub available: AvailableRoom,
    pub room: RoomSnapshot,
    pub liabilities: LiabilitySummary,
    pub next: CarryForwardState,
}

pub fn blended_rate(allocation: &Allocation, returns: &AssetReturns) -> f64 {
    allocation.equity * returns.equity
        + allocation.fixed_income * returns.fixed_income
        + allocation.cash * returns.cash
}

/// Applies the year's flows, then growth on the post-flow base. An EOY
/// override replaces the closing balance and the return is back-solved.
pub fn project_account(
    opening: f64,
    contribution: f64,
    withdrawal: f64,
    rate: f64,
    eoy_override: Option<f64>,
) -> AccountYear {
    let base = (opening + contribution - withdrawal).max(0.0);
    match eoy_override.filter(|v| v.is_finite()) {
        Some(closing) => AccountYear {
            opening,
            contribution,
            withdrawal,
            blended_rate: rate,
            return_amount: closing - base,
            closing,
            overridden: true,
        },
        None => {
            let return_amount = base * rate;
            AccountYear {
                opening,
                contribution,
                withdrawal,
                blended_rate: rate,
                return_amount,
                closing: base + return_amount,
                overridden: false,
            }
        }
    }
}

pub fn available_room(carry: &CarryForwardState, resolved: &ResolvedAssumptions) -> AvailableRoom {
    let limits = &resolved.tax.limits;
    let rrsp_grant = (limits.rrsp_rate * carry.prior_year_earned_income.max(0.0))
        .min(limits.rrsp_dollar_limit)
        .max(0.0);
    let tfsa_grant = limits.tfsa_annual_limit.max(0.0) + carry.prior_year_tfsa_withdrawals;
    let fhsa_lifetime_remaining =
        (limits.fhsa_lifetime_limit - carry.fhsa_lifetime_contributions).max(0.0);
    let fhsa = (carry.fhsa_room + limits.fhsa_annual_limit.max(0.0)).min(fhsa_lifetime_remaining);

    AvailableRoom {
        rrsp: carry.rrsp_room + rrsp_grant,
        tfsa: carry.tfsa_room + tfsa_grant,
        fhsa,
        fhsa_lifetime_remaining,
    }
}

/// Consumes carried-forward capital losses up to what is available; a net
/// loss realized this year joins the carry-forward afterwards.
pub fn apply_capital_losses(available: f64, requested: f64, realized_gains: f64) -> CapitalLossUse {
    let available = available.max(0.0);
    let requested = requested.max(0.0);
    let applied = requested.min(available);
    let new_losses = (-realized_gains).max(0.0);
    CapitalLossUse {
        available,
        applied,
        remaining: available - applied + new_losses,
    }
}

pub fn amortize(balance: f64, liability: &Liability) -> (f64, f64, f64) {
    let balance = balance.max(0.0);
    let interest = balance * liability.annual_rate;
    let payment = liability.annual_payment.max(0.0).min(balance + interest).max(0.0);
    (interest, payment, (balance + interest - payment).max(0.0))
}

/// Advances every account, room balance and liability by one year.
pub fn advance(
    carry: &CarryForwardState,
    inputs: &YearData,
    resolved: &ResolvedAssumptions,
    allocations: &Accounts<Allocation>,
    liabilities: &[Liability],
    losses: CapitalLossUse,
) -> LedgerYear {
    let accounts = Accounts::<AccountYear>::default().map(|kind, _| {
        project_account(
            *carry.balances.get(kind),
            inputs.contributions.get(kind).max(0.0),
            inputs.withdrawals.get(kind).max(0.0),
            blended_rate(allocations.get(kind), &resolved.returns),
            *inputs.eoy_overrides.get(kind),
        )
    });

    let available = available_room(carry, resolved);
    let contributed = |kind: AccountKind| inputs.contributions.get(kind).max(0.0);
    let rrsp_room = available.rrsp - contributed(AccountKind::Rrsp);
    let tfsa_room = available.tfsa - contributed(AccountKind::Tfsa);
    let fhsa_room = available.fhsa - contributed(AccountKind::Fhsa);
    let fhsa_lifetime_contributions =
        carry.fhsa_lifetime_contributions + contributed(AccountKind::Fhsa);

    let non_registered = accounts.non_registered;
    let pre_withdrawal = non_registered.opening + non_registered.contribution;
    let book_before = carry.non_registered_book_value + non_registered.contribution;
    let non_registered_book_value = if pre_withdrawal > 0.0 {
        let sold = (non_registered.withdrawal / pre_withdrawal).min(1.0);
        book_before * (1.0 - sold)
    } else {
        book_before
    };

    let mut summary = LiabilitySummary::default();
    let liability_balances = liabilities
        .iter()
        .enumerate()
        .map(|(idx, liability)| {
            let balance = carry.liability_balances.get(idx).copied().unwrap_or(0.0);
            let (interest, payment, closing) = amortize(balance, liability);
            summary.interest += interest;
            summary.payments += payment;
            summary.closing_balance += closing;
            closing
        })
        .collect();

    let room = RoomSnapshot {
        rrsp: rrsp_room,
        tfsa: tfsa_room,
        fhsa: fhsa_room,
        fhsa_lifetime_contributions,
        capital_loss_carry_forward: losses.remaining,
        capital_loss_applied: losses.applied,
        non_registered_book_value,
    };

    let next = CarryForwardState {
        rrsp_room,
        tfsa_room,
        fhsa_room,
        capital_loss: losses.remaining,
        fhsa_lifetime_contributions,
        prior_year_earned_income: inputs.employment_income + inputs.self_employment_income,
        prior_year_tfsa_withdrawals: inputs.withdrawals.tfsa.max(0.0),
        balances: accounts.map(|_, a| a.closing),
        non_registered_book_value,
        liability_balances,
    };

    LedgerYear {
        accounts,
        available,
        room,
        liabilities: summary,
        next,
    }
}
