use axum::{
    Router,
    extract::Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    Accounts, Allocation, AssetReturns, AssumptionOverrides, Assumptions, ComputedScenario,
    Liability, OpeningCarryForward, Province, RetirementBenefits, Scenario, ScheduledItem,
    SensitivityParameter, TaxParameters, VariantSummary, WhatIfAdjustments, WithdrawalPlan,
    YearData, apply_what_if, compute, compute_cpp_deferral, compute_oas_deferral,
    compute_sensitivity, compute_withdrawal_strategies, resolve_scenario_assumptions,
    tax_parameters,
};

pub mod cli;

const ALLOCATION_TOLERANCE: f64 = 1e-6;

/// Assumptions as sent by clients; absent fields keep the 2024 defaults for
/// the chosen province.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssumptionsPayload {
    province: Option<Province>,
    birth_year: Option<i32>,
    base_year: Option<i32>,
    inflation_rate: Option<f64>,
    auto_index: Option<bool>,
    tax: Option<TaxParameters>,
    benefits: Option<RetirementBenefits>,
    returns: Option<AssetReturns>,
    /// Per-account; an account left out keeps the default mix.
    allocations: Accounts<Option<Allocation>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioPayload {
    assumptions: AssumptionsPayload,
    opening_balances: Accounts<f64>,
    opening_carry_forward: OpeningCarryForward,
    years: Vec<YearData>,
    scheduled: Vec<ScheduledItem>,
    overrides: BTreeMap<i32, AssumptionOverrides>,
    liabilities: Vec<Liability>,
    withdrawal_plan: Option<WithdrawalPlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhatIfPayload {
    scenario: ScenarioPayload,
    #[serde(default)]
    adjustments: WhatIfAdjustments,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SensitivityPayload {
    scenario: ScenarioPayload,
    parameter: SensitivityParameter,
    deltas: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalStrategiesPayload {
    scenario: ScenarioPayload,
    plan: WithdrawalPlan,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfResponse {
    pub adjusted: bool,
    pub baseline: VariantSummary,
    pub variant: ComputedScenario,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn scenario_from_payload(payload: ScenarioPayload) -> Result<Scenario, String> {
    let mut assumptions = Assumptions::default();
    let a = payload.assumptions;

    if let Some(v) = a.province {
        assumptions.province = v;
        assumptions.tax = tax_parameters(v);
    }
    if let Some(v) = a.birth_year {
        assumptions.birth_year = v;
    }
    if a.base_year.is_some() {
        assumptions.base_year = a.base_year;
    }
    if let Some(v) = a.inflation_rate {
        assumptions.inflation_rate = v;
    }
    if let Some(v) = a.auto_index {
        assumptions.auto_index = v;
    }
    if let Some(v) = a.tax {
        assumptions.tax = v;
    }
    if let Some(v) = a.benefits {
        assumptions.benefits = v;
    }
    if let Some(v) = a.returns {
        assumptions.returns = v;
    }
    for (kind, allocation) in a.allocations.iter() {
        if let Some(v) = allocation {
            *assumptions.allocations.get_mut(kind) = *v;
        }
    }

    if assumptions.inflation_rate.is_nan() || assumptions.inflation_rate <= -1.0 {
        return Err("assumptions.inflationRate must be greater than -100%".to_string());
    }
    for (kind, allocation) in assumptions.allocations.iter() {
        let weights = [allocation.equity, allocation.fixed_income, allocation.cash];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(format!(
                "{} allocation weights must each be between 0 and 1",
                kind.label()
            ));
        }
        if (weights.iter().sum::<f64>() - 1.0).abs() > ALLOCATION_TOLERANCE {
            return Err(format!("{} allocation must sum to 100%", kind.label()));
        }
    }
    if payload.years.is_empty() {
        return Err("years must contain at least one entry".to_string());
    }

    Ok(Scenario {
        assumptions,
        opening_balances: payload.opening_balances,
        opening_carry_forward: payload.opening_carry_forward,
        years: payload.years,
        scheduled: payload.scheduled,
        overrides: payload.overrides,
        liabilities: payload.liabilities,
        withdrawal_plan: payload.withdrawal_plan,
    })
}

pub fn what_if_response(
    scenario: &Scenario,
    adjustments: &WhatIfAdjustments,
) -> crate::core::Result<WhatIfResponse> {
    let baseline = compute(scenario)?;
    let variant = apply_what_if(scenario, adjustments);
    let adjusted = !adjustments.is_neutral();
    let variant = if adjusted {
        compute(&variant)?
    } else {
        baseline.clone()
    };
    Ok(WhatIfResponse {
        adjusted,
        baseline: VariantSummary::from(&baseline),
        variant,
    })
}

pub fn router() -> Router {
    Router::new()
        .route("/api/compute", post(compute_handler))
        .route("/api/what-if", post(what_if_handler))
        .route("/api/resolve-assumptions", post(resolve_assumptions_handler))
        .route("/api/sensitivity", post(sensitivity_handler))
        .route("/api/withdrawal-strategies", post(withdrawal_strategies_handler))
        .route("/api/deferral/cpp", post(cpp_deferral_handler))
        .route("/api/deferral/oas", post(oas_deferral_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "projection API listening");
    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn compute_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    with_scenario(payload, compute)
}

async fn resolve_assumptions_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    with_scenario(payload, resolve_scenario_assumptions)
}

async fn cpp_deferral_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    with_scenario(payload, compute_cpp_deferral)
}

async fn oas_deferral_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    with_scenario(payload, compute_oas_deferral)
}

async fn what_if_handler(Json(payload): Json<WhatIfPayload>) -> Response {
    let adjustments = payload.adjustments;
    with_scenario(payload.scenario, |scenario| {
        what_if_response(scenario, &adjustments)
    })
}

async fn sensitivity_handler(Json(payload): Json<SensitivityPayload>) -> Response {
    let (parameter, deltas) = (payload.parameter, payload.deltas);
    if deltas.iter().any(|d| !d.is_finite()) {
        return error_response(StatusCode::BAD_REQUEST, "deltas must be finite numbers");
    }
    with_scenario(payload.scenario, |scenario| {
        compute_sensitivity(scenario, parameter, &deltas)
    })
}

async fn withdrawal_strategies_handler(
    Json(payload): Json<WithdrawalStrategiesPayload>,
) -> Response {
    let plan = payload.plan;
    with_scenario(payload.scenario, |scenario| {
        compute_withdrawal_strategies(scenario, &plan)
    })
}

/// Builds the scenario and runs `op`, mapping both failure kinds to 400.
fn with_scenario<T: Serialize>(
    payload: ScenarioPayload,
    op: impl FnOnce(&Scenario) -> crate::core::Result<T>,
) -> Response {
    let scenario = match scenario_from_payload(payload) {
        Ok(scenario) => scenario,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match op(&scenario) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn scenario_from_json(json: &str) -> Result<Scenario, String> {
    let payload = serde_json::from_str::<ScenarioPayload>(json)
        .map_err(|e| format!("Invalid scenario JSON: {e}"))?;
    scenario_from_payload(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Amount, FieldId, Quantity};

    #[test]
    fn payload_merges_over_province_defaults() {
        let scenario = scenario_from_json(
            r#"{
                "assumptions": { "province": "BC", "birthYear": 1970 },
                "years": [{ "year": 2024, "employmentIncome": 90000 }]
            }"#,
        )
        .unwrap();
        assert_eq!(scenario.assumptions.province, Province::BritishColumbia);
        assert_eq!(scenario.assumptions.tax, tax_parameters(Province::BritishColumbia));
        assert_eq!(scenario.assumptions.birth_year, 1970);
        assert_eq!(scenario.assumptions.inflation_rate, 0.02);
        assert_eq!(scenario.years[0].employment_income, 90_000.0);
    }

    #[test]
    fn payload_parses_scheduled_rules_in_wire_format() {
        let scenario = scenario_from_json(
            r#"{
                "years": [{ "year": 2024 }],
                "scheduled": [{
                    "name": "save a tenth",
                    "field": "rrspContribution",
                    "amount": { "kind": "percentage", "fraction": 0.1, "of": { "field": "employmentIncome" } },
                    "maxRef": "rrspRoom",
                    "startYear": 2024,
                    "growth": { "kind": "inflation" },
                    "conditions": [{ "quantity": "netWorth", "comparator": ">=", "value": 0 }]
                }]
            }"#,
        )
        .unwrap();
        let item = &scenario.scheduled[0];
        assert_eq!(item.field, FieldId::RrspContribution);
        assert_eq!(
            item.amount,
            Amount::Percentage {
                fraction: 0.1,
                of: Quantity::Field(FieldId::EmploymentIncome)
            }
        );
        assert_eq!(item.max_ref, Some(Quantity::RrspRoom));
        assert!(item.depends_on_results());
    }

    #[test]
    fn payload_rejects_bad_allocations_and_empty_years() {
        let err = scenario_from_json(
            r#"{
                "assumptions": { "allocations": { "tfsa": { "equity": 0.9, "fixedIncome": 0.3, "cash": 0 } } },
                "years": [{ "year": 2024 }]
            }"#,
        )
        .unwrap_err();
        assert!(err.contains("TFSA"), "{err}");

        let err = scenario_from_json(r#"{ "years": [] }"#).unwrap_err();
        assert!(err.contains("years"));

        let err = scenario_from_json(r#"{ "years": "nope" }"#).unwrap_err();
        assert!(err.starts_with("Invalid scenario JSON"));
    }

    #[test]
    fn what_if_response_reuses_baseline_for_neutral_adjustments() {
        let scenario = scenario_from_json(
            r#"{ "years": [{ "year": 2024, "employmentIncome": 60000 }, { "year": 2025, "employmentIncome": 60000 }] }"#,
        )
        .unwrap();
        let neutral = what_if_response(&scenario, &WhatIfAdjustments::default()).unwrap();
        assert!(!neutral.adjusted);
        assert_eq!(
            VariantSummary::from(&neutral.variant),
            neutral.baseline
        );

        let raise = WhatIfAdjustments {
            employment_scale: 1.5,
            ..WhatIfAdjustments::default()
        };
        let raised = what_if_response(&scenario, &raise).unwrap();
        assert!(raised.adjusted);
        assert!(raised.variant.analytics.lifetime_gross_income > raised.baseline.lifetime_gross_income);
    }

    #[test]
    fn computed_output_serializes_with_camel_case_keys() {
        let scenario = scenario_from_json(r#"{ "years": [{ "year": 2024, "employmentIncome": 50000 }] }"#)
            .unwrap();
        let result = compute(&scenario).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["passes"], 1);
        assert!(json["years"][0]["tax"]["taxableIncome"].is_number());
        assert!(json["years"][0]["accounts"]["nonRegistered"]["closing"].is_number());
        assert!(json["analytics"]["cumulativeCashFlow"].is_array());
    }
}
