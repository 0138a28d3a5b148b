use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::{ScenarioPayload, run_http_server, scenario_from_payload, what_if_response};
use crate::core::{BenefitKind, Scenario, WhatIfAdjustments, compute, compute_deferral};

#[derive(Debug, Parser)]
#[command(name = "yearwise", about = "Multi-year Canadian personal tax and cash-flow projection")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Project a scenario file and print the result as JSON
    Compute {
        #[arg(long, help = "Scenario JSON file")]
        scenario: PathBuf,
        #[arg(long, help = "What-if adjustments JSON file applied before computing")]
        what_if: Option<PathBuf>,
        #[arg(long)]
        pretty: bool,
    },
    /// Print the benefit start-age comparison table for a scenario
    Deferral {
        #[arg(long, help = "Scenario JSON file")]
        scenario: PathBuf,
        #[arg(long, value_enum, default_value_t = CliBenefit::Cpp)]
        benefit: CliBenefit,
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliBenefit {
    Cpp,
    Oas,
}

impl From<CliBenefit> for BenefitKind {
    fn from(value: CliBenefit) -> Self {
        match value {
            CliBenefit::Cpp => BenefitKind::Cpp,
            CliBenefit::Oas => BenefitKind::Oas,
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Serve { port } => run_http_server(port)
            .await
            .map_err(|e| format!("Server error: {e}")),
        Command::Compute {
            scenario,
            what_if,
            pretty,
        } => {
            let scenario = load_scenario(&scenario)?;
            let output = match what_if {
                Some(path) => {
                    let adjustments = load_adjustments(&path)?;
                    let response =
                        what_if_response(&scenario, &adjustments).map_err(|e| e.to_string())?;
                    to_json(&response, pretty)?
                }
                None => {
                    let result = compute(&scenario).map_err(|e| e.to_string())?;
                    to_json(&result, pretty)?
                }
            };
            println!("{output}");
            Ok(())
        }
        Command::Deferral {
            scenario,
            benefit,
            pretty,
        } => {
            let scenario = load_scenario(&scenario)?;
            let table = compute_deferral(&scenario, benefit.into()).map_err(|e| e.to_string())?;
            println!("{}", to_json(&table, pretty)?);
            Ok(())
        }
    }
}

fn read_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))
}

fn load_scenario(path: &Path) -> Result<Scenario, String> {
    let payload = serde_json::from_str::<ScenarioPayload>(&read_file(path)?)
        .map_err(|e| format!("Invalid scenario JSON in {}: {e}", path.display()))?;
    scenario_from_payload(payload)
}

fn load_adjustments(path: &Path) -> Result<WhatIfAdjustments, String> {
    serde_json::from_str(&read_file(path)?)
        .map_err(|e| format!("Invalid what-if JSON in {}: {e}", path.display()))
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    rendered.map_err(|e| format!("cannot serialize output: {e}"))
}
