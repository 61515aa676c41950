//! aegis-runner: headless analytics runner for Aegis.
//!
//! Usage:
//!   aegis-runner --records institutions.json --budget 5000000
//!   aegis-runner --records institutions.json --strategy performance --budget 10000000
//!   aegis-runner --records institutions.json --compare --budget 10000000
//!   aegis-runner --records institutions.json --ipc-mode

use aegis_core::{
    config::AegisConfig,
    engine::{AnalyticsEngine, EnrollmentResponse, InstitutionFilter, OptimizeRequest},
    metrics::EquityFilter,
    record::InstitutionRecord,
    types::InstitutionId,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Ingest {
        records: Vec<InstitutionRecord>,
    },
    Stats,
    Institutions {
        #[serde(default)]
        filter: InstitutionFilter,
    },
    Institution {
        id: InstitutionId,
    },
    RiskDistribution,
    Trends,
    PurchasingPower,
    CompletionGap {
        #[serde(default = "default_gap_limit")]
        limit: usize,
    },
    EquityPerformance {
        #[serde(default)]
        filter: EquityFilter,
    },
    GeoPoints,
    Viability {
        #[serde(default)]
        max_score: Option<f64>,
    },
    Elasticity {
        grant_change: f64,
    },
    ElasticityScenarios,
    ModelInfo,
    Optimize {
        request: OptimizeRequest,
    },
    OptimizeEnrollment {
        budget: f64,
        #[serde(default = "default_strategy")]
        strategy: String,
        #[serde(default)]
        compare: bool,
    },
    Quit,
}

fn default_gap_limit() -> usize {
    20
}

fn default_strategy() -> String {
    "base".to_string()
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let budget = parse_arg(&args, "--budget", 5_000_000.0f64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let compare = args.iter().any(|a| a == "--compare");
    let records_path = arg_value(&args, "--records");
    let data_dir = arg_value(&args, "--data-dir").unwrap_or("./data");
    let strategy = arg_value(&args, "--strategy");

    if !ipc_mode {
        println!("Aegis — aegis-runner");
        println!("  records:   {}", records_path.unwrap_or("(none)"));
        println!("  data_dir:  {data_dir}");
        println!("  budget:    {budget:.0}");
        println!();
    }

    let config = AegisConfig::load(data_dir)?;
    let engine = AnalyticsEngine::new(config);

    if let Some(path) = records_path {
        let records = read_records(path)?;
        engine.ingest(&records)?;
    }

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        print_summary(&engine, budget, strategy, compare)?;
    }

    Ok(())
}

fn read_records(path: &str) -> Result<Vec<InstitutionRecord>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("Cannot parse {path}"))
}

fn run_ipc_loop(engine: &AnalyticsEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        // Request failures go back to the caller; the loop keeps serving.
        let reply = match handle_command(engine, cmd) {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &AnalyticsEngine, cmd: IpcCommand) -> Result<serde_json::Value> {
    match cmd {
        IpcCommand::Ingest { records } => to_json(engine.ingest(&records)?),
        IpcCommand::Stats => to_json(engine.stats()?),
        IpcCommand::Institutions { filter } => to_json(engine.institutions(&filter)?),
        IpcCommand::Institution { id } => to_json(engine.institution_detail(id)?),
        IpcCommand::RiskDistribution => to_json(engine.risk_distribution()?),
        IpcCommand::Trends => to_json(engine.trends()?),
        IpcCommand::PurchasingPower => to_json(engine.purchasing_power()),
        IpcCommand::CompletionGap { limit } => to_json(engine.completion_gap(limit)?),
        IpcCommand::EquityPerformance { filter } => to_json(engine.equity_performance(&filter)?),
        IpcCommand::GeoPoints => to_json(engine.geo_points()?),
        IpcCommand::Viability { max_score } => to_json(engine.viability(max_score)?),
        IpcCommand::Elasticity { grant_change } => to_json(engine.elasticity(grant_change)?),
        IpcCommand::ElasticityScenarios => to_json(engine.elasticity_scenarios()?),
        IpcCommand::ModelInfo => to_json(engine.model_info()?),
        IpcCommand::Optimize { request } => to_json(engine.optimize(&request)?),
        IpcCommand::OptimizeEnrollment {
            budget,
            strategy,
            compare,
        } => to_json(engine.optimize_enrollment(budget, &strategy, compare)?),
        IpcCommand::Quit => Ok(serde_json::Value::Null),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn print_summary(engine: &AnalyticsEngine, budget: f64, strategy: Option<&str>, compare: bool) -> Result<()> {
    let snapshot = engine.snapshot()?;
    let stats = engine.stats()?;
    let dist = engine.risk_distribution()?;

    println!("=== BATCH SUMMARY ===");
    println!("  batch_id:       {}", snapshot.batch_id);
    println!("  institutions:   {}", stats.total_schools);
    println!("  skipped rows:   {}", snapshot.report.skipped_rows);
    println!("  imputed cells:  {}", snapshot.report.imputed_cells());
    println!("  degraded cells: {}", snapshot.report.degraded_cells());
    println!("  unscored:       {}", snapshot.unscored.len());
    if let Some(r) = stats.avg_retention {
        println!("  avg retention:  {:.1}%", r * 100.0);
    }
    if let Some(i) = stats.avg_risk_index {
        println!("  avg risk index: {i:.1}");
    }
    println!("  high risk:      {}", stats.high_risk_count);
    for (bin, count) in dist.bins.iter().zip(&dist.counts) {
        println!("    {bin:<10} {count}");
    }

    println!();
    println!("=== RETENTION ALLOCATION (${budget:.0}) ===");
    match engine.optimize(&OptimizeRequest {
        budget,
        ..OptimizeRequest::default()
    }) {
        Ok(result) => {
            println!("  status:         {:?}", result.status);
            println!("  allocated:      ${:.0}", result.total_allocated);
            println!("  equity floor:   ${:.0}", result.equity_floor);
            println!("  funded:         {}", result.institutions_funded());
            println!("  students kept:  {:.1}", result.outcome_gain());
            for a in result.allocations.iter().take(10) {
                println!(
                    "  {:<40} ${:>10.0} | {:.3} -> {:.3}",
                    a.name, a.amount, a.baseline_metric, a.projected_metric
                );
            }
        }
        Err(e) => println!("  (optimizer failed: {e})"),
    }

    println!();
    println!("=== ENROLLMENT STRATEGIES ===");
    let response = engine.optimize_enrollment(budget, strategy.unwrap_or("base"), compare || strategy.is_none())?;
    let summaries = match response {
        EnrollmentResponse::Single(run) => vec![run.summary],
        EnrollmentResponse::Comparison(summaries) => summaries,
    };
    for s in summaries {
        println!(
            "  {:<18} | Grads: {:.0} (+{:.1}) | Funded: {} | $/add'l grad: {}",
            s.strategy.name(),
            s.graduates,
            s.additional_graduates,
            s.schools_funded,
            s.cost_per_additional_graduate
                .map_or_else(|| "n/a".to_string(), |c| format!("{c:.0}")),
        );
    }
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
