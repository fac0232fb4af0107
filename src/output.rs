use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::engine::{ChunkOutcome, OracleUpdated};
use crate::fixed_point;
use crate::simulation::{ControlMetrics, Simulation, UpdateMetrics};
use crate::sweep::SweepResult;

/// Summary statistics for a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub started_at: String,
    pub finished_at: String,
    pub submissions: usize,
    pub accepted: usize,
    pub stale: usize,
    pub updaters: usize,
    pub target_interval_secs: f64,
    pub mean_interval_secs: f64,
    pub mean_abs_interval_error: f64,
    pub final_output: f64,
    pub total_rewards: f64,
    pub mean_reward: f64,
}

/// Tally of a replayed batch file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplaySummary {
    pub batches: usize,
    pub rewarded: usize,
    pub stale: usize,
    pub rejected: usize,
    pub total_rewards: String,
}

impl ReplaySummary {
    pub fn record(&mut self, outcomes: &[ChunkOutcome]) {
        self.batches += 1;
        for o in outcomes {
            match o {
                ChunkOutcome::Rewarded { .. } => self.rewarded += 1,
                ChunkOutcome::Stale => self.stale += 1,
                ChunkOutcome::Rejected(_) => self.rejected += 1,
            }
        }
    }
}

/// RFC 3339 rendering of a unix timestamp in seconds.
pub fn format_time(secs: u64) -> String {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

pub fn compute_summary(sim: &Simulation) -> SimulationSummary {
    let accepted: Vec<&UpdateMetrics> = sim.updates.iter().filter(|u| u.accepted).collect();
    let n = accepted.len().max(1) as f64;
    let total_rewards = fixed_point::wad_to_f64(sim.engine.total_rewards());

    SimulationSummary {
        started_at: sim.updates.first().map(|u| format_time(u.time)).unwrap_or_default(),
        finished_at: sim.updates.last().map(|u| format_time(u.time)).unwrap_or_default(),
        submissions: sim.updates.len(),
        accepted: accepted.len(),
        stale: sim.updates.len() - accepted.len(),
        updaters: sim.engine.ledger().updater_count(),
        target_interval_secs: fixed_point::wad_to_f64(sim.engine.target_time_since()),
        mean_interval_secs: accepted.iter().map(|u| u.interval_secs).sum::<f64>() / n,
        mean_abs_interval_error: sim.mean_abs_interval_error(),
        final_output: sim.control.last().map(|c| c.output).unwrap_or(0.0),
        total_rewards,
        mean_reward: total_rewards / n,
    }
}

fn create_parent(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Save per-submission metrics to CSV.
pub fn save_updates_csv(
    updates: &[UpdateMetrics],
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    create_parent(path)?;
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "time",
        "chain_id",
        "updater",
        "gas_price_gwei",
        "interval_secs",
        "time_reward",
        "deviation_reward",
        "accepted",
    ])?;

    for u in updates {
        wtr.write_record(&[
            format_time(u.time),
            u.chain_id.to_string(),
            u.updater.to_string(),
            format!("{:.6}", u.gas_price_gwei),
            format!("{:.0}", u.interval_secs),
            format!("{:.6}", u.time_reward),
            format!("{:.6}", u.deviation_reward),
            u.accepted.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save controller steps to CSV.
pub fn save_control_csv(
    control: &[ControlMetrics],
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    create_parent(path)?;
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["time", "observed_interval_secs", "error", "output", "p_term", "i_term"])?;

    for c in control {
        wtr.write_record(&[
            format_time(c.time),
            format!("{:.2}", c.observed_interval_secs),
            format!("{:.6}", c.error),
            format!("{:.6}", c.output),
            format!("{:.6}", c.p_term),
            format!("{:.6}", c.i_term),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save engine events to CSV, one serialized row each.
pub fn save_events_csv(
    events: &[OracleUpdated],
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    create_parent(path)?;
    let mut wtr = csv::Writer::from_path(path)?;
    for e in events {
        wtr.serialize(e)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save sweep results to CSV.
pub fn save_sweep_results(
    results: &[SweepResult],
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    create_parent(path)?;
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["kp", "ki", "score", "mean_output", "total_rewards", "runs"])?;

    for r in results {
        wtr.write_record(&[
            format!("{:.6}", r.kp),
            format!("{:.6}", r.ki),
            format!("{:.6}", r.score),
            format!("{:.6}", r.mean_output),
            format!("{:.6}", r.total_rewards),
            r.runs.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save any serializable summary as pretty JSON.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    create_parent(path)?;
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub fn save_config_toml(
    config: &EngineConfig,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    create_parent(path)?;
    std::fs::write(path, config.to_toml_string()?)?;
    Ok(())
}

/// Save every output of a simulation run to a directory.
pub fn save_all(sim: &Simulation, output_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(output_dir)?;

    save_updates_csv(&sim.updates, &output_dir.join("updates.csv"))?;
    save_control_csv(&sim.control, &output_dir.join("control.csv"))?;
    save_events_csv(sim.engine.events(), &output_dir.join("events.csv"))?;
    save_json(&compute_summary(sim), &output_dir.join("summary.json"))?;
    save_config_toml(&sim.config.engine, &output_dir.join("config.toml"))?;

    Ok(())
}
