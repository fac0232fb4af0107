use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::error::Result;
use crate::fixed_point;
use crate::simulation::{run_simulation, SimulationConfig};

/// Result of evaluating one gain combination across seeds.
#[derive(Debug, Clone)]
pub struct SweepResult {
    pub kp: f64,
    pub ki: f64,
    /// Mean absolute relative interval error; lower is better.
    pub score: f64,
    pub mean_output: f64,
    pub total_rewards: f64,
    pub runs: usize,
}

/// Grid search over controller gains.
pub struct SweepEngine {
    pub base: SimulationConfig,
    pub seeds: Vec<u64>,
    pub progress: bool,
}

impl SweepEngine {
    pub fn new(base: SimulationConfig, seeds: Vec<u64>) -> Self {
        SweepEngine {
            base,
            seeds,
            progress: false,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Every `(kp, ki)` pair.
    fn cartesian_product(kps: &[f64], kis: &[f64]) -> Vec<(f64, f64)> {
        kps.iter()
            .flat_map(|&kp| kis.iter().map(move |&ki| (kp, ki)))
            .collect()
    }

    fn evaluate(&self, kp: f64, ki: f64) -> Result<SweepResult> {
        let mut score = 0.0;
        let mut output = 0.0;
        let mut rewards = 0.0;

        for &seed in &self.seeds {
            let mut config = self.base.clone();
            config.seed = seed;
            config.engine.controller.kp = fixed_point::signed_wad_from_f64(kp);
            config.engine.controller.ki = fixed_point::signed_wad_from_f64(ki);

            let sim = run_simulation(config)?;
            score += sim.mean_abs_interval_error();
            output += fixed_point::signed_wad_to_f64(sim.engine.controller().last_output());
            rewards += fixed_point::wad_to_f64(sim.engine.total_rewards());
        }

        let n = self.seeds.len().max(1) as f64;
        Ok(SweepResult {
            kp,
            ki,
            score: score / n,
            mean_output: output / n,
            total_rewards: rewards / n,
            runs: self.seeds.len(),
        })
    }

    /// Evaluate every gain pair in parallel, best score first.
    pub fn run_grid(&self, kps: &[f64], kis: &[f64]) -> Result<Vec<SweepResult>> {
        let combos = Self::cartesian_product(kps, kis);

        let bar = if self.progress {
            let bar = ProgressBar::new(combos.len() as u64);
            if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
                bar.set_style(style);
            }
            Some(bar)
        } else {
            None
        };

        let mut results = combos
            .par_iter()
            .map(|&(kp, ki)| {
                let r = self.evaluate(kp, ki);
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
                r
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(bar) = bar {
            bar.finish_with_message("done");
        }

        Self::sort_results(&mut results);
        Ok(results)
    }

    fn sort_results(results: &mut [SweepResult]) {
        results.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Gains around the deployed controller.
    pub fn default_grid() -> (Vec<f64>, Vec<f64>) {
        (vec![-4.0, -2.0, -1.0, -0.5], vec![-0.2, -0.1, -0.05, 0.0])
    }
}
