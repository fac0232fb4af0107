use clap::{Parser, Subcommand};
use ethnum::U256;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use reward_controller::codec::{self, PayloadBuilder};
use reward_controller::engine::RewardController;
use reward_controller::output::{self, ReplaySummary};
use reward_controller::simulation::{run_simulation, SimulationConfig};
use reward_controller::sweep::SweepEngine;
use reward_controller::{Address, EngineConfig};

#[derive(Parser)]
#[command(
    name = "reward-controller",
    about = "Gas-price oracle incentive engine with an anti-windup PI controller"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an oracle payload and print it as hex
    Encode {
        #[arg(long, default_value = "1")]
        version: u8,

        #[arg(long)]
        height: u64,

        #[arg(long)]
        chain_id: u64,

        #[arg(long, default_value = "2")]
        system_id: u8,

        /// Payload timestamp in milliseconds
        #[arg(long)]
        timestamp: u64,

        /// Value slots as TYPE=VALUE (e.g. 107=76683474670)
        #[arg(long = "value", required = true)]
        values: Vec<String>,

        /// Hex signature appended after the value slots
        #[arg(long)]
        signature: Option<String>,
    },

    /// Decode a hex payload
    Decode {
        payload: String,

        /// Also extract the base fee and this type's value
        #[arg(long = "type")]
        typ: Option<u16>,
    },

    /// Apply a file of hex batches (one per line) to a fresh engine
    Replay {
        input: PathBuf,

        /// TOML engine configuration (defaults if omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Chunks per batch line
        #[arg(long, default_value = "1")]
        chunks: usize,

        /// Updater address credited for every batch
        #[arg(long, default_value = "0x0000000000000000000000000000000000000001")]
        sender: String,

        #[arg(long, default_value = "output/replay")]
        output_dir: String,
    },

    /// Run the synthetic oracle network
    Simulate {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Simulated hours
        #[arg(long, default_value = "24")]
        hours: u64,

        #[arg(long, default_value = "5")]
        updaters: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "output/simulate")]
        output_dir: String,
    },

    /// Grid search over controller gains
    Sweep {
        /// Comma-separated kp values (defaults to a grid around the deployed gains)
        #[arg(long)]
        kp: Option<String>,

        /// Comma-separated ki values
        #[arg(long)]
        ki: Option<String>,

        /// Seeds per gain pair
        #[arg(long, default_value = "4")]
        seeds: u64,

        #[arg(long, default_value = "12")]
        hours: u64,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "output/sweep")]
        output_dir: String,

        #[arg(long)]
        progress: bool,
    },

    /// Print the default configuration as TOML
    Config,
}

fn parse_list(s: &str) -> Result<Vec<f64>, Box<dyn Error>> {
    s.split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid value {:?}: {}", v, e).into())
        })
        .collect::<Result<Vec<f64>, Box<dyn Error>>>()
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn Error>> {
    match path {
        Some(p) => Ok(EngineConfig::load(p)?),
        None => Ok(EngineConfig::default()),
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    Ok(hex::decode(s.trim().trim_start_matches("0x"))?)
}

fn encode(
    version: u8,
    height: u64,
    chain_id: u64,
    system_id: u8,
    timestamp: u64,
    values: &[String],
    signature: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let mut builder = PayloadBuilder::new(version, height, chain_id, system_id, timestamp);
    for pair in values {
        let (typ, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected TYPE=VALUE, got {:?}", pair))?;
        builder = builder.value(typ.trim().parse()?, value.trim().parse::<U256>()?);
    }
    if let Some(sig) = signature {
        builder = builder.signature(&decode_hex(sig)?);
    }
    println!("0x{}", hex::encode(builder.build()?));
    Ok(())
}

fn decode(payload: &str, typ: Option<u16>) -> Result<(), Box<dyn Error>> {
    let bytes = decode_hex(payload)?;
    let (header, slots) = codec::decode_values(&bytes)?;

    println!(
        "version={} height={} chain_id={} system_id={} timestamp={} payload_len={}",
        header.version,
        header.height,
        header.chain_id,
        header.system_id,
        output::format_time(header.timestamp / 1_000),
        header.payload_len
    );
    for (i, slot) in slots.iter().enumerate() {
        println!("  [{}] type={} value={}", i, slot.typ, slot.value);
    }
    let trailing = bytes.len() - header.payload_size();
    if trailing > 0 {
        println!("  signature: {} bytes", trailing);
    }

    if let Some(typ) = typ {
        let d = codec::decode(&bytes, typ)?;
        println!("base_value={} value({})={}", d.base_value, typ, d.value);
    }
    Ok(())
}

fn replay(
    input: &Path,
    config: Option<&Path>,
    chunks: usize,
    sender: &str,
    output_dir: &str,
) -> Result<(), Box<dyn Error>> {
    let config = load_config(config)?;
    let sender: Address = sender.parse()?;
    let mut engine = RewardController::new(sender, &config)?;
    let mut summary = ReplaySummary::default();

    let text = std::fs::read_to_string(input)?;
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let outcomes = engine
            .update_oracles(sender, &decode_hex(line)?, chunks)
            .map_err(|e| format!("line {}: {}", n + 1, e))?;
        summary.record(&outcomes);
    }
    summary.total_rewards = engine.total_rewards().to_string();

    let dir = PathBuf::from(output_dir);
    output::save_events_csv(engine.events(), &dir.join("events.csv"))?;
    output::save_json(&summary, &dir.join("summary.json"))?;

    println!(
        "Replayed {} batches: {} rewarded, {} stale, {} rejected -> {}",
        summary.batches,
        summary.rewarded,
        summary.stale,
        summary.rejected,
        dir.display()
    );
    Ok(())
}

fn simulate(
    config: Option<&Path>,
    hours: u64,
    updaters: usize,
    seed: u64,
    output_dir: &str,
) -> Result<(), Box<dyn Error>> {
    let sim_config = SimulationConfig {
        engine: load_config(config)?,
        updaters,
        seed,
        duration_secs: hours * 3600,
        ..SimulationConfig::default()
    };

    println!(
        "Simulating {} chains, {} updaters for {}h (seed {})",
        sim_config.chains.len(),
        updaters,
        hours,
        seed
    );
    let sim = run_simulation(sim_config)?;

    let dir = PathBuf::from(output_dir);
    output::save_all(&sim, &dir)?;

    let summary = output::compute_summary(&sim);
    println!(
        "  accepted={} stale={} mean_interval={:.0}s (target {:.0}s) output={:.4} rewards={:.2} -> {}",
        summary.accepted,
        summary.stale,
        summary.mean_interval_secs,
        summary.target_interval_secs,
        summary.final_output,
        summary.total_rewards,
        dir.display()
    );
    Ok(())
}

fn sweep(
    kp: Option<&str>,
    ki: Option<&str>,
    seeds: u64,
    hours: u64,
    seed: u64,
    output_dir: &str,
    progress: bool,
) -> Result<(), Box<dyn Error>> {
    let (default_kp, default_ki) = SweepEngine::default_grid();
    let kps = kp.map(parse_list).transpose()?.unwrap_or(default_kp);
    let kis = ki.map(parse_list).transpose()?.unwrap_or(default_ki);

    let base = SimulationConfig {
        duration_secs: hours * 3600,
        ..SimulationConfig::default()
    };
    let engine = SweepEngine::new(base, (0..seeds).map(|i| seed.wrapping_add(i)).collect())
        .with_progress(progress);

    println!(
        "Sweeping {} kp x {} ki values, {} seeds each ({}h runs)...",
        kps.len(),
        kis.len(),
        seeds,
        hours
    );
    let results = engine.run_grid(&kps, &kis)?;

    let path = PathBuf::from(output_dir).join("sweep_results.csv");
    output::save_sweep_results(&results, &path)?;
    println!("Saved sweep results to {}", path.display());

    println!("\nTop configurations:");
    for (i, r) in results.iter().take(3).enumerate() {
        println!(
            "  #{}: score={:.6} kp={:.4} ki={:.4} output={:.4}",
            i + 1,
            r.score,
            r.kp,
            r.ki,
            r.mean_output
        );
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Encode {
            version,
            height,
            chain_id,
            system_id,
            timestamp,
            values,
            signature,
        } => encode(
            version,
            height,
            chain_id,
            system_id,
            timestamp,
            &values,
            signature.as_deref(),
        ),

        Commands::Decode { payload, typ } => decode(&payload, typ),

        Commands::Replay {
            input,
            config,
            chunks,
            sender,
            output_dir,
        } => replay(&input, config.as_deref(), chunks, &sender, &output_dir),

        Commands::Simulate {
            config,
            hours,
            updaters,
            seed,
            output_dir,
        } => simulate(config.as_deref(), hours, updaters, seed, &output_dir),

        Commands::Sweep {
            kp,
            ki,
            seeds,
            hours,
            seed,
            output_dir,
            progress,
        } => sweep(
            kp.as_deref(),
            ki.as_deref(),
            seeds,
            hours,
            seed,
            &output_dir,
            progress,
        ),

        Commands::Config => EngineConfig::default()
            .to_toml_string()
            .map(|s| print!("{}", s))
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
