use anyhow::{bail, Context, Result};
use attribution_sim::dataset::{write_frame, SyntheticDataGenerator};
use attribution_sim::experiment::{simulate_run, ExperimentConfig, ExperimentRunner};
use attribution_sim::hierarchy::HierarchyBuilder;
use attribution_sim::injector::CausalEffectInjector;
use attribution_sim::labels::RandomLabels;
use attribution_sim::scorer::{AttributionScorer, GroundTruth, SolverReport};
use attribution_sim::solver::{ProcessSolver, SolverJob};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "attribution-sim")]
#[command(about = "Synthetic benchmark harness for hierarchical attribution solvers")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full experiment sweep against a solver executable
    Run {
        /// Experiment config (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Solver executable (or set ATTRIBUTION_SOLVER)
        #[arg(long)]
        solver: Option<PathBuf>,

        /// Master seed, overriding the config
        #[arg(long)]
        seed: Option<u64>,

        /// Results CSV, overriding the config
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        repetitions: Option<usize>,
    },

    /// Write one simulated run (input, levels, truth, job) for manual solving
    Generate {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Configuration name; the first one when omitted
        #[arg(long)]
        configuration: Option<String>,

        #[arg(long, default_value_t = 3)]
        causes: usize,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, default_value = "run")]
        out_dir: PathBuf,
    },

    /// Score a solver report against a saved ground truth
    Score {
        #[arg(long)]
        truth: PathBuf,

        #[arg(long)]
        report: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ExperimentConfig> {
    let config = match path {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };
    Ok(config)
}

async fn run(
    config: Option<PathBuf>,
    solver: Option<PathBuf>,
    seed: Option<u64>,
    output: Option<PathBuf>,
    repetitions: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config.as_ref())?;
    if seed.is_some() {
        config.seed = seed;
    }
    if let Some(output) = output {
        config.output = output;
    }
    if let Some(repetitions) = repetitions {
        config.repetitions = repetitions;
    }

    config.validate()?;

    let executable = solver
        .or_else(|| std::env::var("ATTRIBUTION_SOLVER").ok().map(PathBuf::from))
        .or_else(|| config.solver.executable.clone());
    let Some(executable) = executable else {
        bail!("no solver executable: pass --solver, set ATTRIBUTION_SOLVER, or set solver.executable");
    };
    info!("Solver: {}", executable.display());

    let solver = ProcessSolver::new(executable, config.solver.timeout())
        .with_args(config.solver.args.clone());
    let runner = ExperimentRunner::new(config, solver)?;
    let report = runner.run().await?;

    report.table.write_csv(&runner.config().output)?;
    println!("\n{}", report);
    Ok(())
}

fn generate(
    config: Option<PathBuf>,
    configuration: Option<String>,
    causes: usize,
    seed: Option<u64>,
    out_dir: PathBuf,
) -> Result<()> {
    let config = load_config(config.as_ref())?;
    config.validate()?;

    let hierarchy = match &configuration {
        Some(name) => config
            .configuration(name)
            .with_context(|| format!("no configuration named {}", name))?,
        None => config
            .configurations
            .first()
            .context("config has no configurations")?,
    };

    let master_seed = seed.or(config.seed).unwrap_or_else(rand::random);
    let mut master = StdRng::seed_from_u64(master_seed);
    let spec = {
        let mut labels = RandomLabels::with_length(&mut master, config.label_length);
        HierarchyBuilder.build(&hierarchy.dimensions, &mut labels)?
    };
    let run_seed: u64 = master.gen();

    let generator = SyntheticDataGenerator::new(config.generation.clone())?;
    let injector = CausalEffectInjector::new(config.injection.clone())?;
    let simulated = simulate_run(&spec, &generator, &injector, causes, run_seed, &config.delimiter)?;

    std::fs::create_dir_all(&out_dir)?;
    let input_path = out_dir.join("input.csv");
    let output_path = out_dir.join("output.csv");
    simulated.dataset.write_csv(&spec, &config.layout, &input_path)?;
    write_frame(&mut spec.level_frame()?, &out_dir.join("levels.csv"))?;
    simulated.truth.write_csv(out_dir.join("truth.csv"))?;

    let method = config
        .solver
        .methods
        .first()
        .context("config has no solver methods")?;
    SolverJob::new(&spec, &config.layout, method, &input_path, &output_path)?
        .write_json(out_dir.join("job.json"))?;

    info!(
        "Generated {} ({} leaves, {} causes) in {} with master seed {}",
        hierarchy.name,
        spec.leaf_rows().len(),
        causes,
        out_dir.display(),
        master_seed
    );
    for entry in simulated.truth.entries() {
        println!("{:>14.2}  {}", entry.impact, entry.description);
    }
    Ok(())
}

fn score(truth: PathBuf, report: PathBuf) -> Result<()> {
    let truth = GroundTruth::load_csv(&truth)
        .with_context(|| format!("failed to load truth {}", truth.display()))?;
    let report = SolverReport::load_csv(&report)
        .with_context(|| format!("failed to load report {}", report.display()))?;
    let accuracy = AttributionScorer.score(&truth, &report);
    println!("accuracy: {:.6}", accuracy);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            config,
            solver,
            seed,
            output,
            repetitions,
        } => run(config, solver, seed, output, repetitions).await,
        Command::Generate {
            config,
            configuration,
            causes,
            seed,
            out_dir,
        } => generate(config, configuration, causes, seed, out_dir),
        Command::Score { truth, report } => score(truth, report),
    }
}
