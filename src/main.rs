use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use reweight_sweep::columns::DEFAULT_TABLE;
use reweight_sweep::exec::DEFAULT_CHUNK_SIZE;
use reweight_sweep::pipeline::BASE_COLUMNS;
use reweight_sweep::plot::{self, Scale};
use reweight_sweep::{
    ColumnSource, Executor, ParameterBinding, ParameterSampler, PipelineBuilder,
    PipelineConfig, Result, SharedBinding, SplineFile, SplineWeightTable, StagedOutputs, Sweep,
    SweepStrategy, Systematic, TableId,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Event table: a CSV/TSV/Parquet file, or a directory holding `<table>.<ext>`
    #[arg(value_name = "EVENTS")]
    events: PathBuf,
    /// JSON file with the spline interpolators and the reference histogram
    #[arg(value_name = "SPLINES")]
    splines: Option<PathBuf>,
    #[arg(long, value_name = "NAME", default_value = DEFAULT_TABLE)]
    table: String,
    #[arg(short = 'n', long, value_name = "N", default_value_t = 1000)]
    trials: usize,
    #[arg(short, long, value_name = "SEED", default_value_t = 4357)]
    seed: u64,
    /// Worker threads; 0 processes rows on the calling thread
    #[arg(short = 'j', long, value_name = "N", default_value_t = 0)]
    threads: usize,
    #[arg(long, value_name = "ROWS", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    #[arg(long, value_name = "STRATEGY", default_value_t = SweepStrategy::Rebind)]
    strategy: SweepStrategy,
    /// Re-read the columns on every pass instead of keeping them in memory
    #[arg(long)]
    no_cache: bool,
    #[arg(long, value_name = "P", default_value = "dev.mysyst1")]
    spline_prefix: String,
    #[arg(long, value_name = "H", default_value = "dev_tmp")]
    spline_hist: String,
    #[arg(long, value_name = "N", default_value_t = 5)]
    spline_bins: usize,
    /// Number of systematic copies of the spline table
    #[arg(long, value_name = "N", default_value_t = 1)]
    systematics: usize,
    /// JSON pipeline configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Write the stage graph in DOT format
    #[arg(long, value_name = "FILE")]
    graph: Option<PathBuf>,
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,
    #[arg(long)]
    no_plot: bool,
    #[arg(long)]
    progress: bool,
    #[arg(long, value_name = "LEVEL", default_value_t = tracing::Level::WARN)]
    log_level: tracing::Level,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                let _ = err.print();
                return ExitCode::from(1);
            }
        },
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(cli.log_level).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut source = ColumnSource::new();
    let view = source.load(&TableId::new(&cli.events, &cli.table), &BASE_COLUMNS)?;
    if !cli.no_cache {
        view.cache()?;
    }
    print!("{}", view.describe());

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    let systematics = match &cli.splines {
        Some(path) => {
            let file = SplineFile::open(path)?;
            let table = Arc::new(SplineWeightTable::build(
                &file,
                &cli.spline_prefix,
                &cli.spline_hist,
                cli.spline_bins,
            )?);
            (0..cli.systematics)
                .map(|i| Systematic::new(format!("spline_weight_{i}"), table.clone()))
                .collect()
        }
        None => {
            tracing::warn!("no spline file given, running without spline systematics");
            Vec::new()
        }
    };
    let builder = PipelineBuilder::new(view)
        .config(config)
        .systematics(systematics);

    let executor = match cli.threads {
        0 => Executor::sequential(),
        n => Executor::parallel(n, cli.chunk_size)?,
    };

    let pipeline = builder.build(SharedBinding::new(ParameterBinding::nominal()))?;
    let nominal = pipeline.evaluate(&executor)?;
    tracing::info!(
        entries = nominal.entries(),
        integral = nominal.integral(),
        underflow = nominal.underflow(),
        overflow = nominal.overflow(),
        "nominal histogram filled"
    );
    println!("{}", pipeline.report()?);

    let draws = ParameterSampler::new(cli.seed)?.draws(cli.trials);
    let summary = Sweep::new(&builder, &executor)
        .strategy(cli.strategy)
        .progress(cli.progress)
        .run(&pipeline, &draws)?;

    let mut outputs = StagedOutputs::new();
    if !cli.no_plot {
        fs::create_dir_all(&cli.output_dir)?;
        let linear = outputs.stage(cli.output_dir.join("ELep.png"));
        plot::render_histogram(&nominal, &linear, "ELep", Scale::Linear)?;
        let log = outputs.stage(cli.output_dir.join("ELep_log.png"));
        plot::render_histogram(&nominal, &log, "ELep", Scale::Log)?;
    }
    if let Some(path) = &cli.graph {
        fs::write(outputs.stage(path), pipeline.to_dot())?;
    }
    outputs.commit()?;
    println!("{summary}");
    Ok(())
}
