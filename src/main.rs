use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gasforge::benchmark::{BenchmarkHarness, DivergenceTally};
use gasforge::config::Settings;
use gasforge::corpus::CorpusReader;
use gasforge::evolution::GeneticEngine;
use gasforge::executor::{CommandExecutor, Executor};
use gasforge::metadata::InstructionMetadata;
use gasforge::profiler::profile_program;
use gasforge::program::Program;
use gasforge::report::ReportWriter;
use gasforge::stream::Sink;
use gasforge::{GasForgeError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON settings file; command-line flags override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command line of the external VM process
    #[arg(short, long, global = true)]
    executor: Option<String>,

    /// Instruction metadata table (JSON, optionally .gz)
    #[arg(short, long, global = true)]
    metadata: Option<PathBuf>,

    /// Per-call executor timeout in milliseconds
    #[arg(long, global = true)]
    exec_timeout_ms: Option<u64>,

    /// Timed executions per program
    #[arg(long, global = true)]
    exec_count: Option<u64>,

    /// Raise the default log level to debug
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit diagnostics as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the genetic search
    Search {
        #[arg(long)]
        population: Option<usize>,
        #[arg(long)]
        generations: Option<u64>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        workers: Option<usize>,
        /// Best candidates to write at the end
        #[arg(long, default_value_t = 10)]
        best: usize,
        /// Where best candidates go (`-` for stdout, `.gz` to compress)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
        /// Per-generation summaries
        #[arg(long)]
        reports: Option<PathBuf>,
        /// Also dump the best candidates every N generations
        #[arg(long)]
        checkpoint_every: Option<u64>,
        /// Attach an instruction profile to every written candidate
        #[arg(long)]
        profile_best: bool,
    },
    /// Re-benchmark every program of a corpus
    Bench {
        #[arg(long, default_value = "-")]
        corpus: PathBuf,
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },
    /// Run one program under the instruction profiler
    Profile {
        /// Hex bytecode
        #[arg(long)]
        code: String,
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },
    /// Write the instruction metadata table in use
    Metadata {
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_json);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = e.kind(), error = %e, "gasforge failed");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let default_level = if verbose > 0 { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // stdout belongs to the report sinks
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: Args) -> Result<()> {
    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| GasForgeError::ConfigError(format!("metrics exporter: {}", e)))?;
        info!(%addr, "metrics exporter listening");
    }

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if args.executor.is_some() {
        settings.executor = args.executor.clone();
    }
    if args.metadata.is_some() {
        settings.metadata = args.metadata.clone();
    }
    if let Some(ms) = args.exec_timeout_ms {
        settings.benchmark.exec_timeout_ms = Some(ms);
    }
    if let Some(count) = args.exec_count {
        settings.benchmark.exec_count = count;
    }

    match args.command {
        Command::Search {
            population,
            generations,
            seed,
            workers,
            best,
            output,
            reports,
            checkpoint_every,
            profile_best,
        } => {
            if let Some(population) = population {
                settings.engine.population_size = population;
            }
            if let Some(generations) = generations {
                settings.engine.generations_count = generations;
            }
            if let Some(seed) = seed {
                settings.engine.seed = seed;
            }
            if let Some(workers) = workers {
                settings.engine.workers = workers;
            }
            settings.validate()?;
            search(
                &settings,
                best,
                &output,
                reports.as_deref(),
                checkpoint_every,
                profile_best,
            )
        }
        Command::Bench { corpus, output } => {
            settings.validate()?;
            bench(&settings, &corpus, &output)
        }
        Command::Profile { code, output } => {
            settings.validate()?;
            profile(&settings, &code, &output)
        }
        Command::Metadata { output } => {
            let metadata = load_metadata(&settings)?;
            let mut sink = Sink::open(&output)?;
            writeln!(sink, "{}", metadata.to_json()?)?;
            sink.finish()
        }
    }
}

fn load_metadata(settings: &Settings) -> Result<InstructionMetadata> {
    match &settings.metadata {
        Some(path) => InstructionMetadata::load(path),
        None => Ok(InstructionMetadata::default_table()),
    }
}

fn make_executor(settings: &Settings) -> Result<CommandExecutor> {
    let command = settings.executor.as_deref().ok_or_else(|| {
        GasForgeError::ConfigError(
            "no executor command; pass --executor or set it in the settings file".to_string(),
        )
    })?;
    let timeout = settings.benchmark.exec_timeout_ms.map(Duration::from_millis);
    Ok(CommandExecutor::from_command_line(command)?.with_timeout(timeout))
}

fn search(
    settings: &Settings,
    best: usize,
    output: &Path,
    reports: Option<&Path>,
    checkpoint_every: Option<u64>,
    profile_best: bool,
) -> Result<()> {
    let metadata = Arc::new(load_metadata(settings)?);
    // privilege-gated settings fail here, before any generation runs
    let harness = BenchmarkHarness::new(settings.benchmark.clone())?;
    let executors = (0..settings.engine.workers)
        .map(|_| make_executor(settings).map(|e| Box::new(e) as Box<dyn Executor>))
        .collect::<Result<Vec<_>>>()?;

    let mut engine = GeneticEngine::new(
        settings.engine.clone(),
        metadata,
        harness,
        settings.env.clone(),
        executors,
    )?;
    let report_writer = reports.map(ReportWriter::new);
    if let Some(writer) = &report_writer {
        engine = engine.with_reports(writer.clone());
    }
    let output = ReportWriter::new(output);

    while !engine.is_finished() {
        engine.step()?;
        if let Some(every) = checkpoint_every.filter(|every| *every > 0) {
            if engine.generation() % every == 0 && !engine.is_finished() {
                let written = engine.output_best(best, &output, false)?;
                info!(generation = engine.generation(), written, "checkpoint written");
            }
        }
    }
    engine.finalize()?;
    engine.output_best(best, &output, profile_best)?;

    if let Some(best) = engine.best_ever() {
        info!(
            fitness = best.fitness(settings.engine.objective),
            size = best.program.size(),
            born = best.born,
            code = %best.program.to_hex(),
            "search finished"
        );
    }
    output.finish()?;
    if let Some(writer) = report_writer {
        writer.finish()?;
    }
    Ok(())
}

fn bench(settings: &Settings, corpus: &Path, output: &Path) -> Result<()> {
    let harness = BenchmarkHarness::new(settings.benchmark.clone())?;
    harness.pin_thread(0);
    let mut executor = make_executor(settings)?;
    let output = ReportWriter::new(output);

    let mut tally = DivergenceTally::default();
    for entry in CorpusReader::open(corpus)? {
        let entry = entry?;
        let mut env = settings.env.clone();
        if let Some(block_number) = entry.block_number {
            env.block_number = block_number;
        }
        let reports =
            harness.benchmark_batch(&mut executor, &env, &entry.programs, entry.block_number)?;
        for (program, report) in entry.programs.iter().zip(&reports) {
            output.write_record(&report.record(settings.benchmark.debug, Some(program)))?;
            tally.observe(report);
        }
    }
    output.finish()?;
    info!(diverged = tally.diverged(), "corpus benchmarked");
    let programs = tally.finish()?;
    info!(programs, "all programs reproduced");
    Ok(())
}

fn profile(settings: &Settings, code: &str, output: &Path) -> Result<()> {
    let program = Program::from_hex(code)
        .map_err(|e| GasForgeError::ConfigError(format!("--code: {}", e)))?;
    let mut executor = make_executor(settings)?;
    let profile = profile_program(&mut executor, &settings.env, &program)?;

    let output = ReportWriter::new(output);
    output.write_record(&profile)?;
    output.finish()?;
    if profile.exception.is_fault() {
        return Err(GasForgeError::ExecutionFault(profile.exception));
    }
    Ok(())
}
