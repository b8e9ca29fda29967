//! Genetic Algorithm Evolution Engine
//!
//! Evolves a population of bytecode programs toward a throughput objective:
//! every generation is evaluated through the benchmark harness, ranked, and
//! replaced by elites plus mutated children of tournament-selected parents.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::benchmark::{BenchmarkHarness, BenchmarkRecord, BenchmarkReport, Outcome, TargetMetric};
use crate::error::{GasForgeError, Result};
use crate::executor::{ExecutionEnv, Executor};
use crate::generator::{ProgramGenerator, SizeBounds};
use crate::metadata::InstructionMetadata;
use crate::profiler::{profile_program, ProfileReport};
use crate::program::Program;
use crate::report::ReportWriter;

/// Direction of the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Objective {
    /// Fewest gas per second: programs that are cheap to meter but slow to run
    #[default]
    MinimizeThroughput,
    MaximizeThroughput,
}

impl Objective {
    /// Fitness assigned to programs without a usable measurement
    pub fn worst(self) -> f64 {
        match self {
            Objective::MinimizeThroughput => f64::MAX,
            Objective::MaximizeThroughput => f64::MIN,
        }
    }

    /// `Less` when `a` ranks ahead of `b`
    pub fn compare(self, a: f64, b: f64) -> Ordering {
        match self {
            Objective::MinimizeThroughput => a.total_cmp(&b),
            Objective::MaximizeThroughput => b.total_cmp(&a),
        }
    }
}

/// Configuration for the evolution process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneticEngineConfig {
    /// Number of individuals in every generation
    pub population_size: usize,
    pub initial_program_size: usize,
    pub minimum_program_size: usize,
    pub maximum_program_size: usize,
    pub generations_count: u64,
    /// Point edits applied to each child
    pub mutations_count: usize,
    /// Share of the population copied unchanged into the next generation
    pub elite_ratio: f64,
    pub tournament_selection_ratio: f64,
    /// Probability that the best remaining tournament member wins
    pub tournament_selection_prob: f64,
    /// Random seed for reproducibility
    pub seed: u64,
    pub target_metric: TargetMetric,
    /// Benchmark each distinct program at most once per run
    pub cache_results: bool,
    pub objective: Objective,
    /// Parallel evaluation workers, each with its own executor
    pub workers: usize,
}

impl Default for GeneticEngineConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            initial_program_size: 50,
            minimum_program_size: 1,
            maximum_program_size: 500,
            generations_count: 10,
            mutations_count: 1,
            elite_ratio: 0.1,
            tournament_selection_ratio: 0.1,
            tournament_selection_prob: 0.8,
            seed: 42,
            target_metric: TargetMetric::Mean,
            cache_results: true,
            objective: Objective::MinimizeThroughput,
            workers: 1,
        }
    }
}

impl GeneticEngineConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(GasForgeError::ConfigError(msg));
        if self.population_size == 0 {
            return fail("populationSize must be at least 1".to_string());
        }
        if self.workers == 0 {
            return fail("workers must be at least 1".to_string());
        }
        SizeBounds::new(self.minimum_program_size, self.maximum_program_size)?;
        for (name, ratio) in [
            ("eliteRatio", self.elite_ratio),
            ("tournamentSelectionRatio", self.tournament_selection_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return fail(format!("{} {} is outside [0, 1]", name, ratio));
            }
        }
        if !(self.tournament_selection_prob > 0.0 && self.tournament_selection_prob <= 1.0) {
            return fail(format!(
                "tournamentSelectionProb {} is outside (0, 1]",
                self.tournament_selection_prob
            ));
        }
        Ok(())
    }

    pub fn size_bounds(&self) -> Result<SizeBounds> {
        SizeBounds::new(self.minimum_program_size, self.maximum_program_size)
    }

    pub fn elite_count(&self) -> usize {
        ((self.elite_ratio * self.population_size as f64).round() as usize).min(self.population_size)
    }

    pub fn tournament_size(&self) -> usize {
        ((self.tournament_selection_ratio * self.population_size as f64).round() as usize)
            .clamp(1, self.population_size)
    }
}

/// Fitness of one benchmarked program
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// `None` when the run faulted, diverged, timed out or used no gas
    pub fitness: Option<f64>,
    pub report: Arc<BenchmarkReport>,
}

/// A program with its score and lineage
#[derive(Debug, Clone)]
pub struct Individual {
    pub program: Program,
    pub evaluation: Option<Evaluation>,
    /// Generation the program was created in
    pub born: u64,
    /// Creation order over the whole run
    pub serial: u64,
}

impl Individual {
    /// Fitness, or the objective's worst-case sentinel
    pub fn fitness(&self, objective: Objective) -> f64 {
        self.evaluation
            .as_ref()
            .and_then(|evaluation| evaluation.fitness)
            .unwrap_or_else(|| objective.worst())
    }
}

/// Statistics of one evaluated generation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub generation: u64,
    pub best: f64,
    /// Mean over individuals with a usable fitness
    pub mean: f64,
    pub valid: usize,
    pub evaluated: usize,
    pub cache_hits: usize,
    pub faults: usize,
    pub nondeterministic: usize,
    pub timeouts: usize,
    pub best_code: String,
}

/// One `outputBest` line
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestRecord {
    pub rank: usize,
    pub code: String,
    pub size: usize,
    pub fitness: Option<f64>,
    pub generation: u64,
    pub serial: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileReport>,
}

#[derive(Debug, Default)]
struct Tally {
    evaluated: usize,
    cache_hits: usize,
    faults: usize,
    nondeterministic: usize,
    timeouts: usize,
}

/// Seed of the selection stream, kept apart from the generator's
fn selection_seed(seed: u64) -> u64 {
    // one SplitMix64 step
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// The main evolution engine
pub struct GeneticEngine {
    config: GeneticEngineConfig,
    harness: BenchmarkHarness,
    env: ExecutionEnv,
    /// One per worker; never shared between threads
    executors: Vec<Box<dyn Executor>>,
    generator: ProgramGenerator,
    /// RNG for selection
    rng: StdRng,
    population: Vec<Individual>,
    generation: u64,
    next_serial: u64,
    cache: HashMap<Program, Evaluation>,
    best_ever: Option<Individual>,
    history: Vec<GenerationSummary>,
    reports: Option<ReportWriter>,
}

impl GeneticEngine {
    /// Validate everything and build the initial population. Nothing is
    /// executed yet.
    pub fn new(
        config: GeneticEngineConfig,
        metadata: Arc<InstructionMetadata>,
        harness: BenchmarkHarness,
        env: ExecutionEnv,
        executors: Vec<Box<dyn Executor>>,
    ) -> Result<Self> {
        config.validate()?;
        env.validate()?;
        if executors.is_empty() {
            return Err(GasForgeError::ConfigError(
                "at least one executor is required".to_string(),
            ));
        }
        let generator = ProgramGenerator::new(metadata, config.size_bounds()?, config.seed)?;
        let rng = StdRng::seed_from_u64(selection_seed(config.seed));

        let mut engine = Self {
            config,
            harness,
            env,
            executors,
            generator,
            rng,
            population: Vec::new(),
            generation: 0,
            next_serial: 0,
            cache: HashMap::new(),
            best_ever: None,
            history: Vec::new(),
            reports: None,
        };
        let mut population = Vec::with_capacity(engine.config.population_size);
        for _ in 0..engine.config.population_size {
            let program = engine
                .generator
                .generate_initial(engine.config.initial_program_size);
            population.push(engine.individual(program, 0));
        }
        engine.population = population;
        info!(
            population = engine.config.population_size,
            generations = engine.config.generations_count,
            workers = engine.executors.len(),
            seed = engine.config.seed,
            "initial population generated"
        );
        Ok(engine)
    }

    /// Stream a [`GenerationSummary`] line per generation to `writer`
    pub fn with_reports(mut self, writer: ReportWriter) -> Self {
        self.reports = Some(writer);
        self
    }

    fn individual(&mut self, program: Program, born: u64) -> Individual {
        let serial = self.next_serial;
        self.next_serial += 1;
        Individual {
            program,
            evaluation: None,
            born,
            serial,
        }
    }

    pub fn config(&self) -> &GeneticEngineConfig {
        &self.config
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    /// Generations bred so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn history(&self) -> &[GenerationSummary] {
        &self.history
    }

    pub fn best_ever(&self) -> Option<&Individual> {
        self.best_ever.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.generation >= self.config.generations_count
    }

    /// Evaluate, select and breed one generation
    pub fn step(&mut self) -> Result<GenerationSummary> {
        if !self.config.cache_results {
            for individual in &mut self.population {
                individual.evaluation = None;
            }
        }
        let tally = self.evaluate_population()?;
        let order = self.ranked_indices();
        let summary = self.summarize(&order, tally);
        self.update_best(&order);

        gauge!("gasforge_generation", self.generation as f64);
        gauge!("gasforge_best_fitness", summary.best);
        counter!("gasforge_cache_hits_total", summary.cache_hits as u64);
        info!(
            generation = summary.generation,
            best = summary.best,
            mean = summary.mean,
            valid = summary.valid,
            evaluated = summary.evaluated,
            cache_hits = summary.cache_hits,
            faults = summary.faults,
            "generation evaluated"
        );
        if let Some(writer) = &self.reports {
            writer.write_record(&summary)?;
        }

        self.breed(&order);
        self.generation += 1;
        self.history.push(summary.clone());
        Ok(summary)
    }

    /// Run the remaining generations and score the final population
    pub fn run(&mut self) -> Result<&[Individual]> {
        while !self.is_finished() {
            self.step()?;
        }
        self.finalize()?;
        Ok(&self.population)
    }

    /// Score individuals that have not been evaluated yet
    pub fn finalize(&mut self) -> Result<()> {
        self.evaluate_population()?;
        let order = self.ranked_indices();
        self.update_best(&order);
        Ok(())
    }

    /// Population indices, best first; ties keep population order
    fn ranked_indices(&self) -> Vec<usize> {
        let objective = self.config.objective;
        let mut order: Vec<usize> = (0..self.population.len()).collect();
        order.sort_by(|&a, &b| {
            objective.compare(
                self.population[a].fitness(objective),
                self.population[b].fitness(objective),
            )
        });
        order
    }

    /// The `n` best individuals of the current population
    pub fn best(&self, n: usize) -> Vec<&Individual> {
        self.ranked_indices()
            .into_iter()
            .take(n)
            .map(|idx| &self.population[idx])
            .collect()
    }

    fn update_best(&mut self, order: &[usize]) {
        let objective = self.config.objective;
        let Some(&top) = order.first() else {
            return;
        };
        let candidate = &self.population[top];
        if candidate.evaluation.as_ref().and_then(|e| e.fitness).is_none() {
            return;
        }
        let improves = match &self.best_ever {
            None => true,
            Some(best) => {
                objective.compare(candidate.fitness(objective), best.fitness(objective))
                    == Ordering::Less
            }
        };
        if improves {
            self.best_ever = Some(candidate.clone());
        }
    }

    fn summarize(&self, order: &[usize], tally: Tally) -> GenerationSummary {
        let objective = self.config.objective;
        let valid: Vec<f64> = self
            .population
            .iter()
            .filter_map(|individual| individual.evaluation.as_ref().and_then(|e| e.fitness))
            .collect();
        let mean = if valid.is_empty() {
            objective.worst()
        } else {
            valid.iter().sum::<f64>() / valid.len() as f64
        };
        let best = order
            .first()
            .map(|&idx| &self.population[idx]);
        GenerationSummary {
            generation: self.generation,
            best: best
                .map(|individual| individual.fitness(objective))
                .unwrap_or_else(|| objective.worst()),
            mean,
            valid: valid.len(),
            evaluated: tally.evaluated,
            cache_hits: tally.cache_hits,
            faults: tally.faults,
            nondeterministic: tally.nondeterministic,
            timeouts: tally.timeouts,
            best_code: best
                .map(|individual| individual.program.to_hex())
                .unwrap_or_default(),
        }
    }

    /// Benchmark every individual without an evaluation, reusing cached
    /// scores and benchmarking duplicates once
    fn evaluate_population(&mut self) -> Result<Tally> {
        let mut tally = Tally::default();
        let mut jobs: Vec<Program> = Vec::new();
        let mut job_index: HashMap<Program, usize> = HashMap::new();
        let mut pending: Vec<(usize, usize)> = Vec::new();

        for (i, individual) in self.population.iter_mut().enumerate() {
            if individual.evaluation.is_some() {
                continue;
            }
            if self.config.cache_results {
                if let Some(evaluation) = self.cache.get(&individual.program) {
                    individual.evaluation = Some(evaluation.clone());
                    tally.cache_hits += 1;
                    continue;
                }
                if let Some(&job) = job_index.get(&individual.program) {
                    tally.cache_hits += 1;
                    pending.push((i, job));
                    continue;
                }
                job_index.insert(individual.program.clone(), jobs.len());
            }
            pending.push((i, jobs.len()));
            jobs.push(individual.program.clone());
        }

        let reports = self.run_jobs(&jobs)?;
        let metric = self.config.target_metric;
        let evaluations: Vec<Evaluation> = reports
            .into_iter()
            .map(|report| {
                match report.outcome {
                    Outcome::Completed => {}
                    Outcome::Faulted { .. } => tally.faults += 1,
                    Outcome::Nondeterministic { .. } => tally.nondeterministic += 1,
                    Outcome::TimedOut => tally.timeouts += 1,
                }
                Evaluation {
                    fitness: report.fitness(metric),
                    report: Arc::new(report),
                }
            })
            .collect();
        tally.evaluated = evaluations.len();

        if self.config.cache_results {
            for (program, evaluation) in jobs.iter().zip(&evaluations) {
                self.cache.insert(program.clone(), evaluation.clone());
            }
        }
        for (individual, job) in pending {
            self.population[individual].evaluation = Some(evaluations[job].clone());
        }
        debug!(
            evaluated = tally.evaluated,
            cache_hits = tally.cache_hits,
            "population evaluated"
        );
        Ok(tally)
    }

    /// Benchmark `jobs` across the workers; results come back in job order
    fn run_jobs(&mut self, jobs: &[Program]) -> Result<Vec<BenchmarkReport>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.executors.len().min(jobs.len());
        let harness = &self.harness;
        let env = &self.env;
        let executors = &mut self.executors;

        let joined = crossbeam::scope(|scope| {
            let handles: Vec<_> = executors
                .iter_mut()
                .take(workers)
                .enumerate()
                .map(|(worker, executor)| {
                    scope.spawn(move |_| {
                        harness.pin_thread(worker);
                        let mut results = Vec::new();
                        for idx in (worker..jobs.len()).step_by(workers) {
                            let result = harness.benchmark_program(&mut **executor, env, &jobs[idx]);
                            let failed = result.is_err();
                            results.push((idx, result));
                            if failed {
                                break;
                            }
                        }
                        results
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        })
        .map_err(|_| GasForgeError::ExecutorError("evaluation worker panicked".to_string()))?;

        let mut slots: Vec<Option<BenchmarkReport>> = vec![None; jobs.len()];
        for worker in joined {
            let results = worker.map_err(|_| {
                GasForgeError::ExecutorError("evaluation worker panicked".to_string())
            })?;
            for (idx, result) in results {
                slots[idx] = Some(result?);
            }
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| GasForgeError::ExecutorError("missing evaluation".to_string()))
            })
            .collect()
    }

    /// Pick a parent: sample a subset without replacement, rank it, then walk
    /// down the ranking, stopping at each member with the win probability
    fn tournament_select(&mut self) -> usize {
        let population = self.population.len();
        let size = self.config.tournament_size().min(population);
        let objective = self.config.objective;
        let mut subset = rand::seq::index::sample(&mut self.rng, population, size).into_vec();
        subset.sort_by(|&a, &b| {
            objective
                .compare(
                    self.population[a].fitness(objective),
                    self.population[b].fitness(objective),
                )
                .then(a.cmp(&b))
        });
        for &idx in &subset {
            if self.rng.gen::<f64>() < self.config.tournament_selection_prob {
                return idx;
            }
        }
        subset[subset.len() - 1]
    }

    /// Replace the population with elites plus mutated children
    fn breed(&mut self, order: &[usize]) {
        let size = self.config.population_size;
        let mut next = Vec::with_capacity(size);

        // Elitism: keep best individuals unchanged
        for &idx in order.iter().take(self.config.elite_count()) {
            next.push(self.population[idx].clone());
        }

        let born = self.generation + 1;
        while next.len() < size {
            let parent = self.tournament_select();
            let child = self
                .generator
                .mutate(&self.population[parent].program, self.config.mutations_count);
            let child = self.individual(child, born);
            next.push(child);
        }

        self.population = next;
    }

    /// Write the `n` best individuals to `writer`, best first. With
    /// `profile`, each one is also run once under the profiler.
    pub fn output_best(&mut self, n: usize, writer: &ReportWriter, profile: bool) -> Result<usize> {
        self.evaluate_population()?;
        let order = self.ranked_indices();
        let mut written = 0;
        for (rank, idx) in order.into_iter().take(n).enumerate() {
            let individual = &self.population[idx];
            let profile = if profile {
                Some(profile_program(&mut *self.executors[0], &self.env, &individual.program)?.profile)
            } else {
                None
            };
            let record = BestRecord {
                rank: rank + 1,
                code: individual.program.to_hex(),
                size: individual.program.size(),
                fitness: individual.evaluation.as_ref().and_then(|e| e.fitness),
                generation: individual.born,
                serial: individual.serial,
                benchmark: individual
                    .evaluation
                    .as_ref()
                    .map(|e| e.report.record(false, None)),
                profile,
            };
            writer.write_record(&record)?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::BenchmarkConfig;
    use crate::executor::{ExceptionKind, ExecutionStats};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Gas grows with the byte sum, time with the length
    struct SyntheticExecutor {
        calls: Arc<AtomicUsize>,
    }

    impl Executor for SyntheticExecutor {
        fn execute(&mut self, code: &[u8], _env: &ExecutionEnv) -> Result<ExecutionStats> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let gas = 21_000 + code.iter().map(|b| *b as u64).sum::<u64>();
            Ok(ExecutionStats {
                gas_used: gas,
                wall_time: (code.len() as f64 + 1.0) * 1e-6,
                output: Vec::new(),
                exception: ExceptionKind::None,
            })
        }
    }

    fn engine(config: GeneticEngineConfig, calls: Arc<AtomicUsize>) -> GeneticEngine {
        let bench = BenchmarkConfig {
            exec_count: 2,
            warmup: false,
            ..Default::default()
        };
        let executors: Vec<Box<dyn Executor>> = (0..config.workers)
            .map(|_| {
                Box::new(SyntheticExecutor {
                    calls: calls.clone(),
                }) as Box<dyn Executor>
            })
            .collect();
        GeneticEngine::new(
            config,
            Arc::new(InstructionMetadata::default_table()),
            BenchmarkHarness::new(bench).unwrap(),
            ExecutionEnv::default(),
            executors,
        )
        .unwrap()
    }

    fn small_config() -> GeneticEngineConfig {
        GeneticEngineConfig {
            population_size: 12,
            initial_program_size: 10,
            minimum_program_size: 4,
            maximum_program_size: 20,
            generations_count: 3,
            mutations_count: 2,
            elite_ratio: 0.25,
            tournament_selection_ratio: 0.25,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_default_is_valid() {
        assert!(GeneticEngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad = GeneticEngineConfig {
            elite_ratio: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = GeneticEngineConfig {
            tournament_selection_prob: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = GeneticEngineConfig {
            minimum_program_size: 10,
            maximum_program_size: 5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_rounded_counts() {
        let config = GeneticEngineConfig {
            population_size: 10,
            elite_ratio: 0.25,
            tournament_selection_ratio: 0.01,
            ..Default::default()
        };
        assert_eq!(config.elite_count(), 3);
        assert_eq!(config.tournament_size(), 1);
    }

    #[test]
    fn test_objective_ordering() {
        assert_eq!(Objective::MinimizeThroughput.compare(1.0, 2.0), Ordering::Less);
        assert_eq!(Objective::MaximizeThroughput.compare(1.0, 2.0), Ordering::Greater);
        assert_eq!(
            Objective::MinimizeThroughput.compare(5.0, Objective::MinimizeThroughput.worst()),
            Ordering::Less
        );
        assert_eq!(
            Objective::MaximizeThroughput.compare(5.0, Objective::MaximizeThroughput.worst()),
            Ordering::Less
        );
    }

    #[test]
    fn test_population_size_is_constant() {
        let mut engine = engine(small_config(), Arc::new(AtomicUsize::new(0)));
        engine.run().unwrap();
        assert_eq!(engine.population().len(), 12);
        assert_eq!(engine.generation(), 3);
        assert_eq!(engine.history().len(), 3);
        assert!(engine.population().iter().all(|i| i.evaluation.is_some()));
    }

    #[test]
    fn test_cache_benchmarks_each_program_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = engine(small_config(), calls.clone());
        engine.run().unwrap();
        let distinct = engine.cache.len();
        // exec_count 2, no warm-up
        assert_eq!(calls.load(AtomicOrdering::SeqCst), distinct * 2);
    }

    #[test]
    fn test_without_cache_every_generation_is_rescored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = GeneticEngineConfig {
            cache_results: false,
            generations_count: 2,
            ..small_config()
        };
        let mut engine = engine(config, calls.clone());
        engine.step().unwrap();
        engine.step().unwrap();
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2 * 12 * 2);
    }

    #[test]
    fn test_elites_survive_unchanged() {
        let mut engine = engine(small_config(), Arc::new(AtomicUsize::new(0)));
        let summary = engine.step().unwrap();
        let population = engine.population();
        assert_eq!(population[0].program.to_hex(), summary.best_code);
        assert_eq!(population[0].fitness(Objective::MinimizeThroughput), summary.best);
        assert!(population[..3].iter().all(|i| i.born == 0));
        assert!(population[..3].iter().all(|i| i.evaluation.is_some()));
        assert!(population[3..].iter().all(|i| i.born == 1 && i.evaluation.is_none()));
    }

    #[test]
    fn test_tournament_with_certain_win_picks_best_of_subset() {
        let config = GeneticEngineConfig {
            tournament_selection_ratio: 1.0,
            tournament_selection_prob: 1.0,
            ..small_config()
        };
        let mut engine = engine(config, Arc::new(AtomicUsize::new(0)));
        engine.finalize().unwrap();
        let best = engine.ranked_indices()[0];
        for _ in 0..10 {
            assert_eq!(engine.tournament_select(), best);
        }
    }

    #[test]
    fn test_parallel_workers_match_single_worker() {
        let mut single = engine(small_config(), Arc::new(AtomicUsize::new(0)));
        let mut parallel = engine(
            GeneticEngineConfig {
                workers: 3,
                ..small_config()
            },
            Arc::new(AtomicUsize::new(0)),
        );
        single.run().unwrap();
        parallel.run().unwrap();
        let a: Vec<&Program> = single.population().iter().map(|i| &i.program).collect();
        let b: Vec<&Program> = parallel.population().iter().map(|i| &i.program).collect();
        assert_eq!(a, b);
        assert_eq!(single.history(), parallel.history());
    }

    #[test]
    fn test_selection_stream_differs_from_generator_stream() {
        let config = small_config();
        let seed = config.seed;
        let mut engine = engine(config, Arc::new(AtomicUsize::new(0)));
        let mut generator_stream = StdRng::seed_from_u64(seed);
        let selection: Vec<u64> = (0..4).map(|_| engine.rng.gen()).collect();
        let generator: Vec<u64> = (0..4).map(|_| generator_stream.gen()).collect();
        assert_ne!(selection, generator);
        assert_ne!(selection_seed(1), selection_seed(2));
    }

    #[test]
    fn test_requires_an_executor() {
        let result = GeneticEngine::new(
            small_config(),
            Arc::new(InstructionMetadata::default_table()),
            BenchmarkHarness::new(BenchmarkConfig::default()).unwrap(),
            ExecutionEnv::default(),
            Vec::new(),
        );
        assert!(matches!(result, Err(GasForgeError::ConfigError(_))));
    }
}
