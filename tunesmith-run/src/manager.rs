//! The tuning manager: generation loop, worker population, shutdown
//!
//! One coarse lock guards everything the outside world can race on:
//! the live worker lists and the match-server handle. The generation
//! loop and the signal-driven shutdown path both take it, so no two
//! lifecycle transitions interleave. The only waits outside the lock
//! are the generation sleep and the probe poll interval, which is what
//! lets a shutdown request land during them.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use tunesmith_core::{
    generate, normal_vector, random_vector, CandidateVector, ProbeOutcome, RunConfig, Score,
    ScoreGrid,
};

use crate::server::MatchServer;
use crate::worker::{Worker, WorkerError, WorkerKind};

/// Shared mutable run context. Mutated only under the manager's lock.
struct RunState {
    server: MatchServer,
    baseline: Vec<Worker>,
    candidates: Vec<Worker>,
    stopped: bool,
}

/// Drives a whole tuning run: match server, worker populations, score
/// aggregation and candidate generation.
pub struct TuningManager {
    config: Arc<RunConfig>,
    seed: Option<u64>,
    state: Mutex<RunState>,
}

impl TuningManager {
    pub fn new(config: RunConfig, seed: Option<u64>) -> Self {
        let server = MatchServer::new(&config);
        TuningManager {
            config: Arc::new(config),
            seed,
            state: Mutex::new(RunState {
                server,
                baseline: Vec::new(),
                candidates: Vec::new(),
                stopped: false,
            }),
        }
    }

    fn create_rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn worker(&self, name: String, kind: WorkerKind, vector: CandidateVector) -> Worker {
        Worker::new(name, kind, vector, self.config.clone())
    }

    async fn ensure_work_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create work directory {}",
                    self.config.work_dir.display()
                )
            })
    }

    // ========================================================================
    // Evolutionary variant
    // ========================================================================

    /// Run the evolutionary search until shutdown.
    pub async fn run_evolution(&self) -> Result<()> {
        self.config.validate_bounded()?;
        let result = self.evolution_loop().await;
        self.shutdown().await;
        result
    }

    async fn evolution_loop(&self) -> Result<()> {
        let mut rng = self.create_rng();
        let mut grid = ScoreGrid::new(&self.config.params)?;
        self.ensure_work_dir().await?;

        {
            let mut st = self.state.lock().await;
            st.server
                .setup()
                .await
                .context("match server unavailable, no tuning run is possible")?;

            let mut workers = Vec::with_capacity(self.config.concurrency * 2);
            for i in 0..self.config.concurrency {
                workers.push(self.worker(
                    format!("base-{i}"),
                    WorkerKind::Baseline,
                    normal_vector(&self.config.params),
                ));
            }
            for i in 0..self.config.concurrency {
                workers.push(self.worker(
                    format!("cand-{i}"),
                    WorkerKind::Candidate,
                    random_vector(&self.config.params, &mut rng),
                ));
            }

            let (workers, started, first_err) = self.launch(workers).await;
            if let Some(err) = first_err {
                tracing::error!(error = %err, "worker failed during initial launch");
            }
            if started == 0 {
                bail!("no worker could be set up, aborting run");
            }
            (st.baseline, st.candidates) = partition(workers);
        }

        for generation in 1u64.. {
            {
                let st = self.state.lock().await;
                if st.stopped {
                    break;
                }
                tracing::info!(generation, "generation start");
                for worker in &st.candidates {
                    tracing::info!(worker = worker.name(), vector = %worker.vector(), "candidate");
                }
            }

            tokio::time::sleep(self.config.generation_duration()).await;

            let mut st = self.state.lock().await;
            if st.stopped {
                break;
            }
            self.advance_generation(&mut st, &mut grid, &mut rng)
                .await?;
        }

        Ok(())
    }

    /// One generation advance: score, fold, derive the next population,
    /// retire the old one, launch the new one.
    async fn advance_generation(
        &self,
        st: &mut RunState,
        grid: &mut ScoreGrid,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        let mut total = Score::default();
        for worker in &mut st.candidates {
            match worker.score().await {
                Ok(score) => {
                    tracing::info!(
                        worker = worker.name(),
                        wins = score.wins,
                        losses = score.losses,
                        "score"
                    );
                    worker.last_score = score;
                    total.add(&score);
                }
                Err(err) => {
                    tracing::warn!(worker = worker.name(), error = %err, "counting as zero");
                    worker.last_score = Score::default();
                }
            }
        }
        tracing::info!(
            wins = total.wins,
            losses = total.losses,
            rate = total.rate(),
            "generation total"
        );

        grid.decay();
        for worker in &st.candidates {
            grid.fold(worker.vector(), &worker.last_score);
        }

        let rewards = grid.evaluate(rng);
        let (best, rates) = rewards.best_values();
        tracing::info!(best = %best, rates = ?rates, "best values");

        // next generation is derived before the old one is torn down,
        // so the best-vector computation is independent of teardown
        // timing
        let vectors = generate::next_population(&rewards, self.config.concurrency, rng);
        let mut workers = Vec::with_capacity(self.config.concurrency * 2);
        for (i, vector) in vectors.into_iter().enumerate() {
            workers.push(self.worker(format!("cand-{i}"), WorkerKind::Candidate, vector));
        }
        for i in 0..self.config.concurrency {
            workers.push(self.worker(
                format!("base-{i}"),
                WorkerKind::Baseline,
                normal_vector(&self.config.params),
            ));
        }

        let retired: Vec<Worker> = st
            .candidates
            .drain(..)
            .chain(st.baseline.drain(..))
            .collect();
        stop_and_cleanup(retired).await;

        let (workers, started, first_err) = self.launch(workers).await;
        if let Some(err) = first_err {
            tracing::error!(error = %err, "worker failed during generation launch");
        }
        if started == 0 {
            bail!("no worker could be set up for the next generation, aborting run");
        }
        (st.baseline, st.candidates) = partition(workers);

        Ok(())
    }

    // ========================================================================
    // Coordinate-ascent variant
    // ========================================================================

    /// Run the coordinate-ascent search until shutdown, probing one
    /// param at a time, round-robin over all params.
    pub async fn run_ascent(&self) -> Result<()> {
        self.config.validate()?;
        let result = self.ascent_loop().await;
        self.shutdown().await;
        result
    }

    async fn ascent_loop(&self) -> Result<()> {
        self.ensure_work_dir().await?;
        {
            let mut st = self.state.lock().await;
            st.server
                .setup()
                .await
                .context("match server unavailable, no tuning run is possible")?;
        }

        let params = &self.config.params;
        let mut current = normal_vector(params);
        let mut target = 0usize;

        'probe: loop {
            let param = &params[target];
            let (low, high) = generate::probe_values(param, current.get(target));
            let low_vec = current.with_value(target, low);
            let high_vec = current.with_value(target, high);
            tracing::info!(
                param = %param.name,
                current = current.get(target),
                low,
                high,
                "probing parameter"
            );

            {
                let mut st = self.state.lock().await;
                if st.stopped {
                    break 'probe;
                }

                let mut workers = Vec::with_capacity(self.config.concurrency * 2);
                for i in 0..self.config.concurrency {
                    workers.push(self.worker(
                        format!("base-{i}"),
                        WorkerKind::Baseline,
                        current.clone(),
                    ));
                }
                let half = self.config.concurrency / 2;
                for i in 0..self.config.concurrency {
                    let vector = if i < half {
                        low_vec.clone()
                    } else {
                        high_vec.clone()
                    };
                    workers.push(self.worker(format!("cand-{i}"), WorkerKind::Candidate, vector));
                }

                let (workers, started, first_err) = self.launch(workers).await;
                if let Some(err) = first_err {
                    tracing::error!(error = %err, "worker failed during probe launch");
                }
                if started == 0 {
                    bail!("no worker could be set up, aborting run");
                }
                (st.baseline, st.candidates) = partition(workers);
            }

            // poll until both probe halves have played enough games
            let mut decided = None;
            loop {
                tokio::time::sleep(self.config.poll_interval()).await;

                let st = self.state.lock().await;
                if st.stopped {
                    break;
                }
                let (low_score, high_score) = poll_halves(&st.candidates, &low_vec).await;
                tracing::debug!(
                    low_games = low_score.games(),
                    high_games = high_score.games(),
                    "probe progress"
                );
                if low_score.games() >= self.config.min_probe_games
                    && high_score.games() >= self.config.min_probe_games
                {
                    decided = Some((low_score, high_score));
                    break;
                }
            }

            {
                let mut st = self.state.lock().await;
                let mut retired: Vec<Worker> = st.candidates.drain(..).collect();
                retired.extend(st.baseline.drain(..));
                stop_and_cleanup(retired).await;
            }

            let Some((low_score, high_score)) = decided else {
                break 'probe;
            };
            tracing::info!(
                param = %param.name,
                low_rate = low_score.rate(),
                high_rate = high_score.rate(),
                "probe scores"
            );

            match generate::probe_outcome(low, high, low_score.rate(), high_score.rate()) {
                ProbeOutcome::Keep => {
                    tracing::info!(param = %param.name, value = current.get(target), "parameter unchanged");
                }
                ProbeOutcome::Move(value) => {
                    tracing::info!(param = %param.name, value, "parameter updated");
                    current = current.with_value(target, value);
                }
            }
            tracing::info!(values = %current, "current vector");

            target = (target + 1) % params.len();
        }

        Ok(())
    }

    // ========================================================================
    // Shared lifecycle machinery
    // ========================================================================

    /// Set up and start a population, one task per worker, all joined.
    ///
    /// Failures are independent: a worker that did not come up stays in
    /// the list (its score reads as unavailable, stop is a no-op) and
    /// never cancels a sibling. Returns the workers, how many actually
    /// started, and the first error observed.
    async fn launch(&self, workers: Vec<Worker>) -> (Vec<Worker>, usize, Option<WorkerError>) {
        let mut tasks = JoinSet::new();
        for mut worker in workers {
            tasks.spawn(async move {
                let result = match worker.setup().await {
                    Ok(()) => worker.start(),
                    Err(err) => Err(err),
                };
                (worker, result)
            });
        }

        let mut out = Vec::new();
        let mut started = 0usize;
        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((worker, Ok(()))) => {
                    started += 1;
                    out.push(worker);
                }
                Ok((worker, Err(err))) => {
                    tracing::error!(worker = worker.name(), error = %err, "worker failed to come up");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                    out.push(worker);
                }
                Err(err) => tracing::error!(error = %err, "worker task panicked"),
            }
        }
        (out, started, first_err)
    }

    /// Stop every live worker and the match server. Safe to call from
    /// the signal task at any point; stop and cleanup are idempotent so
    /// racing the generation loop's own teardown is harmless.
    pub async fn shutdown(&self) {
        let mut st = self.state.lock().await;
        st.stopped = true;

        let mut workers: Vec<Worker> = st.candidates.drain(..).collect();
        workers.extend(st.baseline.drain(..));
        if !workers.is_empty() {
            tracing::info!(count = workers.len(), "stopping workers");
        }
        stop_and_cleanup(workers).await;
        st.server.stop().await;
    }
}

/// Kill all workers in parallel, join, then remove their directories.
/// The kill barrier must pass before any cleanup runs.
async fn stop_and_cleanup(workers: Vec<Worker>) {
    let mut tasks = JoinSet::new();
    for mut worker in workers {
        tasks.spawn(async move {
            if let Err(err) = worker.stop().await {
                tracing::warn!(worker = worker.name(), error = %err, "failed to stop worker");
            }
            worker
        });
    }

    let mut stopped = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(worker) = joined {
            stopped.push(worker);
        }
    }
    for worker in &stopped {
        worker.cleanup().await;
    }
}

/// Sum the probe candidates' scores per half. Workers without a log
/// yet contribute zero.
async fn poll_halves(candidates: &[Worker], low_vec: &CandidateVector) -> (Score, Score) {
    let mut low = Score::default();
    let mut high = Score::default();
    for worker in candidates {
        let score = match worker.score().await {
            Ok(score) => score,
            Err(_) => continue,
        };
        if worker.vector() == low_vec {
            low.add(&score);
        } else {
            high.add(&score);
        }
    }
    (low, high)
}

fn partition(workers: Vec<Worker>) -> (Vec<Worker>, Vec<Worker>) {
    workers
        .into_iter()
        .partition(|w| w.kind() == WorkerKind::Baseline)
}
