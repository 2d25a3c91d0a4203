//! Chains of one run, their lifecycle, and the lazily built draw array.
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use ndarray::ArrayD;
use rayon::prelude::*;

use crate::columns::ColumnIndex;
use crate::config::Context;
use crate::diagnostics::{diagnose, DiagnosticReport};
use crate::draws::{parse_draws, ChainDraws, DrawArray};
use crate::error::{Error, Result};
use crate::header::{parse_header, Header};
use crate::summary::{summarize, Summary};
use crate::validate::{validate, ChainRecord};

/// Lifecycle of a chain, driven by whoever supervises the sampler
/// processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ChainState {
    fn can_move_to(self, next: ChainState) -> bool {
        use ChainState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Completed, _) => false,
            (Pending, Running) | (Pending, Failed) => true,
            (Running, Completed) | (Running, Failed) => true,
            // a supervisor may relaunch a failed chain
            (Failed, Pending) | (Failed, Running) => true,
            _ => false,
        }
    }
}

/// One chain's output file and state.
#[derive(Debug, Clone)]
pub struct Chain {
    id: usize,
    path: PathBuf,
    state: ChainState,
}

impl Chain {
    /// Position of the chain in the run, starting at 0.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Output file of the chain.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChainState {
        self.state
    }

    fn open(&self) -> Result<BufReader<File>> {
        File::open(&self.path)
            .map(BufReader::new)
            .map_err(|source| Error::Io {
                chain: self.id,
                path: self.path.clone(),
                source,
            })
    }

    /// Parses the header, then every data row.
    fn read(&self, ctx: &Context) -> Result<(Header, ChainDraws)> {
        let header = parse_header(self.id, self.open()?, ctx)?;
        let draws = parse_draws(self.id, self.open()?, &header, ctx)?;
        debug!(
            "chain {}: parsed {} rows from {}",
            self.id,
            draws.rows,
            self.path.display()
        );
        Ok((header, draws))
    }
}

enum CacheState {
    Empty,
    Building,
    Ready(Arc<DrawArray>),
}

struct Slot {
    state: CacheState,
    /// Builds started so far; the running build has this number.
    builds: u64,
    /// Error of the last failed build, with its number.
    failure: Option<(u64, Error)>,
}

/// Build-once slot for the draw array.  Concurrent first callers wait
/// for the one build in progress and share its outcome.  A failed build
/// leaves the slot empty, so the next new caller builds again.
pub struct DrawCache {
    slot: Mutex<Slot>,
    changed: Condvar,
}

/// Resets a `Building` slot to `Empty` if the build panics.
struct BuildGuard<'a> {
    cache: &'a DrawCache,
    done: bool,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.lock().state = CacheState::Empty;
            self.cache.changed.notify_all();
        }
    }
}

impl Default for DrawCache {
    fn default() -> Self {
        DrawCache {
            slot: Mutex::new(Slot {
                state: CacheState::Empty,
                builds: 0,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }
}

impl DrawCache {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, slot: MutexGuard<'a, Slot>) -> MutexGuard<'a, Slot> {
        self.changed.wait(slot).unwrap_or_else(|e| e.into_inner())
    }

    /// The cached array, if a build has finished.
    pub fn get(&self) -> Option<Arc<DrawArray>> {
        match &self.lock().state {
            CacheState::Ready(array) => Some(array.clone()),
            _ => None,
        }
    }

    /// True when an array is cached.
    pub fn is_ready(&self) -> bool {
        self.get().is_some()
    }

    /// Returns the cached array, running `build` only when nothing is
    /// cached and no other caller is already building.  Callers that
    /// wait on a build which fails receive a copy of its error.
    pub fn get_or_build<F>(&self, build: F) -> Result<Arc<DrawArray>>
    where
        F: FnOnce() -> Result<DrawArray>,
    {
        let mut slot = self.lock();
        if let CacheState::Building = slot.state {
            let awaited = slot.builds;
            while matches!(slot.state, CacheState::Building) && slot.builds == awaited {
                slot = self.wait(slot);
            }
            if let Some((number, error)) = &slot.failure {
                if *number == awaited {
                    return Err(error.clone());
                }
            }
            // a newer build may have started meanwhile
            while let CacheState::Building = slot.state {
                slot = self.wait(slot);
            }
        }
        if let CacheState::Ready(array) = &slot.state {
            return Ok(array.clone());
        }
        slot.state = CacheState::Building;
        slot.builds += 1;
        let number = slot.builds;
        drop(slot);

        let mut guard = BuildGuard {
            cache: self,
            done: false,
        };
        let outcome = build();
        let mut slot = self.lock();
        guard.done = true;
        let result = match outcome {
            Ok(array) => {
                let array = Arc::new(array);
                slot.state = CacheState::Ready(array.clone());
                slot.failure = None;
                Ok(array)
            }
            Err(error) => {
                slot.state = CacheState::Empty;
                slot.failure = Some((number, error.clone()));
                Err(error)
            }
        };
        drop(slot);
        self.changed.notify_all();
        result
    }

    /// Drops a ready array so the next access parses the chains again.
    pub fn invalidate(&self) {
        let mut slot = self.lock();
        if let CacheState::Ready(_) = slot.state {
            slot.state = CacheState::Empty;
        }
    }
}

/// A set of chains sampled from the same model.
pub struct Run {
    ctx: Context,
    chains: Vec<Chain>,
    elapsed: Option<Duration>,
    cache: DrawCache,
}

impl Run {
    /// Declares a run over the given chain files; every chain starts
    /// out `Pending`.
    pub fn new<I, P>(paths: I, ctx: Context) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let chains = paths
            .into_iter()
            .enumerate()
            .map(|(id, path)| Chain {
                id,
                path: path.into(),
                state: ChainState::Pending,
            })
            .collect();
        Run {
            ctx,
            chains,
            elapsed: None,
            cache: DrawCache::default(),
        }
    }

    /// Declares a run over chain files that are already complete.
    pub fn from_completed<I, P>(paths: I, ctx: Context) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut run = Run::new(paths, ctx);
        for chain in run.chains.iter_mut() {
            chain.state = ChainState::Completed;
        }
        run
    }

    /// Settings every stage of this run reads.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// All chains, ordered by id.
    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    /// Chain `id`, if the run has one.
    pub fn chain(&self, id: usize) -> Option<&Chain> {
        self.chains.get(id)
    }

    /// Moves chain `id` to `state`.  A `Completed` chain never moves
    /// again; a `Failed` one may be relaunched.
    pub fn set_chain_state(&mut self, id: usize, state: ChainState) -> Result<()> {
        let chain = self
            .chains
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("chain {}", id)))?;
        if !chain.state.can_move_to(state) {
            return Err(Error::InvalidTransition {
                chain: id,
                from: chain.state,
                to: state,
            });
        }
        chain.state = state;
        Ok(())
    }

    /// Wall-clock time of the run, as measured by the supervisor.
    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = Some(elapsed);
    }

    /// Elapsed time set with [`Run::set_elapsed`], if any.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// The `(draw, chain, column)` array, parsed on first access.
    pub fn draws(&self) -> Result<Arc<DrawArray>> {
        self.cache.get_or_build(|| self.build())
    }

    /// True once the draw array has been built and not invalidated.
    pub fn is_built(&self) -> bool {
        self.cache.is_ready()
    }

    /// Forgets the parsed array; the next access reads the files again.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Parameter to column mapping of the run's schema.
    pub fn column_index(&self) -> Result<ColumnIndex> {
        Ok(self.draws()?.index().clone())
    }

    /// Parameter `name` shaped as `[draws, chains, extents...]`.
    pub fn variable(&self, name: &str) -> Result<ArrayD<f64>> {
        self.draws()?.variable(name)
    }

    /// Summary statistics for the named columns or parameters, or for
    /// every column when `columns` is `None`.
    pub fn summary(&self, columns: Option<&[&str]>) -> Result<Summary> {
        let draws = self.draws()?;
        summarize(&draws, columns, self.elapsed, &self.ctx)
    }

    /// Runs the sampler and convergence checks; see [`diagnose`].
    pub fn diagnose(&self) -> Result<DiagnosticReport> {
        let draws = self.draws()?;
        Ok(diagnose(&draws, &self.ctx))
    }

    fn build(&self) -> Result<DrawArray> {
        if self.chains.is_empty() {
            return Err(Error::IncompleteRun {
                chain: 0,
                message: "run has no chains".to_string(),
            });
        }
        if let Some(chain) = self
            .chains
            .iter()
            .find(|c| c.state != ChainState::Completed)
        {
            return Err(Error::IncompleteRun {
                chain: chain.id,
                message: format!("chain is {:?}, not Completed", chain.state),
            });
        }

        let parsed: Vec<(Header, ChainDraws)> = self
            .chains
            .par_iter()
            .map(|chain| chain.read(&self.ctx))
            .collect::<Result<_>>()?;

        let records: Vec<ChainRecord> = self
            .chains
            .iter()
            .zip(parsed.iter())
            .map(|(chain, (header, draws))| ChainRecord {
                chain: chain.id,
                schema: &header.schema,
                config: &header.config,
                rows: draws.rows,
            })
            .collect();
        validate(&records)?;

        let mut configs = Vec::with_capacity(self.chains.len());
        let mut blocks = Vec::with_capacity(self.chains.len());
        let mut index = None;
        for (header, draws) in parsed {
            index.get_or_insert(header.index);
            configs.push(header.config);
            blocks.push(draws.draws);
        }
        let index = index.ok_or_else(|| Error::IncompleteRun {
            chain: 0,
            message: "run has no chains".to_string(),
        })?;

        let array = DrawArray::from_chains(index, configs, &blocks)?;
        let (d, c, k) = array.shape();
        info!(
            "built draw array: {} draws x {} chains x {} columns",
            d, c, k
        );
        Ok(array)
    }
}
