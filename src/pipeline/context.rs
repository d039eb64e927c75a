//! Run-wide identity, paths and identifier source.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use super::stage::StageId;

/// State shared by graph construction and rendering for one run.
///
/// Owns the run identity, the root directory under which every stage gets
/// its own working directory, a monotonically increasing stage-id source,
/// and a seeded generator for experiment seeds.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    name: String,
    started_at: DateTime<Utc>,
    root_dir: PathBuf,
    next_stage_id: AtomicU64,
    rng: Mutex<ChaCha8Rng>,
}

impl RunContext {
    /// Creates a context with an entropy-seeded generator.
    pub fn new(root_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        let rng = ChaCha8Rng::from_rng(&mut rand::rng());
        Self::build(root_dir.into(), name.into(), rng)
    }

    /// Creates a context whose random seeds are reproducible.
    pub fn with_seed(root_dir: impl Into<PathBuf>, name: impl Into<String>, seed: u64) -> Self {
        Self::build(root_dir.into(), name.into(), ChaCha8Rng::seed_from_u64(seed))
    }

    fn build(root_dir: PathBuf, name: String, rng: ChaCha8Rng) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            name,
            started_at: Utc::now(),
            root_dir,
            next_stage_id: AtomicU64::new(0),
            rng: Mutex::new(rng),
        }
    }

    /// Unique identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Name of the sweep being run.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the context was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Root directory for all runs.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Directory of this sweep: `<root>/<name>`.
    pub fn run_dir(&self) -> PathBuf {
        self.root_dir.join(&self.name)
    }

    /// Working directory of a stage: `<root>/<name>/<stage>`.
    pub fn stage_dir(&self, stage_name: &str) -> PathBuf {
        self.run_dir().join(stage_name)
    }

    /// Hands out the next stage identifier.
    pub fn next_stage_id(&self) -> StageId {
        StageId::new(self.next_stage_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Draws a non-negative 63-bit seed for an experiment.
    pub fn random_seed(&self) -> i64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        (rng.random::<u64>() >> 1) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ids_increase() {
        let ctx = RunContext::new("/tmp/root", "sweep");
        let a = ctx.next_stage_id();
        let b = ctx.next_stage_id();
        assert!(b > a);
    }

    #[test]
    fn test_paths() {
        let ctx = RunContext::new("/tmp/root", "bnb");
        assert_eq!(ctx.run_dir(), PathBuf::from("/tmp/root/bnb"));
        assert_eq!(ctx.stage_dir("exp1"), PathBuf::from("/tmp/root/bnb/exp1"));
    }

    #[test]
    fn test_seeded_contexts_are_reproducible() {
        let a = RunContext::with_seed("/tmp", "x", 42);
        let b = RunContext::with_seed("/tmp", "x", 42);
        let seeds_a: Vec<i64> = (0..4).map(|_| a.random_seed()).collect();
        let seeds_b: Vec<i64> = (0..4).map(|_| b.random_seed()).collect();
        assert_eq!(seeds_a, seeds_b);
        assert!(seeds_a.iter().all(|s| *s >= 0));
        assert_ne!(a.run_id(), b.run_id());
    }
}
