//! Resource requests derived from experiment parameters.
//!
//! The working memory of a job is split between the external program's
//! runtime, an embedded optimization solver, and a model generator,
//! according to fixed fractions per program family. Thread counts get a
//! safety margin for the orchestration runtime, and wall-clock budgets are
//! padded relative to the program's own timeout.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::params::{ParamSet, ParamValue};

/// Working memory assumed when `work_mem_megs` is not set.
pub const DEFAULT_WORK_MEM_MEGS: i64 = 1536;

/// Memory held back from the solver for its own bookkeeping.
pub const SOLVER_OVERHEAD_MEGS: i64 = 1024;

/// Extra threads requested on top of the program's `threads` parameter.
pub const THREAD_SAFETY_MARGIN: u32 = 1;

/// Wall-clock budget when the experiment has no `timeoutSeconds`.
pub const DEFAULT_WALL_CLOCK_MINUTES: u64 = 60;

/// Fixed padding added to the doubled program timeout.
const WALL_CLOCK_PADDING_MINUTES: f64 = 10.0;

/// What a job asks of the execution substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Total memory for the job in megabytes.
    pub memory_megabytes: u64,
    /// Number of CPU threads.
    pub thread_count: u32,
    /// Wall-clock budget in minutes.
    pub wall_clock_minutes: u64,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            memory_megabytes: DEFAULT_WORK_MEM_MEGS as u64,
            thread_count: 1,
            wall_clock_minutes: DEFAULT_WALL_CLOCK_MINUTES,
        }
    }
}

/// How working memory is divided inside one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySplit {
    /// Heap given to the program runtime.
    pub runtime_megs: i64,
    /// Working memory handed to the optimization solver.
    pub solver_megs: i64,
    /// Memory reserved for the model generator (ILP parsers only).
    pub model_generator_megs: i64,
}

impl MemorySplit {
    /// Splits `total` for programs that drive an external solver.
    ///
    /// ILP parsers give half of the memory to the model generator; the
    /// remainder is halved between runtime and solver, and the solver
    /// share loses a fixed overhead.
    pub fn for_solver_program(total: i64, parser: &str) -> Self {
        let model_generator_megs = if parser.starts_with("ilp-") {
            (total as f64 * 0.5) as i64
        } else {
            0
        };
        let runtime_megs = ((total - model_generator_megs) as f64 * 0.5) as i64;
        let solver_megs = total - runtime_megs - model_generator_megs - SOLVER_OVERHEAD_MEGS;
        Self {
            runtime_megs,
            solver_megs,
            model_generator_megs,
        }
    }

    /// All memory goes to the program runtime.
    pub fn runtime_only(total: i64) -> Self {
        Self {
            runtime_megs: total,
            solver_megs: 0,
            model_generator_megs: 0,
        }
    }
}

/// Reads the total working memory in megabytes.
pub fn work_mem_megs(params: &ParamSet) -> Result<i64, ConfigurationError> {
    match params.get("work_mem_megs") {
        None => Ok(DEFAULT_WORK_MEM_MEGS),
        Some(value) => {
            let megs = value.as_f64().ok_or_else(|| invalid(
                "work_mem_megs",
                value,
                "expected a number of megabytes",
            ))?;
            if megs <= 0.0 {
                return Err(invalid("work_mem_megs", value, "must be positive"));
            }
            Ok(megs as i64)
        }
    }
}

/// Computes the thread request: the `threads` parameter plus a safety margin.
pub fn thread_count(params: &ParamSet) -> Result<u32, ConfigurationError> {
    match params.get("threads") {
        None => Ok(1),
        Some(value) => {
            let threads = value
                .as_i64()
                .filter(|t| *t >= 0 && *t <= i64::from(u32::MAX - THREAD_SAFETY_MARGIN))
                .ok_or_else(|| invalid("threads", value, "expected a non-negative integer"))?;
            Ok(threads as u32 + THREAD_SAFETY_MARGIN)
        }
    }
}

/// Computes the wall-clock budget: twice the program timeout plus padding.
pub fn wall_clock_minutes(params: &ParamSet) -> Result<u64, ConfigurationError> {
    match params.get("timeoutSeconds") {
        None => Ok(DEFAULT_WALL_CLOCK_MINUTES),
        Some(value) => {
            let seconds = value
                .as_f64()
                .filter(|s| *s >= 0.0)
                .ok_or_else(|| invalid("timeoutSeconds", value, "expected a non-negative number"))?;
            let minutes = (seconds / 60.0) * 2.0 + WALL_CLOCK_PADDING_MINUTES;
            Ok(minutes.ceil() as u64)
        }
    }
}

fn invalid(field: &str, value: &ParamValue, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_non_ilp_parser() {
        let split = MemorySplit::for_solver_program(4096, "cky");
        assert_eq!(split.model_generator_megs, 0);
        assert_eq!(split.runtime_megs, 2048);
        assert_eq!(split.solver_megs, 4096 - 2048 - 1024);
    }

    #[test]
    fn test_split_ilp_parser() {
        let split = MemorySplit::for_solver_program(8192, "ilp-corpus");
        assert_eq!(split.model_generator_megs, 4096);
        assert_eq!(split.runtime_megs, 2048);
        assert_eq!(split.solver_megs, 1024);
        assert!(
            split.model_generator_megs + split.runtime_megs + split.solver_megs <= 8192,
            "split must fit in the total"
        );
    }

    #[test]
    fn test_thread_margin() {
        let p = ParamSet::new().with("threads", 3);
        assert_eq!(thread_count(&p).expect("threads"), 4);
        assert_eq!(thread_count(&ParamSet::new()).expect("threads"), 1);
        assert!(thread_count(&ParamSet::new().with("threads", "many")).is_err());
    }

    #[test]
    fn test_wall_clock_from_timeout() {
        let p = ParamSet::new().with("timeoutSeconds", 8 * 60 * 60);
        assert_eq!(wall_clock_minutes(&p).expect("minutes"), 8 * 60 * 2 + 10);
        assert_eq!(
            wall_clock_minutes(&ParamSet::new()).expect("minutes"),
            DEFAULT_WALL_CLOCK_MINUTES
        );
    }

    #[test]
    fn test_work_mem_accepts_float() {
        let p = ParamSet::new().with("work_mem_megs", 1.5 * 1024.0);
        assert_eq!(work_mem_megs(&p).expect("megs"), 1536);
        assert!(work_mem_megs(&ParamSet::new().with("work_mem_megs", -1)).is_err());
    }
}
