//! Log scraping: from raw program output to structured records.
//!
//! A [`ScrapeFamily`] declares what to look for:
//!
//! - **Status** families select lines containing a literal marker and read
//!   positional `key=value` elements in declared order, typing each value.
//!   High-volume families carry a [`DownsamplePolicy`].
//! - **Correlated** families pair two independently logged sequences by
//!   position and check that their timestamps stay within a tolerance.
//!
//! Every extracted event is merged onto the parameters of the experiment
//! that produced it, yielding a [`Record`]. Malformed lines are fatal for
//! the scrape pass; they never get skipped silently.
//!
//! # Example
//!
//! ```
//! use sweep_forge::params::ParamSet;
//! use sweep_forge::scrape::ScrapeEngine;
//!
//! let engine = ScrapeEngine::for_family("curnode").unwrap();
//! let line = "42 CurrentNode: id=1, depth=0, side=0, upperBound=-3.5, \
//!             relaxStatus=Optimal, incumbentScore=-4.0, avgNodeTime=2.0";
//! let records = engine.scrape(line, &ParamSet::new().with("dataset", "wsj")).unwrap();
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].time_ms(), Some(42));
//! ```

pub mod downsample;
pub mod engine;
pub mod job;
pub mod record;
pub mod rules;

pub use downsample::downsample;
pub use engine::ScrapeEngine;
pub use job::{find_stage_dirs, load_params, scrape_dir, scrape_dirs, ScrapeInput, ScrapeJob};
pub use record::{Record, TIME_KEY};
pub use rules::{
    CorrelatedRule, DownsamplePolicy, FieldKind, FieldSpec, ScrapeFamily, SeriesRule, StatusRule,
};
