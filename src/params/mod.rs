//! Experiment parameter model.
//!
//! A [`ParamSet`] is an ordered mapping from parameter name to a typed
//! [`ParamValue`], with per-key [`ParamFlags`] deciding whether the key is
//! part of the experiment's name, its argument list, both, or neither.
//!
//! Sweeps are built by merging small reusable fragments, ordered from the
//! most general default to the most specific override:
//!
//! ```rust
//! use sweep_forge::params::ParamSet;
//!
//! let defaults = ParamSet::new().with("iterations", 1000).with("parser", "cky");
//! let relax = ParamSet::new().with("relaxation", "rlt");
//! let exp = &(&defaults + &relax) + &ParamSet::new().with("parser", "relaxed");
//!
//! assert_eq!(exp.get_str("parser"), Some("relaxed"));
//! assert_eq!(defaults.get_str("parser"), Some("cky"));
//! ```

pub mod set;
pub mod value;

pub use set::{ParamEntry, ParamFlags, ParamSet};
pub use value::ParamValue;
