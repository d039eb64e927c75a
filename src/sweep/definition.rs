//! YAML sweep definitions.
//!
//! ```yaml
//! name: bnb-wsj
//! program: { type: dependency_parser }
//! seed_key: seed
//! base:
//!   dataset: wsj200
//!   train: { value: /data/wsj/02, name: false }
//! axes:
//!   - - { relaxation: dw }
//!     - { relaxation: lp }
//!   - - { varSelection: regret }
//!     - { varSelection: pseudocost }
//! fast_overrides:
//!   iterations: 1
//! fast_limit: 4
//! scrape:
//!   - { family: bnb, output: bnb.data, columns: [dataset, relaxation] }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ScrapeError, SweepError};
use crate::experiment::ProgramKind;
use crate::params::{ParamSet, ParamValue};
use crate::scrape::ScrapeFamily;

/// One fragment value: plain, or with explicit serialization flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FragmentEntry {
    Flagged {
        value: ParamValue,
        #[serde(default = "default_true")]
        name: bool,
        #[serde(default = "default_true")]
        args: bool,
    },
    Plain(ParamValue),
}

fn default_true() -> bool {
    true
}

/// An ordered mapping of parameters; one orthogonal experimental axis value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    entries: Vec<(String, FragmentEntry)>,
}

impl Fragment {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_params(&self) -> ParamSet {
        let mut params = ParamSet::new();
        for (key, entry) in &self.entries {
            match entry {
                FragmentEntry::Plain(value) => {
                    params.set(key.clone(), value.clone(), true, true);
                }
                FragmentEntry::Flagged { value, name, args } => {
                    params.set(key.clone(), value.clone(), *name, *args);
                }
            }
        }
        params
    }
}

impl TryFrom<serde_yaml::Mapping> for Fragment {
    type Error = String;

    fn try_from(mapping: serde_yaml::Mapping) -> Result<Self, Self::Error> {
        let mut entries = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let key = match key {
                serde_yaml::Value::String(s) => s,
                other => return Err(format!("parameter names must be strings, got {:?}", other)),
            };
            if value.is_null() {
                return Err(format!("parameter '{}' has no value", key));
            }
            let entry: FragmentEntry = serde_yaml::from_value(value)
                .map_err(|e| format!("parameter '{}': {}", key, e))?;
            entries.push((key, entry));
        }
        Ok(Self { entries })
    }
}

impl<'de> Deserialize<'de> for Fragment {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
        Fragment::try_from(mapping).map_err(serde::de::Error::custom)
    }
}

/// A scrape family: built-in by name, or declared inline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FamilyRef {
    Builtin(String),
    Custom(ScrapeFamily),
}

impl FamilyRef {
    pub fn resolve(&self) -> Result<ScrapeFamily, ScrapeError> {
        match self {
            FamilyRef::Builtin(name) => ScrapeFamily::from_name(name),
            FamilyRef::Custom(family) => Ok(family.clone()),
        }
    }
}

/// An aggregation stage run after the experiments it reads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScrapeSpec {
    /// Stage name; defaults to `scrape-<family>`.
    #[serde(default)]
    pub name: Option<String>,
    pub family: FamilyRef,
    pub output: PathBuf,
    /// Leading result columns.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Only experiments whose parameters contain all of these are scraped.
    /// Empty selects every experiment.
    #[serde(default, rename = "where")]
    pub filter: Fragment,
}

/// A complete sweep: program, fragments, and aggregation.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepDefinition {
    pub name: String,
    pub program: ProgramKind,
    #[serde(default)]
    pub base: Fragment,
    /// Each axis lists alternative fragments; experiments are their product.
    #[serde(default)]
    pub axes: Vec<Vec<Fragment>>,
    /// Merged onto every experiment in fast mode.
    #[serde(default)]
    pub fast_overrides: Fragment,
    /// Experiments kept in fast mode.
    #[serde(default)]
    pub fast_limit: Option<usize>,
    /// When set, experiments without this key get a fresh random seed
    /// under it (passed as argument, kept out of the name).
    #[serde(default)]
    pub seed_key: Option<String>,
    /// Retry budget of the experiment stages.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub scrape: Vec<ScrapeSpec>,
}

impl SweepDefinition {
    /// Parses a definition; `origin` names the source in errors.
    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self, SweepError> {
        let definition: Self = serde_yaml::from_str(text).map_err(|e| SweepError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        definition.validate()?;
        Ok(definition)
    }

    /// Reads and parses a definition file.
    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let text = std::fs::read_to_string(path).map_err(|source| SweepError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text, &path.display().to_string())
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if self.name.trim().is_empty() {
            return Err(SweepError::InvalidParameter {
                key: "name".to_string(),
                reason: "sweep name must not be empty".to_string(),
            });
        }
        if self.axes.iter().any(|axis| axis.is_empty()) {
            return Err(SweepError::EmptyAxis(self.name.clone()));
        }
        for spec in &self.scrape {
            spec.family.resolve()?;
        }
        Ok(())
    }
}
