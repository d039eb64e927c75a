//! Declarative extraction rules and the built-in families.

use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// Positional `key=value` element of a status line.
pub const ELEMENT_PATTERN: &str = r"([^\s=,]+)=([^,\s]+)";

/// Leading millisecond timestamp written by the program's logger.
pub const TIME_PATTERN: &str = r"^(\d+)\s";

/// Default cap on records kept from a downsampled family.
pub const DEFAULT_MAX_SAMPLES: usize = 500;

/// Default stride of the coarse overlay sample.
pub const DEFAULT_OVERLAY_STRIDE: usize = 1000;

/// Default tolerance between two correlated timestamps.
pub const DEFAULT_TOLERANCE_MS: i64 = 3000;

/// Declared type of an extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Int,
    Float,
    Str,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Int => "integer",
            FieldKind::Float => "float",
            FieldKind::Str => "string",
        }
    }
}

/// Name and type of one extracted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Int,
        }
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Float,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Str,
        }
    }
}

/// Bounds the number of records of a high-volume family.
///
/// When a family has more than `max_samples` records, one in every
/// `count / max_samples` is kept. Every `overlay_stride`-th record is
/// always kept as well and prepended to the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsamplePolicy {
    pub max_samples: usize,
    pub overlay_stride: usize,
}

impl Default for DownsamplePolicy {
    fn default() -> Self {
        Self {
            max_samples: DEFAULT_MAX_SAMPLES,
            overlay_stride: DEFAULT_OVERLAY_STRIDE,
        }
    }
}

/// Lines containing `marker`, each carrying positional `key=value`
/// elements read in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRule {
    pub marker: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub downsample: Option<DownsamplePolicy>,
}

/// One side of a correlated pair: a pattern whose first group is the
/// timestamp and whose second group is the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRule {
    pub pattern: String,
    pub field: FieldSpec,
}

/// Two sequences of lines emitted in lockstep.
///
/// Entries are paired by position; the counts must match and the paired
/// timestamps must be closer than `tolerance_ms`. Records take the left
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatedRule {
    pub left: SeriesRule,
    pub right: SeriesRule,
    #[serde(default = "default_tolerance")]
    pub tolerance_ms: i64,
}

fn default_tolerance() -> i64 {
    DEFAULT_TOLERANCE_MS
}

/// A named extraction family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScrapeFamily {
    Status { name: String, rule: StatusRule },
    Correlated { name: String, rule: CorrelatedRule },
}

impl ScrapeFamily {
    pub fn name(&self) -> &str {
        match self {
            ScrapeFamily::Status { name, .. } | ScrapeFamily::Correlated { name, .. } => name,
        }
    }

    /// Branch-and-bound solver summaries, downsampled.
    pub fn bnb() -> Self {
        ScrapeFamily::Status {
            name: "bnb".to_string(),
            rule: StatusRule {
                marker: "LazyBranchAndBoundSolver - Summary: ".to_string(),
                fields: vec![
                    FieldSpec::float("upBound"),
                    FieldSpec::float("lowBound"),
                    FieldSpec::float("relativeDiff"),
                    FieldSpec::int("numLeaves"),
                    FieldSpec::int("numFathom"),
                    FieldSpec::int("numPrune"),
                    FieldSpec::int("numInfeasible"),
                    FieldSpec::float("avgFathomDepth"),
                    FieldSpec::int("numSeen"),
                ],
                downsample: Some(DownsamplePolicy::default()),
            },
        }
    }

    /// Per-node progress of the branch-and-bound search.
    pub fn curnode() -> Self {
        ScrapeFamily::Status {
            name: "curnode".to_string(),
            rule: StatusRule {
                marker: "CurrentNode: ".to_string(),
                fields: vec![
                    FieldSpec::int("id"),
                    FieldSpec::int("depth"),
                    FieldSpec::int("side"),
                    FieldSpec::float("upperBound"),
                    FieldSpec::string("relaxStatus"),
                    FieldSpec::string("incumbentScore"),
                    FieldSpec::float("avgNodeTime"),
                ],
                downsample: None,
            },
        }
    }

    /// Incumbent log-likelihood and accuracy, logged as separate lines.
    pub fn incumbent() -> Self {
        ScrapeFamily::Correlated {
            name: "incumbent".to_string(),
            rule: CorrelatedRule {
                left: SeriesRule {
                    pattern: r"(\d+).*Incumbent logLikelihood: (.*)".to_string(),
                    field: FieldSpec::float("incumbentLogLikelihood"),
                },
                right: SeriesRule {
                    pattern: r"(\d+).*Incumbent accuracy: (.*)".to_string(),
                    field: FieldSpec::float("incumbentAccuracy"),
                },
                tolerance_ms: DEFAULT_TOLERANCE_MS,
            },
        }
    }

    /// Looks up a built-in family by name.
    pub fn from_name(name: &str) -> Result<Self, ScrapeError> {
        match name {
            "bnb" => Ok(Self::bnb()),
            "curnode" => Ok(Self::curnode()),
            "incumbent" => Ok(Self::incumbent()),
            other => Err(ScrapeError::UnknownFamily(other.to_string())),
        }
    }

    /// Names of the built-in families.
    pub fn builtin_names() -> &'static [&'static str] {
        &["bnb", "curnode", "incumbent"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        for name in ScrapeFamily::builtin_names() {
            let family = ScrapeFamily::from_name(name).expect("builtin");
            assert_eq!(family.name(), *name);
        }
        assert!(matches!(
            ScrapeFamily::from_name("status"),
            Err(ScrapeError::UnknownFamily(_))
        ));
    }

    #[test]
    fn test_bnb_is_downsampled() {
        match ScrapeFamily::bnb() {
            ScrapeFamily::Status { rule, .. } => {
                assert_eq!(rule.fields.len(), 9);
                assert_eq!(rule.downsample, Some(DownsamplePolicy::default()));
            }
            other => panic!("unexpected family {:?}", other),
        }
    }

    #[test]
    fn test_family_from_yaml() {
        let yaml = r#"
type: status
name: progress
rule:
  marker: "Progress: "
  fields:
    - { name: step, kind: int }
    - { name: loss, kind: float }
"#;
        let family: ScrapeFamily = serde_yaml::from_str(yaml).expect("yaml");
        assert_eq!(family.name(), "progress");
    }
}
