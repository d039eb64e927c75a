//! Launchable experiments: a parameter set plus a program kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigurationError;
use crate::params::{ParamSet, ParamValue};

use super::resources::{self, MemorySplit, ResourceRequest};

/// Names longer than this are truncated and suffixed with a digest.
pub const MAX_NAME_LEN: usize = 180;

/// Hex characters of the digest kept in truncated names.
const NAME_DIGEST_LEN: usize = 12;

const DEPENDENCY_PARSER_MAIN: &str = "edu.jhu.train.dmv.DepParserRunner";
const CKY_PARSER_MAIN: &str = "edu.jhu.parse.cky.RunCkyParser";

/// Profiler attached to a profiled dependency-parser run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileMode {
    CpuSamples,
    HeapSites,
}

impl ProfileMode {
    /// Value recorded under the `hprof` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileMode::CpuSamples => "cpu-samples",
            ProfileMode::HeapSites => "heap-sites",
        }
    }

    /// Runtime flag that loads the profiler agent.
    pub fn agent_flag(&self) -> &'static str {
        match self {
            ProfileMode::CpuSamples => "-agentlib:hprof=cpu=samples,depth=7,interval=2",
            ProfileMode::HeapSites => "-agentlib:hprof=heap=sites,depth=7",
        }
    }
}

/// Which external program an experiment launches, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgramKind {
    /// The dependency parser, which drives an external optimization solver.
    DependencyParser,
    /// The chart parser; no solver, all memory goes to the runtime.
    CkyParser,
    /// The dependency parser with a profiler agent attached.
    Profiled { mode: ProfileMode },
    /// Any other program, invoked with the experiment's argument list.
    Command { program: String },
}

impl ProgramKind {
    /// Name used when no parameter is flagged for the name.
    pub fn default_name(&self) -> String {
        match self {
            ProgramKind::DependencyParser => "depparse".to_string(),
            ProgramKind::CkyParser => "cky".to_string(),
            ProgramKind::Profiled { mode } => format!("depparse-{}", mode.as_str()),
            ProgramKind::Command { program } => program
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("command")
                .to_string(),
        }
    }

    fn uses_solver(&self) -> bool {
        matches!(
            self,
            ProgramKind::DependencyParser | ProgramKind::Profiled { .. }
        )
    }
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramKind::DependencyParser => write!(f, "dependency-parser"),
            ProgramKind::CkyParser => write!(f, "cky-parser"),
            ProgramKind::Profiled { mode } => write!(f, "profiled({})", mode.as_str()),
            ProgramKind::Command { program } => write!(f, "command({})", program),
        }
    }
}

/// A concrete experiment: parameters plus the program that consumes them.
///
/// Name, arguments and resource request are pure functions of the current
/// parameters and are recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInstance {
    kind: ProgramKind,
    params: ParamSet,
}

impl ExperimentInstance {
    /// Creates an experiment.
    ///
    /// Profiled runs record their profiler under `hprof` (in the name, not
    /// the arguments) unless the parameters already set it.
    pub fn new(kind: ProgramKind, params: ParamSet) -> Self {
        let mut params = params;
        if let ProgramKind::Profiled { mode } = &kind {
            if !params.contains_key("hprof") {
                params.set("hprof", mode.as_str(), true, false);
            }
        }
        Self { kind, params }
    }

    /// The program kind.
    pub fn kind(&self) -> &ProgramKind {
        &self.kind
    }

    /// The experiment's parameters.
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Mutable access for explicit set/update/remove calls.
    pub fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    /// Returns a new experiment with `overrides` merged on top.
    pub fn merged(&self, overrides: &ParamSet) -> Self {
        Self {
            kind: self.kind.clone(),
            params: self.params.merge(overrides),
        }
    }

    /// Renders the deterministic, filesystem-safe experiment name.
    ///
    /// Segments are `key-value` for every name-flagged key, in registration
    /// order, joined by `_`.
    pub fn render_name(&self) -> String {
        let segments: Vec<String> = self
            .params
            .iter()
            .filter(|(_, _, flags)| flags.include_in_name)
            .map(|(key, value, _)| format!("{}-{}", sanitize(key), sanitize(&value.to_string())))
            .collect();
        if segments.is_empty() {
            return self.kind.default_name();
        }
        shorten(segments.join("_"))
    }

    /// Renders `--key value` tokens for every argument-flagged key.
    pub fn render_arguments(&self) -> Vec<String> {
        argument_tokens(&self.params)
    }

    /// Derives the resource request from the current parameters.
    pub fn compute_resource_request(&self) -> Result<ResourceRequest, ConfigurationError> {
        let memory = resources::work_mem_megs(&self.params)?;
        self.memory_split(memory)?;
        Ok(ResourceRequest {
            memory_megabytes: memory as u64,
            thread_count: resources::thread_count(&self.params)?,
            wall_clock_minutes: resources::wall_clock_minutes(&self.params)?,
        })
    }

    /// Splits working memory between runtime, solver and model generator.
    pub fn memory_split(&self, total_megs: i64) -> Result<MemorySplit, ConfigurationError> {
        if !self.kind.uses_solver() {
            return Ok(MemorySplit::runtime_only(total_megs));
        }
        let parser = self.params.get_str("parser").unwrap_or_default();
        let split = MemorySplit::for_solver_program(total_megs, parser);
        if parser.starts_with("ilp-") && split.solver_megs <= 0 {
            return Err(ConfigurationError::Contradiction(format!(
                "work_mem_megs={} leaves no memory for the ILP solver with parser '{}'",
                total_megs, parser
            )));
        }
        Ok(split)
    }

    /// Renders the full command line that launches this experiment.
    ///
    /// Solver programs get their runtime heap and the derived solver
    /// memory (`--ilpWorkMemMegs`) appended after the declared arguments.
    pub fn render_command(&self) -> Result<String, ConfigurationError> {
        let arguments = self.render_arguments();
        let total = resources::work_mem_megs(&self.params)?;
        let split = self.memory_split(total)?;

        let command = match &self.kind {
            ProgramKind::DependencyParser | ProgramKind::Profiled { .. } => {
                let mut runtime = runtime_flags(split.runtime_megs);
                if self.params.get_str("ilpSolver") == Some("cplex") {
                    let lib = self
                        .params
                        .get_str("solverLibraryPath")
                        .filter(|p| !p.is_empty())
                        .ok_or_else(|| ConfigurationError::MissingField {
                            field: "solverLibraryPath".to_string(),
                            context: "ilpSolver=cplex".to_string(),
                        })?;
                    runtime.push(format!("-Djava.library.path={}", lib));
                }
                if let ProgramKind::Profiled { mode } = &self.kind {
                    runtime.push(mode.agent_flag().to_string());
                }
                let mut tokens = vec!["java".to_string()];
                tokens.extend(runtime);
                tokens.push(DEPENDENCY_PARSER_MAIN.to_string());
                tokens.extend(arguments);
                tokens.push("--ilpWorkMemMegs".to_string());
                tokens.push(split.solver_megs.to_string());
                tokens
            }
            ProgramKind::CkyParser => {
                let mut tokens = vec!["java".to_string()];
                tokens.extend(runtime_flags(split.runtime_megs));
                tokens.push(CKY_PARSER_MAIN.to_string());
                tokens.extend(arguments);
                tokens
            }
            ProgramKind::Command { program } => {
                if program.trim().is_empty() {
                    return Err(ConfigurationError::MissingField {
                        field: "program".to_string(),
                        context: "command experiment".to_string(),
                    });
                }
                let mut tokens = vec![program.clone()];
                tokens.extend(arguments);
                tokens
            }
        };

        Ok(command
            .iter()
            .map(|t| shell_quote(t))
            .collect::<Vec<_>>()
            .join(" "))
    }
}

fn runtime_flags(heap_megs: i64) -> Vec<String> {
    vec![
        "-server".to_string(),
        format!("-Xms{}m", heap_megs),
        format!("-Xmx{}m", heap_megs),
        "-ea".to_string(),
    ]
}

/// `--key value` tokens for argument-flagged keys in registration order.
pub fn argument_tokens(params: &ParamSet) -> Vec<String> {
    params
        .iter()
        .filter(|(_, _, flags)| flags.include_in_args)
        .flat_map(|(key, value, _)| [format!("--{}", key), render_value(value)])
        .collect()
}

fn render_value(value: &ParamValue) -> String {
    value.to_string()
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn shorten(name: String) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let keep = MAX_NAME_LEN - NAME_DIGEST_LEN - 1;
    format!("{}_{}", &name[..keep], &digest[..NAME_DIGEST_LEN])
}

/// Quotes `token` for `sh` unless it only has safe characters.
pub fn shell_quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}
