//! Scrape passes over the output directories of finished stages.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{ScrapeError, StageFailure};
use crate::export::sink_for_path;
use crate::params::ParamSet;
use crate::scheduler::{PARAMS_FILE, STDOUT_FILE};

use super::engine::ScrapeEngine;
use super::record::Record;
use super::rules::ScrapeFamily;

/// Output directory of one finished stage and the parameters it ran with.
#[derive(Debug, Clone)]
pub struct ScrapeInput {
    pub dir: PathBuf,
    pub params: ParamSet,
}

/// Aggregation stage work: scrape every input with one family and write
/// the records to a single result file.
#[derive(Debug, Clone)]
pub struct ScrapeJob {
    name: String,
    family: ScrapeFamily,
    output: PathBuf,
    column_order: Vec<String>,
}

impl ScrapeJob {
    /// `output` is resolved against the stage directory when relative; its
    /// extension picks the file format.
    pub fn new(name: impl Into<String>, family: ScrapeFamily, output: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            family,
            output: output.into(),
            column_order: Vec::new(),
        }
    }

    pub fn with_column_order(mut self, columns: Vec<String>) -> Self {
        self.column_order = columns;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> &ScrapeFamily {
        &self.family
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn output_path(&self, stage_dir: &Path) -> PathBuf {
        if self.output.is_absolute() {
            self.output.clone()
        } else {
            stage_dir.join(&self.output)
        }
    }

    /// Scrapes the `stdout` of every input, in input order.
    pub fn collect(&self, inputs: &[ScrapeInput]) -> Result<Vec<Record>, ScrapeError> {
        let engine = ScrapeEngine::new(self.family.clone())?;
        let mut records = Vec::new();
        for input in inputs {
            records.extend(scrape_dir(&engine, &input.dir, &input.params)?);
        }
        Ok(records)
    }

    /// Scrapes `inputs` and writes the result file; returns the row count.
    pub fn run(&self, inputs: &[ScrapeInput], stage_dir: &Path) -> Result<usize, StageFailure> {
        let records = self.collect(inputs)?;
        let path = self.output_path(stage_dir);
        if records.is_empty() {
            warn!(
                stage = %self.name,
                family = %self.family.name(),
                inputs = inputs.len(),
                "Scrape found no records, nothing written"
            );
            return Ok(0);
        }
        let mut sink = sink_for_path(&path, &self.column_order);
        let rows = sink.write(&records)?;
        info!(stage = %self.name, rows, path = %path.display(), "Scrape complete");
        Ok(rows)
    }
}

/// Scrapes `<dir>/stdout` with `engine`, merging onto `params`.
pub fn scrape_dir(
    engine: &ScrapeEngine,
    dir: &Path,
    params: &ParamSet,
) -> Result<Vec<Record>, ScrapeError> {
    let path = dir.join(STDOUT_FILE);
    let text = std::fs::read_to_string(&path).map_err(|source| ScrapeError::Io {
        path: path.clone(),
        source,
    })?;
    engine.scrape(&text, params)
}

/// Reads the parameter snapshot a substrate left in `dir`.
pub fn load_params(dir: &Path) -> Result<ParamSet, ScrapeError> {
    let path = dir.join(PARAMS_FILE);
    if !path.exists() {
        return Err(ScrapeError::MissingParams(dir.to_path_buf()));
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ScrapeError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Finds stage directories below `roots`: those holding both a parameter
/// snapshot and captured output. Sorted for a stable record order.
pub fn find_stage_dirs(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| WalkDir::new(root).follow_links(true))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .filter(|dir| dir.join(PARAMS_FILE).is_file() && dir.join(STDOUT_FILE).is_file())
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

/// Scrapes every stage directory below `roots`.
pub fn scrape_dirs(engine: &ScrapeEngine, roots: &[PathBuf]) -> Result<Vec<Record>, ScrapeError> {
    let mut records = Vec::new();
    for dir in find_stage_dirs(roots) {
        let params = load_params(&dir)?;
        let found = scrape_dir(engine, &dir, &params)?;
        info!(dir = %dir.display(), records = found.len(), "Scraped stage directory");
        records.extend(found);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use tempfile::TempDir;

    const STATUS: &str = "LazyBranchAndBoundSolver - Summary: upBound=-1.5, lowBound=-2.0, relativeDiff=0.25, numLeaves=4, numFathom=1, numPrune=0, numInfeasible=0, avgFathomDepth=1.0, numSeen=5";

    fn stage_dir(root: &Path, name: &str, params: &ParamSet, stdout: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(
            dir.join(PARAMS_FILE),
            serde_json::to_string(params).expect("json"),
        )
        .expect("params");
        std::fs::write(dir.join(STDOUT_FILE), stdout).expect("stdout");
        dir
    }

    #[test]
    fn test_scrape_dirs_reassociates_params() {
        let tmp = TempDir::new().expect("tempdir");
        let a = ParamSet::new().with("dataset", "a");
        let b = ParamSet::new().with("dataset", "b");
        stage_dir(tmp.path(), "exp-a", &a, &format!("10 {}\n", STATUS));
        stage_dir(tmp.path(), "exp-b", &b, &format!("20 {}\n30 {}\n", STATUS, STATUS));
        std::fs::create_dir_all(tmp.path().join("unrelated")).expect("mkdir");

        let engine = ScrapeEngine::for_family("bnb").expect("engine");
        let records = scrape_dirs(&engine, &[tmp.path().to_path_buf()]).expect("scrape");

        // bnb prepends its overlay: 1 + 1 for exp-a, 1 + 2 for exp-b
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].get("dataset"), Some(&ParamValue::from("a")));
        assert_eq!(records[4].get("dataset"), Some(&ParamValue::from("b")));
        assert_eq!(records[4].time_ms(), Some(30));
    }

    #[test]
    fn test_missing_params_is_reported() {
        let tmp = TempDir::new().expect("tempdir");
        assert!(matches!(
            load_params(tmp.path()),
            Err(ScrapeError::MissingParams(_))
        ));
    }

    #[test]
    fn test_job_writes_result_file() {
        let tmp = TempDir::new().expect("tempdir");
        let params = ParamSet::new().with("dataset", "a");
        let dir = stage_dir(tmp.path(), "exp", &params, &format!("10 {}\n", STATUS));

        let job = ScrapeJob::new("scrape-bnb", ScrapeFamily::bnb(), "bnb.data")
            .with_column_order(vec!["dataset".to_string()]);
        let out_dir = tmp.path().join("scrape-bnb");
        let rows = job
            .run(&[ScrapeInput { dir, params }], &out_dir)
            .expect("run");
        assert_eq!(rows, 2);

        let text = std::fs::read_to_string(out_dir.join("bnb.data")).expect("read");
        let header = text.lines().next().expect("header");
        assert!(header.starts_with("dataset\ttime\tupBound"));
    }

    #[test]
    fn test_missing_stdout_is_io_error() {
        let tmp = TempDir::new().expect("tempdir");
        let job = ScrapeJob::new("scrape", ScrapeFamily::curnode(), "out.data");
        let err = job
            .collect(&[ScrapeInput {
                dir: tmp.path().join("nope"),
                params: ParamSet::new(),
            }])
            .expect_err("should fail");
        assert!(matches!(err, ScrapeError::Io { .. }));
    }
}
