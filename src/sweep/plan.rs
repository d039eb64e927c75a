//! From a sweep definition to experiments and a stage graph.

use tracing::{debug, info, warn};

use crate::error::SweepError;
use crate::experiment::ExperimentInstance;
use crate::params::ParamSet;
use crate::pipeline::{PipelineGraph, RunContext, Stage, StageId, StageWork};
use crate::scrape::ScrapeJob;

use super::definition::SweepDefinition;

/// Name of the no-op stage every experiment hangs off.
pub const ROOT_STAGE: &str = "root";

/// Expands `definition` into concrete experiments.
///
/// The experiment list is the cross product of the axes, each merged as
/// `base + axis1[i] + axis2[j] + …`, the first axis varying slowest. In
/// fast mode the fast overrides go on top and the list is truncated to
/// the fast limit.
pub fn expand(
    definition: &SweepDefinition,
    ctx: &RunContext,
    fast: bool,
) -> Result<Vec<ExperimentInstance>, SweepError> {
    let mut combos = vec![definition.base.to_params()];
    for (index, axis) in definition.axes.iter().enumerate() {
        if axis.is_empty() {
            return Err(SweepError::EmptyAxis(format!("{} (axis {})", definition.name, index)));
        }
        let fragments: Vec<ParamSet> = axis.iter().map(|f| f.to_params()).collect();
        combos = combos
            .iter()
            .flat_map(|combo| fragments.iter().map(move |fragment| combo + fragment))
            .collect();
    }

    if fast {
        let overrides = definition.fast_overrides.to_params();
        combos = combos.iter().map(|c| c + &overrides).collect();
        if let Some(limit) = definition.fast_limit {
            combos.truncate(limit);
        }
    }

    let experiments: Vec<ExperimentInstance> = combos
        .into_iter()
        .map(|mut params| {
            if let Some(key) = &definition.seed_key {
                if !params.contains_key(key) {
                    params.set(key.clone(), ctx.random_seed(), false, true);
                }
            }
            ExperimentInstance::new(definition.program.clone(), params)
        })
        .collect();

    debug!(
        sweep = %definition.name,
        experiments = experiments.len(),
        fast,
        "Expanded sweep"
    );
    Ok(experiments)
}

/// Keeps the experiments whose parameters contain every value of `filter`.
pub fn subset(experiments: &[ExperimentInstance], filter: &ParamSet) -> Vec<ExperimentInstance> {
    experiments
        .iter()
        .filter(|exp| exp.params().matches(filter))
        .cloned()
        .collect()
}

/// Builds `root → experiments → scrapes` and validates it.
///
/// Scrape stages always relaunch, so every run re-aggregates whatever
/// output exists.
pub fn build_graph(
    definition: &SweepDefinition,
    ctx: &RunContext,
    experiments: Vec<ExperimentInstance>,
) -> Result<PipelineGraph, SweepError> {
    let mut graph = PipelineGraph::new();
    let root = graph.add(
        ctx,
        StageWork::Root {
            name: ROOT_STAGE.to_string(),
        },
    );

    let mut experiment_ids = Vec::with_capacity(experiments.len());
    let mut experiment_params = Vec::with_capacity(experiments.len());
    for experiment in experiments {
        let params = experiment.params().clone();
        let mut stage = Stage::new(ctx.next_stage_id(), StageWork::Experiment(experiment));
        if let Some(retries) = definition.max_retries {
            stage = stage.with_max_retries(retries);
        }
        let id = graph.insert(stage)?;
        graph.add_dependent(root, id)?;
        experiment_ids.push(id);
        experiment_params.push(params);
    }

    for spec in &definition.scrape {
        let family = spec.family.resolve()?;
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("scrape-{}", family.name()));
        let job = ScrapeJob::new(name, family, spec.output.clone())
            .with_column_order(spec.columns.clone());
        let filter = spec.filter.to_params();
        let inputs: Vec<StageId> = experiment_ids
            .iter()
            .zip(&experiment_params)
            .filter(|(_, params)| params.matches(&filter))
            .map(|(id, _)| *id)
            .collect();
        if inputs.is_empty() && !experiment_ids.is_empty() {
            warn!(scrape = %job.name(), "Scrape filter selects no experiments");
        }

        let stage = Stage::new(ctx.next_stage_id(), StageWork::Scrape(job)).with_always_relaunch();
        let id = graph.insert(stage)?;
        if inputs.is_empty() {
            graph.add_prerequisite(id, root)?;
        } else {
            graph.add_prerequisites(id, inputs)?;
        }
    }

    graph.validate()?;
    info!(
        sweep = %definition.name,
        stages = graph.len(),
        experiments = experiment_ids.len(),
        "Built stage graph"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::params::ParamValue;

    const SWEEP: &str = r#"
name: unit
program: { type: cky_parser }
seed_key: seed
base:
  dataset: wsj
  iterations: 1000
axes:
  - - { relaxation: dw }
    - { relaxation: lp }
    - { relaxation: none }
  - - { threads: 1 }
    - { threads: 4 }
fast_overrides:
  iterations: 1
fast_limit: 2
scrape:
  - { family: bnb, output: bnb.data }
"#;

    fn definition() -> SweepDefinition {
        SweepDefinition::from_yaml_str(SWEEP, "inline").expect("parse")
    }

    #[test]
    fn test_cross_product_order() {
        let ctx = RunContext::with_seed("/tmp", "unit", 1);
        let exps = expand(&definition(), &ctx, false).expect("expand");
        assert_eq!(exps.len(), 6);
        let combos: Vec<(String, i64)> = exps
            .iter()
            .map(|e| {
                (
                    e.params().get_str("relaxation").expect("relax").to_string(),
                    e.params().get("threads").and_then(ParamValue::as_i64).expect("threads"),
                )
            })
            .collect();
        assert_eq!(combos[0], ("dw".to_string(), 1));
        assert_eq!(combos[1], ("dw".to_string(), 4));
        assert_eq!(combos[5], ("none".to_string(), 4));
    }

    #[test]
    fn test_seed_is_argument_not_name() {
        let ctx = RunContext::with_seed("/tmp", "unit", 1);
        let exps = expand(&definition(), &ctx, false).expect("expand");
        let exp = &exps[0];
        assert!(exp.render_arguments().contains(&"--seed".to_string()));
        assert!(!exp.render_name().contains("seed"));
        assert_ne!(
            exps[0].params().get("seed"),
            exps[1].params().get("seed")
        );
    }

    #[test]
    fn test_fast_mode() {
        let ctx = RunContext::with_seed("/tmp", "unit", 1);
        let exps = expand(&definition(), &ctx, true).expect("expand");
        assert_eq!(exps.len(), 2);
        assert!(exps
            .iter()
            .all(|e| e.params().get("iterations") == Some(&ParamValue::Int(1))));
    }

    #[test]
    fn test_subset() {
        let ctx = RunContext::with_seed("/tmp", "unit", 1);
        let exps = expand(&definition(), &ctx, false).expect("expand");
        let chosen = subset(&exps, &ParamSet::new().with("relaxation", "lp"));
        assert_eq!(chosen.len(), 2);
        assert!(chosen
            .iter()
            .all(|e| e.params().get_str("relaxation") == Some("lp")));
    }

    #[test]
    fn test_build_graph_wires_root_experiments_and_scrape() {
        let def = definition();
        let ctx = RunContext::with_seed("/tmp", "unit", 1);
        let exps = expand(&def, &ctx, false).expect("expand");
        let graph = build_graph(&def, &ctx, exps).expect("graph");

        assert_eq!(graph.len(), 1 + 6 + 1);
        let root = graph.find(ROOT_STAGE).expect("root");
        assert_eq!(root.dependents().len(), 6);
        let scrape = graph.find("scrape-bnb").expect("scrape");
        assert!(scrape.always_relaunch());
        assert_eq!(scrape.prerequisites().len(), 6);
    }

    #[test]
    fn test_scrape_filter_selects_matching_experiments() {
        let text = SWEEP.replace(
            "  - { family: bnb, output: bnb.data }\n",
            "  - { family: bnb, output: bnb.data }\n  \
             - { name: lp-only, family: bnb, output: lp.data, where: { relaxation: lp } }\n  \
             - { name: nothing, family: bnb, output: none.data, where: { relaxation: qp } }\n",
        );
        let def = SweepDefinition::from_yaml_str(&text, "inline").expect("parse");
        let ctx = RunContext::with_seed("/tmp", "unit", 1);
        let exps = expand(&def, &ctx, false).expect("expand");
        let graph = build_graph(&def, &ctx, exps).expect("graph");

        assert_eq!(graph.find("scrape-bnb").expect("all").prerequisites().len(), 6);
        let lp = graph.find("lp-only").expect("lp");
        assert_eq!(lp.prerequisites().len(), 2);
        for id in lp.prerequisites() {
            let stage = graph.stage(*id).expect("experiment");
            match stage.work() {
                StageWork::Experiment(exp) => {
                    assert_eq!(exp.params().get_str("relaxation"), Some("lp"))
                }
                other => panic!("unexpected prerequisite {:?}", other),
            }
        }
        let nothing = graph.find("nothing").expect("nothing");
        let root = graph.find(ROOT_STAGE).expect("root").id();
        assert_eq!(nothing.prerequisites().iter().copied().collect::<Vec<_>>(), vec![root]);
    }

    #[test]
    fn test_duplicate_experiments_rejected() {
        let text = r#"
name: dup
program: { type: cky_parser }
axes:
  - - { dataset: wsj }
    - { dataset: wsj }
"#;
        let def = SweepDefinition::from_yaml_str(text, "inline").expect("parse");
        let ctx = RunContext::with_seed("/tmp", "dup", 1);
        let exps = expand(&def, &ctx, false).expect("expand");
        assert!(matches!(
            build_graph(&def, &ctx, exps),
            Err(SweepError::Graph(GraphError::DuplicateIdentifier(_)))
        ));
    }
}
