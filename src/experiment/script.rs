//! Shell script rendering for experiments and ad-hoc stages.

use serde::Serialize;
use tera::{Context, Tera};

use crate::error::ConfigurationError;
use crate::pipeline::RunContext;

use super::instance::ExperimentInstance;
use super::resources::ResourceRequest;

const SCRIPT_TEMPLATE_NAME: &str = "stage.sh";

/// Default stage script: resource header, environment, then the command.
pub const DEFAULT_SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
# stage: {{ name }}
# run: {{ run_id }}
# memory_megabytes={{ resources.memory_megabytes }}
# thread_count={{ resources.thread_count }}
# wall_clock_minutes={{ resources.wall_clock_minutes }}
set -e
export SWEEP_ROOT={{ root_dir }}
export SWEEP_STAGE={{ name }}
echo 'Running {{ name }}'
{{ body }}
"#;

#[derive(Debug, Serialize)]
struct ScriptView<'a> {
    name: &'a str,
    run_id: String,
    root_dir: String,
    resources: &'a ResourceRequest,
    body: &'a str,
}

/// Renders stage scripts from a `tera` template.
///
/// The argument list and the resource fields of the request appear
/// verbatim and in declared order in the emitted text.
#[derive(Debug, Clone)]
pub struct ScriptRenderer {
    tera: Tera,
}

impl ScriptRenderer {
    /// Creates a renderer using [`DEFAULT_SCRIPT_TEMPLATE`].
    pub fn new() -> Result<Self, ConfigurationError> {
        Self::with_template(DEFAULT_SCRIPT_TEMPLATE)
    }

    /// Creates a renderer from a custom template.
    ///
    /// The template sees `name`, `run_id`, `root_dir`, `resources` and `body`.
    pub fn with_template(template: &str) -> Result<Self, ConfigurationError> {
        let mut tera = Tera::default();
        tera.add_raw_template(SCRIPT_TEMPLATE_NAME, template)?;
        Ok(Self { tera })
    }

    /// Renders the script that launches `experiment`.
    pub fn render_experiment(
        &self,
        ctx: &RunContext,
        experiment: &ExperimentInstance,
        resources: &ResourceRequest,
    ) -> Result<String, ConfigurationError> {
        let command = experiment.render_command()?;
        self.render_body(ctx, &experiment.render_name(), resources, &command)
    }

    /// Wraps an arbitrary shell body in the stage template.
    pub fn render_body(
        &self,
        ctx: &RunContext,
        name: &str,
        resources: &ResourceRequest,
        body: &str,
    ) -> Result<String, ConfigurationError> {
        let view = ScriptView {
            name,
            run_id: ctx.run_id().to_string(),
            root_dir: ctx.root_dir().display().to_string(),
            resources,
            body: body.trim_end(),
        };
        let context = Context::from_serialize(&view)?;
        Ok(self.tera.render(SCRIPT_TEMPLATE_NAME, &context)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ProgramKind;
    use crate::params::ParamSet;

    #[test]
    fn test_script_contains_arguments_and_resources_verbatim() {
        let ctx = RunContext::with_seed("/tmp/sweeps", "unit", 7);
        let exp = ExperimentInstance::new(
            ProgramKind::CkyParser,
            ParamSet::new()
                .with("maxSentenceLength", 10)
                .with("treeFile", "trees.mrg"),
        );
        let request = exp.compute_resource_request().expect("request");
        let renderer = ScriptRenderer::new().expect("renderer");
        let script = renderer
            .render_experiment(&ctx, &exp, &request)
            .expect("script");

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("--maxSentenceLength 10 --treeFile trees.mrg"));
        assert!(script.contains("# memory_megabytes=1536\n"));
        assert!(script.contains("# thread_count=1\n"));
        assert!(script.contains("# wall_clock_minutes=60\n"));
        assert!(script.contains("export SWEEP_ROOT=/tmp/sweeps\n"));
    }

    #[test]
    fn test_custom_template() {
        let ctx = RunContext::with_seed("/tmp/sweeps", "unit", 7);
        let renderer = ScriptRenderer::with_template("{{ name }}: {{ body }}").expect("renderer");
        let out = renderer
            .render_body(&ctx, "scrape", &ResourceRequest::default(), "echo hi\n")
            .expect("render");
        assert_eq!(out, "scrape: echo hi");
    }

    #[test]
    fn test_broken_template_is_configuration_error() {
        assert!(matches!(
            ScriptRenderer::with_template("{{ unclosed"),
            Err(ConfigurationError::Template(_))
        ));
    }
}
