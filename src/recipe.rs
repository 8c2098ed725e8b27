//! JSON recipes: named pipelines declared as ordered step lists.

use serde::{Deserialize, Serialize};

use crate::error::AcquireError;
use crate::finalize::FinalizeMode;
use crate::merge::MergeMethod;
use crate::pipeline::Pipeline;
use crate::tools::TabixPreset;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecipeSpec {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepSpec {
    Local {
        path: String,
    },
    Fetch {
        url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Unzip {
        #[serde(default)]
        select: Option<String>,
    },
    Untar {
        #[serde(default)]
        select: Option<String>,
    },
    Gunzip,
    Gzip,
    Bgzip,
    Sort {
        #[serde(default)]
        keys: Vec<String>,
    },
    Index {
        preset: String,
    },
    Select {
        member: String,
    },
    Command {
        command: String,
    },
    Merge {
        sources: Vec<String>,
        #[serde(default)]
        method: Option<String>,
    },
    Finalize {
        path: String,
        #[serde(default)]
        mode: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct NamedPipeline {
    pub name: String,
    pub pipeline: Pipeline,
}

/// Turns recipes into pipelines that all start from `base`, so they share its
/// working directory, redo flag and network client.
pub struct RecipeBuilder {
    base: Pipeline,
}

impl RecipeBuilder {
    pub fn new(base: Pipeline) -> Self {
        Self { base }
    }

    /// Builds every recipe in order. A merge may only reference pipelines
    /// declared before it.
    pub fn build(&self, recipes: &[RecipeSpec]) -> Result<Vec<NamedPipeline>, AcquireError> {
        let mut built: Vec<NamedPipeline> = Vec::with_capacity(recipes.len());
        for recipe in recipes {
            let pipeline = self.build_one(recipe, &built)?;
            built.push(NamedPipeline {
                name: recipe.name.clone(),
                pipeline,
            });
        }
        Ok(built)
    }

    fn build_one(
        &self,
        recipe: &RecipeSpec,
        known: &[NamedPipeline],
    ) -> Result<Pipeline, AcquireError> {
        if recipe.steps.is_empty() {
            return Err(AcquireError::InvalidConfiguration(format!(
                "pipeline `{}` has no steps",
                recipe.name
            )));
        }
        let mut pipeline = self.base.clone();
        for step in &recipe.steps {
            pipeline = apply_step(&pipeline, step, known)?;
        }
        Ok(pipeline)
    }
}

fn apply_step(
    pipeline: &Pipeline,
    step: &StepSpec,
    known: &[NamedPipeline],
) -> Result<Pipeline, AcquireError> {
    match step {
        StepSpec::Local { path } => pipeline.local(path),
        StepSpec::Fetch {
            url,
            username,
            password,
        } => match username {
            Some(user) => {
                pipeline.fetch_with_credentials(url, user, password.as_deref().unwrap_or_default())
            }
            None => pipeline.fetch(url),
        },
        StepSpec::Unzip { select } => pipeline.unzip(select.as_deref()),
        StepSpec::Untar { select } => pipeline.untar(select.as_deref()),
        StepSpec::Gunzip => pipeline.gunzip(),
        StepSpec::Gzip => pipeline.gzip(),
        StepSpec::Bgzip => pipeline.bgzip(),
        StepSpec::Sort { keys } => {
            let keys = keys.iter().map(String::as_str).collect::<Vec<_>>();
            pipeline.sort(&keys)
        }
        StepSpec::Index { preset } => pipeline.index(preset.parse::<TabixPreset>()?),
        StepSpec::Select { member } => pipeline.select(member),
        StepSpec::Command { command } => pipeline.command(command),
        StepSpec::Merge { sources, method } => {
            let method = match method {
                Some(value) => value.parse::<MergeMethod>()?,
                None => MergeMethod::default(),
            };
            let siblings = sources
                .iter()
                .map(|name| {
                    known
                        .iter()
                        .find(|candidate| &candidate.name == name)
                        .map(|candidate| candidate.pipeline.clone())
                        .ok_or_else(|| {
                            AcquireError::InvalidConfiguration(format!(
                                "merge source `{name}` is not declared before this pipeline"
                            ))
                        })
                })
                .collect::<Result<Vec<_>, AcquireError>>()?;
            pipeline.merge(&siblings, method)
        }
        StepSpec::Finalize { path, mode } => {
            let mode = match mode {
                Some(value) => value.parse::<FinalizeMode>()?,
                None => FinalizeMode::default(),
            };
            pipeline.finalize(path, mode)
        }
    }
}
