use std::fmt;
use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::error::AcquireError;

pub const SUCCESS: i32 = 0;

/// Work performed by a step. Receives the resolved input paths, in declaration
/// order, and the path the output must be written to. Returns an exit status
/// where [`SUCCESS`] is the only success value.
pub type Action =
    Arc<dyn Fn(&[Utf8PathBuf], &Utf8Path) -> Result<i32, AcquireError> + Send + Sync>;

#[derive(Clone)]
pub struct Step {
    name: String,
    inputs: Vec<Artifact>,
    output: Artifact,
    action: Action,
}

impl Step {
    pub fn new<F>(
        name: impl Into<String>,
        inputs: Vec<Artifact>,
        output: Artifact,
        action: F,
    ) -> Result<Self, AcquireError>
    where
        F: Fn(&[Utf8PathBuf], &Utf8Path) -> Result<i32, AcquireError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AcquireError::InvalidConfiguration(
                "step name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            inputs,
            output,
            action: Arc::new(action),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Artifact] {
        &self.inputs
    }

    pub fn output(&self) -> &Artifact {
        &self.output
    }

    /// Runs the step inside `working_directory` and returns its bound output.
    ///
    /// The action is skipped when the output is already complete unless
    /// `force_redo` is set. The output marker is dropped before the action
    /// starts and only written back once it succeeds; the output file itself
    /// is left in place on failure.
    pub fn run(
        &self,
        working_directory: &Utf8Path,
        force_redo: bool,
    ) -> Result<Artifact, AcquireError> {
        let mut input_paths = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let bound = input.bound_to(working_directory)?;
            if !bound.is_complete()? {
                return Err(AcquireError::MissingInput {
                    step: self.name.clone(),
                    path: bound.to_string(),
                });
            }
            input_paths.push(bound.resolved_path()?);
        }

        let output = self.output.bound_to(working_directory)?;
        if !force_redo && output.is_complete()? {
            debug!(step = %self.name, path = %output, "output already complete");
            return Ok(output);
        }

        // Invalidate before touching the file: a run that dies mid-write must
        // not leave a stale marker vouching for a partial output.
        output.rollback()?;
        let output_path = output.resolved_path()?;
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        }

        info!(step = %self.name, path = %output_path, "running step");
        match (self.action)(input_paths.as_slice(), output_path.as_path()) {
            Ok(SUCCESS) => {}
            Ok(status) => {
                warn!(step = %self.name, status, "step failed");
                return Err(AcquireError::StepFailed {
                    step: self.name.clone(),
                    status,
                });
            }
            Err(err) => {
                warn!(step = %self.name, error = %err, "step failed");
                return Err(AcquireError::ActionFailed {
                    step: self.name.clone(),
                    source: Box::new(err),
                });
            }
        }

        output.mark_complete(&self.name)?;
        info!(step = %self.name, path = %output_path, "step complete");
        Ok(output)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}
