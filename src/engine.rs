use std::time::Instant;

use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::error::AcquireError;
use crate::pipeline::Pipeline;

/// Materializes the pipeline's final artifact.
///
/// A complete final artifact short-circuits the whole chain unless the
/// pipeline asks for a redo. Otherwise steps run in order, each with its own
/// cache check, and the first failure aborts the run.
pub fn acquire(pipeline: &Pipeline) -> Result<Artifact, AcquireError> {
    let working_directory = pipeline.working_directory();
    let target = pipeline.output()?.bound_to(working_directory)?;

    if !pipeline.redo() && target.is_complete()? {
        debug!(path = %target, "final artifact already complete, skipping pipeline");
        return Ok(target);
    }

    let start = Instant::now();
    let mut last = target;
    for step in pipeline.steps() {
        last = step.run(working_directory, pipeline.redo())?;
    }
    info!(
        path = %last,
        steps = pipeline.steps().len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "pipeline complete"
    );
    Ok(last)
}
