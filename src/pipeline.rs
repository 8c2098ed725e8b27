//! Immutable, appendable chains of steps.
//!
//! Every builder returns a new [`Pipeline`]; the receiver is left untouched,
//! so one prefix can seed several downstream pipelines. Builders for the
//! individual transforms live next to their actions in `fetch`, `archive`,
//! `tools`, `merge` and `finalize`.

use std::fmt;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::artifact::{self, Artifact, ArtifactKind};
use crate::config::{AcquireConfig, FetchSettings};
use crate::engine;
use crate::error::AcquireError;
use crate::fetch::Downloader;
use crate::fs_util;
use crate::naming;
use crate::step::{Step, SUCCESS};

#[derive(Clone)]
pub struct Pipeline {
    working_directory: Utf8PathBuf,
    redo: bool,
    fetch: FetchSettings,
    downloader: Option<Arc<dyn Downloader>>,
    steps: Vec<Arc<Step>>,
}

impl Pipeline {
    pub fn new(config: &AcquireConfig) -> Result<Self, AcquireError> {
        Ok(Self {
            working_directory: fs_util::expand_path(&config.working_directory)?,
            redo: config.redo,
            fetch: config.fetch.clone(),
            downloader: None,
            steps: Vec::new(),
        })
    }

    pub fn working_directory(&self) -> &Utf8Path {
        &self.working_directory
    }

    pub fn redo(&self) -> bool {
        self.redo
    }

    pub fn steps(&self) -> &[Arc<Step>] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn fetch_settings(&self) -> &FetchSettings {
        &self.fetch
    }

    pub(crate) fn downloader(&self) -> Option<Arc<dyn Downloader>> {
        self.downloader.clone()
    }

    /// The unbound output handle of the last step.
    pub fn output(&self) -> Result<&Artifact, AcquireError> {
        self.steps
            .last()
            .map(|step| step.output())
            .ok_or(AcquireError::EmptyPipeline)
    }

    /// Where the final artifact lives, or will live, without running anything.
    pub fn path(&self) -> Result<Utf8PathBuf, AcquireError> {
        Ok(self.output()?.provisional_path(&self.working_directory))
    }

    pub fn exists(&self) -> Result<bool, AcquireError> {
        self.output()?
            .bound_to(&self.working_directory)?
            .is_complete()
    }

    pub fn add_step(&self, step: Step) -> Self {
        let mut next = self.clone();
        next.steps.push(Arc::new(step));
        next
    }

    pub fn set_working_directory(&self, dir: &str) -> Result<Self, AcquireError> {
        let mut next = self.clone();
        next.working_directory = fs_util::expand_path(dir)?;
        Ok(next)
    }

    pub fn set_redo(&self, redo: bool) -> Self {
        let mut next = self.clone();
        next.redo = redo;
        next
    }

    /// Replaces the network client used by `fetch` steps built afterwards.
    pub fn with_downloader(&self, downloader: Arc<dyn Downloader>) -> Self {
        let mut next = self.clone();
        next.downloader = Some(downloader);
        next
    }

    pub fn run(&self) -> Result<Artifact, AcquireError> {
        engine::acquire(self)
    }

    pub(crate) fn append<F>(
        &self,
        name: &str,
        inputs: Vec<Artifact>,
        output: Artifact,
        action: F,
    ) -> Result<Self, AcquireError>
    where
        F: Fn(&[Utf8PathBuf], &Utf8Path) -> Result<i32, AcquireError> + Send + Sync + 'static,
    {
        Ok(self.add_step(Step::new(name, inputs, output, action)?))
    }

    /// References a file that already exists on disk.
    pub fn local(&self, path: &str) -> Result<Self, AcquireError> {
        let output = Artifact::fixed(path)?;
        self.append(
            "local",
            Vec::new(),
            output,
            |_inputs: &[Utf8PathBuf], output: &Utf8Path| {
                Ok(if output.as_std_path().exists() { SUCCESS } else { 1 })
            },
        )
    }

    /// Narrows a directory artifact (an extracted archive) to one member.
    pub fn select(&self, member: &str) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let member = member.trim().trim_start_matches("./");
        if member.is_empty() {
            return Err(AcquireError::InvalidConfiguration(
                "select needs a member path".to_string(),
            ));
        }
        if !artifact::is_contained(member) {
            return Err(AcquireError::InvalidConfiguration(format!(
                "select member must stay inside {}: {member}",
                upstream.basename()
            )));
        }
        let output = match upstream.kind() {
            ArtifactKind::Mutable => Artifact::new(format!("{}/{member}", upstream.basename()))?,
            ArtifactKind::Fixed | ArtifactKind::Final => {
                let base = upstream.resolved_path()?;
                Artifact::fixed(base.join(member).as_str())?
            }
        };
        self.append(
            "select",
            vec![upstream],
            output,
            |_inputs: &[Utf8PathBuf], output: &Utf8Path| {
                Ok(if output.as_std_path().exists() { SUCCESS } else { 1 })
            },
        )
    }

    /// Appends a step backed by a caller-supplied action. The output is named
    /// after the upstream artifact plus `suffix`, or `suffix` alone when the
    /// pipeline is empty.
    pub fn apply<F>(&self, name: &str, suffix: &str, action: F) -> Result<Self, AcquireError>
    where
        F: Fn(&[Utf8PathBuf], &Utf8Path) -> Result<i32, AcquireError> + Send + Sync + 'static,
    {
        let (inputs, basename) = match self.steps.last() {
            Some(step) => {
                let upstream = step.output().clone();
                let basename = naming::suffixed(upstream.basename(), suffix);
                (vec![upstream], basename)
            }
            None => (Vec::new(), suffix.to_string()),
        };
        self.append(name, inputs, Artifact::new(basename)?, action)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("working_directory", &self.working_directory)
            .field("redo", &self.redo)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}
