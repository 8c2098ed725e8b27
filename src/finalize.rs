use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::Artifact;
use crate::error::AcquireError;
use crate::fs_util;
use crate::pipeline::Pipeline;
use crate::step::SUCCESS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeMode {
    #[default]
    Copy,
    Link,
}

impl fmt::Display for FinalizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizeMode::Copy => write!(f, "copy"),
            FinalizeMode::Link => write!(f, "link"),
        }
    }
}

impl FromStr for FinalizeMode {
    type Err = AcquireError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "copy" => Ok(FinalizeMode::Copy),
            "link" | "symlink" => Ok(FinalizeMode::Link),
            other => Err(AcquireError::UnsupportedMethod(format!("finalize mode {other}"))),
        }
    }
}

impl Pipeline {
    /// Places the last artifact at `destination`. Whatever already sits there
    /// is removed first. The destination is fixed for good: changing the
    /// working directory afterwards does not move it.
    pub fn finalize(&self, destination: &str, mode: FinalizeMode) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let output = Artifact::final_destination(destination)?;
        self.append(
            "finalize",
            vec![upstream],
            output,
            move |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                debug!(source = %inputs[0], destination = %output, %mode, "finalizing");
                fs_util::remove_path(output)?;
                match mode {
                    FinalizeMode::Copy => copy_artifact(&inputs[0], output)?,
                    FinalizeMode::Link => link_artifact(&inputs[0], output)?,
                }
                Ok(SUCCESS)
            },
        )
    }
}

fn copy_artifact(source: &Utf8Path, destination: &Utf8Path) -> Result<(), AcquireError> {
    if source.is_dir() {
        fs_util::copy_dir_recursive(source.as_std_path(), destination.as_std_path())
    } else {
        fs_util::copy_file_atomic(source, destination)
    }
}

#[cfg(unix)]
fn link_artifact(source: &Utf8Path, destination: &Utf8Path) -> Result<(), AcquireError> {
    std::os::unix::fs::symlink(source, destination)
        .map_err(|err| AcquireError::Filesystem(format!("link {destination}: {err}")))
}

#[cfg(windows)]
fn link_artifact(source: &Utf8Path, destination: &Utf8Path) -> Result<(), AcquireError> {
    let result = if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, destination)
    } else {
        std::os::windows::fs::symlink_file(source, destination)
    };
    result.map_err(|err| AcquireError::Filesystem(format!("link {destination}: {err}")))
}
