//! Handles for files a pipeline consumes or produces.
//!
//! A handle pairs a basename with a directory that may not be known yet.
//! Completion is tracked with a sidecar marker next to the artifact, so a file
//! left behind by a crashed run is never mistaken for a finished one.

use std::fmt;
use std::path::Component;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AcquireError;
use crate::fs_util;

pub const MARKER_SUFFIX: &str = ".__acquire_exists__";

/// Stands in for path separators when a nested basename is flattened into a
/// marker file name.
const NESTED_SEPARATOR: &str = "%2F";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Lives in the pipeline's working directory; bound at run time.
    Mutable,
    /// A pre-existing local file; its own existence is the marker.
    Fixed,
    /// The terminal destination of a finalized pipeline.
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    directory: Option<Utf8PathBuf>,
    basename: String,
    kind: ArtifactKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub produced_by: String,
    pub produced_at: String,
    pub tool: String,
}

impl Artifact {
    pub fn new(basename: impl Into<String>) -> Result<Self, AcquireError> {
        let basename = basename.into();
        validate_basename(&basename)?;
        Ok(Self {
            directory: None,
            basename,
            kind: ArtifactKind::Mutable,
        })
    }

    pub fn fixed(path: &str) -> Result<Self, AcquireError> {
        Self::pinned(path, ArtifactKind::Fixed)
    }

    pub fn final_destination(path: &str) -> Result<Self, AcquireError> {
        Self::pinned(path, ArtifactKind::Final)
    }

    fn pinned(path: &str, kind: ArtifactKind) -> Result<Self, AcquireError> {
        let full = fs_util::expand_path(path)?;
        let basename = full
            .file_name()
            .ok_or_else(|| {
                AcquireError::InvalidConfiguration(format!("path has no file name: {path}"))
            })?
            .to_string();
        let directory = full
            .parent()
            .ok_or_else(|| {
                AcquireError::InvalidConfiguration(format!("path has no parent: {path}"))
            })?
            .to_path_buf();
        Ok(Self {
            directory: Some(directory),
            basename,
            kind,
        })
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn directory(&self) -> Option<&Utf8Path> {
        self.directory.as_deref()
    }

    /// Binds a Mutable handle to `dir`. Fixed and Final handles keep the
    /// location they were built with.
    pub fn bind_directory(&mut self, dir: &str) -> Result<(), AcquireError> {
        if self.kind != ArtifactKind::Mutable {
            return Ok(());
        }
        self.directory = Some(fs_util::expand_path(dir)?);
        Ok(())
    }

    pub fn bound_to(&self, dir: &Utf8Path) -> Result<Self, AcquireError> {
        let mut bound = self.clone();
        bound.bind_directory(dir.as_str())?;
        Ok(bound)
    }

    pub fn resolved_path(&self) -> Result<Utf8PathBuf, AcquireError> {
        self.directory
            .as_ref()
            .map(|dir| dir.join(&self.basename))
            .ok_or_else(|| AcquireError::NotConfigured(self.basename.clone()))
    }

    pub fn provisional_path(&self, candidate_dir: &Utf8Path) -> Utf8PathBuf {
        match (self.kind, &self.directory) {
            (ArtifactKind::Mutable, _) | (_, None) => candidate_dir.join(&self.basename),
            (_, Some(dir)) => dir.join(&self.basename),
        }
    }

    /// Markers always sit directly in the artifact's directory. A nested
    /// basename such as `x.unzipped/readme.txt` is flattened, so no marker
    /// ever lands inside an extracted tree.
    pub fn marker_path(&self) -> Result<Utf8PathBuf, AcquireError> {
        let dir = self
            .directory
            .as_ref()
            .ok_or_else(|| AcquireError::NotConfigured(self.basename.clone()))?;
        let flat = Utf8Path::new(&self.basename)
            .components()
            .map(|component| component.as_str())
            .collect::<Vec<_>>()
            .join(NESTED_SEPARATOR);
        Ok(dir.join(format!("{flat}{MARKER_SUFFIX}")))
    }

    pub fn exists(&self) -> Result<bool, AcquireError> {
        Ok(self.resolved_path()?.as_std_path().exists())
    }

    pub fn is_complete(&self) -> Result<bool, AcquireError> {
        if !self.exists()? {
            return Ok(false);
        }
        match self.kind {
            ArtifactKind::Fixed => Ok(true),
            ArtifactKind::Mutable | ArtifactKind::Final => {
                Ok(self.marker_path()?.as_std_path().exists())
            }
        }
    }

    pub fn mark_complete(&self, produced_by: &str) -> Result<(), AcquireError> {
        let path = self.resolved_path()?;
        if !path.as_std_path().exists() {
            return Err(AcquireError::PreconditionFailed(path.to_string()));
        }
        if self.kind == ArtifactKind::Fixed {
            return Ok(());
        }
        let record = MarkerRecord {
            produced_by: produced_by.to_string(),
            produced_at: Utc::now().to_rfc3339(),
            tool: format!("kira-acquire/{}", env!("CARGO_PKG_VERSION")),
        };
        let content = serde_json::to_vec_pretty(&record)
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        fs_util::write_bytes_atomic(&self.marker_path()?, &content)
    }

    /// Drops the marker so the artifact reads as incomplete. The artifact
    /// itself is left in place.
    pub fn rollback(&self) -> Result<(), AcquireError> {
        if self.kind == ArtifactKind::Fixed {
            return Ok(());
        }
        match std::fs::remove_file(self.marker_path()?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AcquireError::Filesystem(err.to_string())),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.directory {
            Some(dir) => write!(f, "{}", dir.join(&self.basename)),
            None => write!(f, "<unbound>/{}", self.basename),
        }
    }
}

fn validate_basename(basename: &str) -> Result<(), AcquireError> {
    if basename.trim().is_empty() {
        return Err(AcquireError::InvalidConfiguration(
            "artifact basename must not be empty".to_string(),
        ));
    }
    if !is_contained(basename) {
        return Err(AcquireError::InvalidConfiguration(format!(
            "artifact basename must be a relative path inside the working directory: {basename}"
        )));
    }
    Ok(())
}

/// True when `relative` names something at or below its base directory: no
/// root, prefix or `..` components.
pub(crate) fn is_contained(relative: &str) -> bool {
    Utf8Path::new(relative)
        .as_std_path()
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_basename_is_rejected() {
        let err = Artifact::new("  ").unwrap_err();
        assert_matches!(err, AcquireError::InvalidConfiguration(_));
    }

    #[test]
    fn escaping_basename_is_rejected() {
        assert_matches!(
            Artifact::new("../outside").unwrap_err(),
            AcquireError::InvalidConfiguration(_)
        );
        assert_matches!(
            Artifact::new("/etc/passwd").unwrap_err(),
            AcquireError::InvalidConfiguration(_)
        );
        assert!(Artifact::new("archive.unzipped/docs/readme.txt").is_ok());
    }

    #[test]
    fn unbound_handle_is_not_configured() {
        let artifact = Artifact::new("file.txt").unwrap();
        assert_matches!(
            artifact.resolved_path().unwrap_err(),
            AcquireError::NotConfigured(name) if name == "file.txt"
        );
    }

    #[test]
    fn provisional_path_does_not_bind() {
        let artifact = Artifact::new("file.txt").unwrap();
        let preview = artifact.provisional_path(Utf8Path::new("/work"));
        assert_eq!(preview, Utf8PathBuf::from("/work/file.txt"));
        assert!(artifact.directory().is_none());
    }

    #[test]
    fn fixed_handle_ignores_rebinding() {
        let mut artifact = Artifact::fixed("/data/input.vcf").unwrap();
        artifact.bind_directory("/elsewhere").unwrap();
        assert_eq!(
            artifact.resolved_path().unwrap(),
            Utf8PathBuf::from("/data/input.vcf")
        );
        assert_eq!(
            artifact.provisional_path(Utf8Path::new("/elsewhere")),
            Utf8PathBuf::from("/data/input.vcf")
        );
    }

    #[test]
    fn nested_marker_stays_outside_the_tree() {
        let artifact = Artifact::new("bundle.unzipped/docs/readme.txt")
            .unwrap()
            .bound_to(Utf8Path::new("/work"))
            .unwrap();
        assert_eq!(
            artifact.marker_path().unwrap(),
            Utf8PathBuf::from("/work/bundle.unzipped%2Fdocs%2Freadme.txt.__acquire_exists__")
        );

        let flat = Artifact::new("a.txt").unwrap().bound_to(Utf8Path::new("/work")).unwrap();
        assert_eq!(
            flat.marker_path().unwrap(),
            Utf8PathBuf::from("/work/a.txt.__acquire_exists__")
        );
    }

    #[test]
    fn marker_records_the_producing_step() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let artifact = Artifact::new("out.txt").unwrap().bound_to(&root).unwrap();
        std::fs::write(root.join("out.txt"), "x").unwrap();

        artifact.mark_complete("gunzip").unwrap();
        let content = std::fs::read_to_string(artifact.marker_path().unwrap()).unwrap();
        let record: MarkerRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(record.produced_by, "gunzip");
        assert!(record.tool.starts_with("kira-acquire/"));
        assert!(artifact.is_complete().unwrap());
    }

    #[test]
    fn containment_check() {
        assert!(is_contained("docs/readme.txt"));
        assert!(is_contained("./readme.txt"));
        assert!(!is_contained("../etc/passwd"));
        assert!(!is_contained("docs/../../x"));
        assert!(!is_contained("/etc/passwd"));
    }
}
