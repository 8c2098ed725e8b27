use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::write_via_temp;
use crate::artifact::Artifact;
use crate::error::AcquireError;
use crate::naming;
use crate::pipeline::Pipeline;
use crate::step::SUCCESS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMethod {
    /// Byte-for-byte concatenation.
    #[default]
    Concatenate,
    /// Gunzip every source, concatenate the decompressed bytes.
    DecompressConcatenate,
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMethod::Concatenate => write!(f, "concatenate"),
            MergeMethod::DecompressConcatenate => write!(f, "decompress-concatenate"),
        }
    }
}

impl FromStr for MergeMethod {
    type Err = AcquireError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "concatenate" | "cat" => Ok(MergeMethod::Concatenate),
            "decompress-concatenate" | "zcat" => Ok(MergeMethod::DecompressConcatenate),
            other => Err(AcquireError::UnsupportedMethod(format!("merge method {other}"))),
        }
    }
}

impl Pipeline {
    /// Fans several sibling pipelines into one file.
    ///
    /// The step declares no inputs: the siblings are run by the action itself,
    /// at execution time, each under its own working directory and redo flag.
    pub fn merge(&self, siblings: &[Pipeline], method: MergeMethod) -> Result<Self, AcquireError> {
        if siblings.is_empty() {
            return Err(AcquireError::InvalidConfiguration(
                "merge needs at least one source pipeline".to_string(),
            ));
        }

        let mut parts = vec![method.to_string()];
        for sibling in siblings {
            parts.push(sibling.path()?.to_string());
        }
        let output = Artifact::new(format!("merged-{}", naming::parameter_hash(&parts)))?;
        let siblings = siblings.to_vec();

        self.append(
            "merge",
            Vec::new(),
            output,
            move |_inputs: &[Utf8PathBuf], output: &Utf8Path| {
                let mut sources = Vec::with_capacity(siblings.len());
                for sibling in &siblings {
                    sources.push(sibling.run()?.resolved_path()?);
                }
                debug!(sources = sources.len(), %method, path = %output, "merging");
                concatenate(&sources, output, method)?;
                Ok(SUCCESS)
            },
        )
    }
}

fn concatenate(
    sources: &[Utf8PathBuf],
    output: &Utf8Path,
    method: MergeMethod,
) -> Result<(), AcquireError> {
    let mut readers = Vec::with_capacity(sources.len());
    for source in sources {
        let file = File::open(source)
            .map_err(|err| AcquireError::Filesystem(format!("open {source}: {err}")))?;
        readers.push(BufReader::new(file));
    }
    write_via_temp(output, |writer| {
        for reader in readers {
            match method {
                MergeMethod::Concatenate => {
                    let mut reader = reader;
                    io::copy(&mut reader, writer)?;
                }
                MergeMethod::DecompressConcatenate => {
                    let mut decoder = MultiGzDecoder::new(reader);
                    io::copy(&mut decoder, writer)?;
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn method_parsing() {
        assert_eq!(
            "concatenate".parse::<MergeMethod>().unwrap(),
            MergeMethod::Concatenate
        );
        assert_eq!(
            "decompress-concatenate".parse::<MergeMethod>().unwrap(),
            MergeMethod::DecompressConcatenate
        );
        assert_matches!(
            "interleave".parse::<MergeMethod>().unwrap_err(),
            AcquireError::UnsupportedMethod(_)
        );
    }

    #[test]
    fn method_serde_matches_display() {
        let json = serde_json::to_string(&MergeMethod::DecompressConcatenate).unwrap();
        assert_eq!(json, "\"decompress-concatenate\"");
    }
}
