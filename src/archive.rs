use std::fs::{self, File};
use std::io::{self, BufReader};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::artifact::Artifact;
use crate::error::AcquireError;
use crate::fs_util;
use crate::naming;
use crate::pipeline::Pipeline;
use crate::step::SUCCESS;
use crate::tools::{self, ToolInvocation};

impl Pipeline {
    /// Extracts a zip archive into a directory artifact, optionally narrowed
    /// to a single member with a chained `select` step.
    pub fn unzip(&self, select: Option<&str>) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let output = Artifact::new(naming::suffixed(upstream.basename(), ".unzipped"))?;
        let next = self.append(
            "unzip",
            vec![upstream],
            output,
            |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                fs_util::extract_zip(&inputs[0], output)?;
                Ok(SUCCESS)
            },
        )?;
        next.select_if(select)
    }

    pub fn untar(&self, select: Option<&str>) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let output = Artifact::new(naming::suffixed(upstream.basename(), ".untarred"))?;
        let next = self.append(
            "untar",
            vec![upstream],
            output,
            |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                fs_util::remove_path(output)?;
                fs::create_dir_all(output)
                    .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
                let args = vec![
                    "-xf".to_string(),
                    inputs[0].to_string(),
                    "-C".to_string(),
                    output.to_string(),
                ];
                tools::run_tool(&ToolInvocation::new("tar", args))
            },
        )?;
        next.select_if(select)
    }

    /// Decompresses a gzip (or concatenated multi-member gzip, as bgzip
    /// writes) file.
    pub fn gunzip(&self) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let output = Artifact::new(naming::suffixed(upstream.basename(), ".gunzipped"))?;
        self.append(
            "gunzip",
            vec![upstream],
            output,
            |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                let file = File::open(&inputs[0])
                    .map_err(|err| AcquireError::Filesystem(format!("open {}: {err}", inputs[0])))?;
                let mut decoder = MultiGzDecoder::new(BufReader::new(file));
                write_via_temp(output, |writer| {
                    io::copy(&mut decoder, writer).map(|_| ())
                })?;
                Ok(SUCCESS)
            },
        )
    }

    pub fn gzip(&self) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let output = Artifact::new(naming::suffixed(upstream.basename(), ".gz"))?;
        self.append(
            "gzip",
            vec![upstream],
            output,
            |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                let mut file = File::open(&inputs[0])
                    .map_err(|err| AcquireError::Filesystem(format!("open {}: {err}", inputs[0])))?;
                write_via_temp(output, |writer| {
                    let mut encoder = GzEncoder::new(writer, Compression::default());
                    io::copy(&mut file, &mut encoder)?;
                    encoder.finish().map(|_| ())
                })?;
                Ok(SUCCESS)
            },
        )
    }

    fn select_if(self, member: Option<&str>) -> Result<Self, AcquireError> {
        match member {
            Some(member) => self.select(member),
            None => Ok(self),
        }
    }
}

/// Streams into a temp file next to `output` and renames it into place once
/// `write` succeeds.
pub(crate) fn write_via_temp<F>(output: &Utf8Path, write: F) -> Result<(), AcquireError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let parent = output
        .parent()
        .ok_or_else(|| AcquireError::Filesystem("invalid destination path".to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("kira-acquire-stream")
        .tempfile_in(parent)
        .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    write(temp.as_file_mut()).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    temp.persist(output)
        .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    Ok(())
}
