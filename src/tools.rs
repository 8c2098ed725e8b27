//! External command steps: sort, bgzip, tabix and free-form shell commands.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::error::AcquireError;
use crate::fs_util;
use crate::naming;
use crate::pipeline::Pipeline;
use crate::step::SUCCESS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdout: Option<Utf8PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            stdout: None,
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stdout_to(mut self, path: &Utf8Path) -> Self {
        self.stdout = Some(path.to_path_buf());
        self
    }
}

/// Runs `invocation` to completion and returns its exit code. A process killed
/// by a signal reports `-1`.
pub fn run_tool(invocation: &ToolInvocation) -> Result<i32, AcquireError> {
    let program = find_in_path(&invocation.program)
        .ok_or_else(|| AcquireError::MissingTool(invocation.program.clone()))?;
    let mut cmd = Command::new(&program);
    cmd.args(&invocation.args);
    for (key, value) in &invocation.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null());
    cmd.stderr(Stdio::piped());
    match &invocation.stdout {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| AcquireError::Filesystem(format!("create {path}: {err}")))?;
            cmd.stdout(Stdio::from(file));
        }
        None => {
            cmd.stdout(Stdio::null());
        }
    }

    debug!(program = %program.display(), args = ?invocation.args, "spawning tool");
    let output = cmd
        .output()
        .map_err(|err| AcquireError::Filesystem(format!("{}: {err}", invocation.program)))?;
    let code = output.status.code().unwrap_or(-1);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(program = %invocation.program, code, stderr = %stderr, "tool exited with failure");
    }
    Ok(code)
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(name);
    if candidate.is_absolute() {
        return is_executable(&candidate).then_some(candidate);
    }
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        #[cfg(windows)]
        {
            let exe = path.join(format!("{name}.exe"));
            if is_executable(&exe) {
                return Some(exe);
            }
        }
        let plain = path.join(name);
        if is_executable(&plain) {
            return Some(plain);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Wraps `value` in single quotes for `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Substitutes `{input}`, `{inputs}` and `{output}` in a command template with
/// quoted paths.
pub fn render_command(template: &str, inputs: &[Utf8PathBuf], output: &Utf8Path) -> String {
    let first = inputs
        .first()
        .map(|path| shell_quote(path.as_str()))
        .unwrap_or_default();
    let all = inputs
        .iter()
        .map(|path| shell_quote(path.as_str()))
        .collect::<Vec<_>>()
        .join(" ");
    template
        .replace("{inputs}", &all)
        .replace("{input}", &first)
        .replace("{output}", &shell_quote(output.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabixPreset {
    Vcf,
    Bed,
    Gff,
    Sam,
}

impl fmt::Display for TabixPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabixPreset::Vcf => write!(f, "vcf"),
            TabixPreset::Bed => write!(f, "bed"),
            TabixPreset::Gff => write!(f, "gff"),
            TabixPreset::Sam => write!(f, "sam"),
        }
    }
}

impl FromStr for TabixPreset {
    type Err = AcquireError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vcf" => Ok(TabixPreset::Vcf),
            "bed" => Ok(TabixPreset::Bed),
            "gff" => Ok(TabixPreset::Gff),
            "sam" => Ok(TabixPreset::Sam),
            _ => Err(AcquireError::UnsupportedMethod(format!("tabix preset {value}"))),
        }
    }
}

impl Pipeline {
    /// Sorts the upstream file with `sort` under the C locale. `keys` are
    /// passed through verbatim, e.g. `["-k1,1", "-k2,2n"]`.
    pub fn sort(&self, keys: &[&str]) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let output = Artifact::new(naming::suffixed(upstream.basename(), ".sorted"))?;
        let keys = keys.iter().map(|key| key.to_string()).collect::<Vec<_>>();
        self.append(
            "sort",
            vec![upstream],
            output,
            move |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                let mut args = keys.clone();
                args.extend(["-o".to_string(), output.to_string(), inputs[0].to_string()]);
                run_tool(&ToolInvocation::new("sort", args).env("LC_ALL", "C"))
            },
        )
    }

    pub fn bgzip(&self) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let output = Artifact::new(naming::suffixed(upstream.basename(), ".bgz"))?;
        self.append(
            "bgzip",
            vec![upstream],
            output,
            |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                let args = vec!["-c".to_string(), inputs[0].to_string()];
                run_tool(&ToolInvocation::new("bgzip", args).stdout_to(output))
            },
        )
    }

    /// Builds a tabix index. tabix always writes `<input>.tbi`; an input that
    /// lives outside the working directory is staged next to the output first,
    /// so nothing is written beside the user's data.
    pub fn index(&self, preset: TabixPreset) -> Result<Self, AcquireError> {
        let upstream = self.output()?.clone();
        let output = Artifact::new(naming::suffixed(upstream.basename(), ".tbi"))?;
        self.append(
            "index",
            vec![upstream],
            output,
            move |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                let written = Utf8PathBuf::from(format!("{}.tbi", inputs[0]));
                if written.as_path() == output {
                    return run_tool(&tabix_invocation(preset, &inputs[0]));
                }
                let staged = StagedInput::next_to(&inputs[0], output)?;
                let code = run_tool(&tabix_invocation(preset, staged.path()))?;
                if code == SUCCESS {
                    fs_util::move_path(&staged.index_path(), output)?;
                }
                Ok(code)
            },
        )
    }

    /// Runs `template` through `sh -c`. The output name hashes the template
    /// and the upstream basename, so the same command on different inputs
    /// never shares an artifact.
    pub fn command(&self, template: &str) -> Result<Self, AcquireError> {
        if template.trim().is_empty() {
            return Err(AcquireError::InvalidConfiguration(
                "command must not be empty".to_string(),
            ));
        }
        let upstream = self.steps().last().map(|step| step.output().clone());
        let upstream_name = upstream
            .as_ref()
            .map(|artifact| artifact.basename().to_string())
            .unwrap_or_default();
        let output = Artifact::new(format!(
            "cmd-{}",
            naming::parameter_hash(&[upstream_name.as_str(), template])
        ))?;
        let template = template.to_string();
        self.append(
            "command",
            upstream.into_iter().collect(),
            output,
            move |inputs: &[Utf8PathBuf], output: &Utf8Path| {
                let script = render_command(&template, inputs, output);
                run_tool(&ToolInvocation::new(
                    "sh",
                    vec!["-c".to_string(), script],
                ))
            },
        )
    }
}

fn tabix_invocation(preset: TabixPreset, input: &Utf8Path) -> ToolInvocation {
    let args = vec![
        "-f".to_string(),
        "-p".to_string(),
        preset.to_string(),
        input.to_string(),
    ];
    ToolInvocation::new("tabix", args)
}

/// A link to (or copy of) an input file inside a scratch directory next to
/// the step output. The scratch directory goes away on drop.
struct StagedInput {
    _dir: tempfile::TempDir,
    path: Utf8PathBuf,
}

impl StagedInput {
    fn next_to(input: &Utf8Path, output: &Utf8Path) -> Result<Self, AcquireError> {
        let parent = output
            .parent()
            .ok_or_else(|| AcquireError::Filesystem("invalid destination path".to_string()))?;
        let dir = tempfile::Builder::new()
            .prefix("kira-acquire-stage")
            .tempdir_in(parent)
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        let staging_dir = Utf8Path::from_path(dir.path())
            .ok_or_else(|| AcquireError::Filesystem("non-utf8 staging path".to_string()))?;
        let path = staging_dir.join(input.file_name().unwrap_or("input"));
        link_or_copy(input, &path)?;
        Ok(Self { _dir: dir, path })
    }

    fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn index_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.tbi", self.path))
    }
}

#[cfg(unix)]
fn link_or_copy(source: &Utf8Path, dest: &Utf8Path) -> Result<(), AcquireError> {
    std::os::unix::fs::symlink(source, dest)
        .map_err(|err| AcquireError::Filesystem(format!("stage {source}: {err}")))
}

#[cfg(not(unix))]
fn link_or_copy(source: &Utf8Path, dest: &Utf8Path) -> Result<(), AcquireError> {
    fs::copy(source, dest)
        .map(|_| ())
        .map_err(|err| AcquireError::Filesystem(format!("stage {source}: {err}")))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn render_substitutes_placeholders() {
        let inputs = vec![Utf8PathBuf::from("/w/a"), Utf8PathBuf::from("/w/b c")];
        let script = render_command(
            "cat {inputs} | head -n1 > {output} && wc -l {input}",
            &inputs,
            Utf8Path::new("/w/out"),
        );
        assert_eq!(
            script,
            "cat '/w/a' '/w/b c' | head -n1 > '/w/out' && wc -l '/w/a'"
        );
    }

    #[test]
    fn preset_parsing() {
        assert_eq!("VCF".parse::<TabixPreset>().unwrap(), TabixPreset::Vcf);
        assert!("cram".parse::<TabixPreset>().is_err());
    }

    #[test]
    fn missing_tool_is_reported() {
        let err = run_tool(&ToolInvocation::new(
            "kira-acquire-definitely-missing-tool",
            Vec::new(),
        ))
        .unwrap_err();
        assert_matches!(err, AcquireError::MissingTool(_));
    }

    #[test]
    fn staged_input_lives_beside_the_output() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("data")).unwrap();
        fs::create_dir_all(root.join("work")).unwrap();
        let input = root.join("data/calls.vcf.gz");
        fs::write(&input, b"payload").unwrap();

        let staged_dir;
        {
            let staged = StagedInput::next_to(&input, &root.join("work/calls.vcf.gz.tbi")).unwrap();
            assert!(staged.path().starts_with(root.join("work")));
            assert_eq!(staged.path().file_name(), Some("calls.vcf.gz"));
            assert_eq!(fs::read(staged.path()).unwrap(), b"payload");
            assert_eq!(
                staged.index_path(),
                Utf8PathBuf::from(format!("{}.tbi", staged.path()))
            );
            staged_dir = staged.path().parent().unwrap().to_path_buf();
        }
        assert!(!staged_dir.exists());
        assert!(input.exists());
        assert_eq!(fs::read_dir(root.join("data")).unwrap().count(), 1);
    }

    #[test]
    fn tabix_arguments() {
        let invocation = tabix_invocation(TabixPreset::Bed, Utf8Path::new("/w/a.bed.gz"));
        assert_eq!(invocation.program, "tabix");
        assert_eq!(invocation.args, vec!["-f", "-p", "bed", "/w/a.bed.gz"]);
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_files_are_not_tools() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("tool.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(find_in_path(script.to_str().unwrap()).is_none());

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_in_path(script.to_str().unwrap()), Some(script.clone()));
        assert!(find_in_path(temp.path().to_str().unwrap()).is_none());
    }
}
