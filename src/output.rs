use std::io::{self, Write};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub pipelines: Vec<RunItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunItem {
    pub name: String,
    pub path: String,
    /// `cached` when the final artifact was already complete, else `acquired`.
    pub action: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathsResult {
    pub pipelines: Vec<PathItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathItem {
    pub name: String,
    pub path: String,
    pub complete: bool,
    pub steps: Vec<String>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_paths(result: &PathsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
