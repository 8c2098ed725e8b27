use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::artifact::Artifact;
use crate::config::{FetchSettings, FetchTool};
use crate::error::AcquireError;
use crate::naming;
use crate::pipeline::Pipeline;
use crate::step::SUCCESS;
use crate::tools::{self, ToolInvocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Network client behind `fetch` steps. Writes the resource to `destination`
/// and returns an exit status like any other action.
pub trait Downloader: Send + Sync {
    fn download(&self, request: &FetchRequest, destination: &Utf8Path)
    -> Result<i32, AcquireError>;
}

#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(settings: &FetchSettings) -> Result<Self, AcquireError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-acquire/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AcquireError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| AcquireError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, AcquireError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "request failed".to_string());
        Err(AcquireError::HttpStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, AcquireError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(AcquireError::Http(err.to_string()));
                }
            }
        }
    }
}

impl Downloader for HttpDownloader {
    fn download(
        &self,
        request: &FetchRequest,
        destination: &Utf8Path,
    ) -> Result<i32, AcquireError> {
        let response = self.send_with_retries(|| {
            let builder = self.client.get(request.url.clone());
            match &request.username {
                Some(user) => builder.basic_auth(user, request.password.as_deref()),
                None => builder,
            }
        })?;
        let mut response = Self::handle_status(response)?;

        let parent = destination
            .parent()
            .ok_or_else(|| AcquireError::Filesystem("invalid destination path".to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("kira-acquire-download")
            .tempfile_in(parent)
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| AcquireError::Http(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        Ok(SUCCESS)
    }
}

/// Downloads by shelling out to curl, wget or lftp.
#[derive(Debug, Clone, Copy)]
pub struct CommandDownloader {
    tool: FetchTool,
}

impl CommandDownloader {
    pub fn new(tool: FetchTool) -> Self {
        let tool = match tool {
            FetchTool::Native => FetchTool::Curl,
            other => other,
        };
        Self { tool }
    }

    pub fn invocation(&self, request: &FetchRequest, destination: &Utf8Path) -> ToolInvocation {
        let url = request.url.to_string();
        let out = destination.to_string();
        let credentials = request
            .username
            .as_deref()
            .map(|user| (user, request.password.as_deref().unwrap_or_default()));
        match self.tool {
            FetchTool::Native | FetchTool::Curl => {
                let mut args = vec!["-fsSL".to_string()];
                if let Some((user, password)) = credentials {
                    args.push("-u".to_string());
                    args.push(format!("{user}:{password}"));
                }
                args.extend(["-o".to_string(), out, url]);
                ToolInvocation::new("curl", args)
            }
            FetchTool::Wget => {
                let mut args = vec!["-q".to_string()];
                if let Some((user, password)) = credentials {
                    args.push(format!("--user={user}"));
                    args.push(format!("--password={password}"));
                }
                args.extend(["-O".to_string(), out, url]);
                ToolInvocation::new("wget", args)
            }
            FetchTool::Lftp => {
                let mut args = Vec::new();
                if let Some((user, password)) = credentials {
                    args.push("-u".to_string());
                    args.push(format!("{user},{password}"));
                }
                args.push("-c".to_string());
                args.push(format!(
                    "get {} -o {}",
                    tools::shell_quote(&url),
                    tools::shell_quote(&out)
                ));
                ToolInvocation::new("lftp", args)
            }
        }
    }
}

impl Downloader for CommandDownloader {
    fn download(
        &self,
        request: &FetchRequest,
        destination: &Utf8Path,
    ) -> Result<i32, AcquireError> {
        tools::run_tool(&self.invocation(request, destination))
    }
}

/// Picks the client for `request` when none was injected into the pipeline.
pub fn default_downloader(
    settings: &FetchSettings,
    request: &FetchRequest,
) -> Result<Box<dyn Downloader>, AcquireError> {
    let is_http = matches!(request.url.scheme(), "http" | "https");
    match settings.tool {
        FetchTool::Native if is_http => Ok(Box::new(HttpDownloader::new(settings)?)),
        tool => Ok(Box::new(CommandDownloader::new(tool))),
    }
}

impl Pipeline {
    pub fn fetch(&self, url: &str) -> Result<Self, AcquireError> {
        self.fetch_request(url, None, None)
    }

    pub fn fetch_with_credentials(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, AcquireError> {
        self.fetch_request(url, Some(username), Some(password))
    }

    fn fetch_request(
        &self,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, AcquireError> {
        let url = Url::parse(url.trim())
            .map_err(|err| AcquireError::InvalidConfiguration(format!("invalid url {url}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https" | "ftp") {
            return Err(AcquireError::UnsupportedMethod(format!(
                "fetch scheme {}",
                url.scheme()
            )));
        }

        let output = Artifact::new(naming::fetch_basename(&url, username, password))?;
        let request = FetchRequest {
            url,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        };
        let settings = self.fetch_settings().clone();
        let injected = self.downloader();

        self.append(
            "fetch",
            Vec::new(),
            output,
            move |_inputs: &[Utf8PathBuf], output: &Utf8Path| {
                debug!(url = %request.url, path = %output, "downloading");
                match &injected {
                    Some(downloader) => downloader.download(&request, output),
                    None => default_downloader(&settings, &request)?.download(&request, output),
                }
            },
        )
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
