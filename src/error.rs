use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AcquireError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("step `{step}` is missing input {path}")]
    MissingInput { step: String, path: String },

    #[error("step `{step}` failed with status {status}")]
    StepFailed { step: String, status: i32 },

    #[error("step `{step}` failed")]
    ActionFailed {
        step: String,
        #[source]
        source: Box<AcquireError>,
    },

    #[error("pipeline has no steps")]
    EmptyPipeline,

    #[error("artifact `{0}` has no directory bound")]
    NotConfigured(String),

    #[error("cannot mark {0} complete: path does not exist")]
    PreconditionFailed(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("missing config file kira-acquire.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no pipeline named `{0}` in config")]
    UnknownPipeline(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("download failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),
}
