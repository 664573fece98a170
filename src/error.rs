use std::fmt;

use thiserror::Error;

/// Failure of a window load or navigation.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("can't load without either html or url")]
    MissingInput,
    #[error(transparent)]
    Network(#[from] FetchError),
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("script runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("script error: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Failure of the fetch collaborator.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{url} is not valid UTF-8")]
    Encoding { url: String },
    #[error("unsupported scheme for {0}")]
    UnsupportedScheme(String),
    #[error("cannot resolve '{uri}' against {base}")]
    Unresolvable { uri: String, base: String },
}

/// Fault raised by a host object while serving a script request.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("{class} has no member named '{name}'")]
    NoSuchMember { class: String, name: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not implemented: {0}")]
    NotSupported(String),
    #[error("host object is no longer attached to a window")]
    Detached,
    #[error("value is not callable")]
    NotCallable,
    #[error("script callback failed: {0}")]
    Script(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
}

impl HostError {
    pub fn no_such_member(class: &str, name: &str) -> Self {
        Self::NoSuchMember {
            class: class.to_string(),
            name: name.to_string(),
        }
    }
}

/// Fault while converting or intercepting across the engine boundary.
///
/// These never reach script code; the bridge reports them and hands the engine
/// `undefined` instead.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown host handle {0}")]
    UnknownHandle(u32),
    #[error("unknown host class {0}")]
    UnknownClass(u32),
    #[error("value nesting exceeds {0} levels")]
    TooDeep(usize),
    #[error("script function belongs to another context")]
    ForeignFunction,
    #[error("bridge is detached from its context")]
    Detached,
    #[error("script threw: {0}")]
    Exception(String),
    #[error("engine error: {0}")]
    Engine(#[from] rquickjs::Error),
    #[error(transparent)]
    Host(#[from] HostError),
}

impl From<BridgeError> for HostError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Host(inner) => inner,
            other => HostError::Script(other.to_string()),
        }
    }
}

/// Failure creating or entering a script runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("QuickJS error: {0}")]
    Engine(#[from] rquickjs::Error),
    #[error("script runtime is already executing")]
    Busy,
    #[error("bridge error: {0}")]
    Bridge(String),
}

/// Script error raised while evaluating source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationError {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub stack: Option<String>,
}

impl EvaluationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            stack: None,
        }
    }
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: {}", self.message),
            (Some(file), None) => write!(f, "{file}: {}", self.message),
            (None, Some(line)) => write!(f, "line {line}: {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for EvaluationError {}
