use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for eth-affinity operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for eth-affinity operations.
#[derive(Debug)]
pub enum Error {
    /// The online CPU list could not be read.
    OnlineCpus { path: PathBuf, source: io::Error },
    /// A CPU list or range was malformed.
    CpuList(String),
    /// The interrupt tree could not be opened.
    IrqDir { path: PathBuf, source: io::Error },
    /// The previous affinity of a plain device irq could not be read.
    PriorAffinity { path: PathBuf, source: io::Error },
    /// Writing a control file failed.
    Write { path: PathBuf, source: io::Error },
    /// Invalid option combination or value.
    Options(String),
    /// Writing the report failed.
    Output(io::Error),
}

impl Error {
    /// Whether this error ends the whole run rather than a single device.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::OnlineCpus { .. } | Error::CpuList(_) | Error::IrqDir { .. } | Error::Options(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OnlineCpus { path, source } => write!(
                f,
                "failed to read number of CPUs online from {}: {source}",
                path.display()
            ),
            Error::CpuList(s) => write!(f, "invalid CPU list '{s}'"),
            Error::IrqDir { path, source } => {
                write!(f, "failed to open {}: {source}", path.display())
            }
            Error::PriorAffinity { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            Error::Write { path, source } => {
                write!(f, "failed to write '{}': {source}", path.display())
            }
            Error::Options(msg) => write!(f, "syntax error in options: {msg}"),
            Error::Output(e) => write!(f, "failed to write report: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::OnlineCpus { source, .. }
            | Error::IrqDir { source, .. }
            | Error::PriorAffinity { source, .. }
            | Error::Write { source, .. } => Some(source),
            Error::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Output(e)
    }
}
