use std::fmt;

/// Custom error type for txt2img operations
/// Implements Clone for sending through channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Request rejected locally, before any upstream call
    InvalidInput(String)
  , /// Upstream rejected the call, returned a failure payload,
    /// or stayed unreachable
    UpstreamError(String)
  , /// The job itself reached `failed` or `canceled`
    TerminalFailure
    {   status: String
      , message: String
    }
  , /// API token is missing
    MissingApiKey(String)
  , /// Transport-level HTTP error
    HttpError(String)
  , /// Failed to parse API response
    ParseError(String)
  , /// Invalid configuration
    InvalidConfiguration(String)
  , /// Timeout error
    Timeout
  , /// Poll loop gave up after this many status queries
    PollLimitExceeded(u32)
  , /// No active job with this id
    JobNotFound(String)
  , /// Gallery persistence failed
    StorageError(String)
  , /// Generic error
    Other(String)
}

impl Error
{   /// Whether a poll iteration may be retried after this error
    pub fn is_transient(&self) -> bool
    {   matches!(self, Error::HttpError(_) | Error::Timeout)
    }

    /// Fold any non-input failure into `UpstreamError`
    pub fn into_upstream(self) -> Error
    {   match self
        {   Error::InvalidInput(_) | Error::UpstreamError(_) => self
          , other => Error::UpstreamError(other.to_string())
        }
    }
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::InvalidInput(msg) => {
              write!(f, "Invalid input: {}", msg)
            }
          , Error::UpstreamError(msg) => {
              write!(f, "Upstream error: {}", msg)
            }
          , Error::TerminalFailure { status, message } => {
              write!(f, "Generation {}: {}", status, message)
            }
          , Error::MissingApiKey(name) => {
              write!(f, "Missing API key: {}", name)
            }
          , Error::HttpError(msg) => {
              write!(f, "HTTP error: {}", msg)
            }
          , Error::ParseError(msg) => {
              write!(f, "Parse error: {}", msg)
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::Timeout => {
              write!(f, "Request timed out")
            }
          , Error::PollLimitExceeded(polls) => {
              write!(f,
                "Gave up waiting after {} status queries",
                polls
              )
            }
          , Error::JobNotFound(id) => {
              write!(f, "No active job: {}", id)
            }
          , Error::StorageError(msg) => {
              write!(f, "Storage error: {}", msg)
            }
          , Error::Other(msg) => {
              write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error
{   fn from(s: String) -> Self
    {   Error::Other(s)
    }
}

impl From<&str> for Error
{   fn from(s: &str) -> Self
    {   Error::Other(s.to_string())
    }
}
