use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    StateMismatch,
    MissingAuthCode,
    Payload(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::StateMismatch => write!(f, "authorization state missing or mismatched"),
            Error::MissingAuthCode => write!(f, "redirect URL carries no authorization code"),
            Error::Payload(msg) => write!(f, "payload error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
