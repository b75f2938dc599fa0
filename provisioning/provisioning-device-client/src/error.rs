// Copyright (c) Microsoft. All rights reserved.

#[derive(Debug)]
pub enum Error {
    InvalidParameter(&'static str, Box<dyn std::error::Error + Send + Sync>),
    Client(String),
    Security(Box<dyn std::error::Error + Send + Sync>),
    Authentication(String),
    Hub(String),
    Transport(std::io::Error),
    Timeout(std::time::Duration),
    Execution(String),
    ReadConfig(
        Option<std::path::PathBuf>,
        Box<dyn std::error::Error + Send + Sync>,
    ),
}

impl Error {
    pub(crate) fn invalid_parameter<E>(name: &'static str, err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::InvalidParameter(name, err.into())
    }

    pub(crate) fn security<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Security(err.into())
    }

    pub(crate) fn client(message: impl std::fmt::Display) -> Self {
        Error::Client(message.to_string())
    }

    pub(crate) fn authentication(message: impl std::fmt::Display) -> Self {
        Error::Authentication(message.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidParameter(name, _) => {
                write!(f, "parameter {:?} has an invalid value", name)
            }
            Error::Client(message) => write!(f, "provisioning client error: {}", message),
            Error::Security(_) => f.write_str("security provider error"),
            Error::Authentication(message) => {
                write!(f, "provisioning authentication error: {}", message)
            }
            Error::Hub(message) => write!(f, "provisioning service error: {}", message),
            Error::Transport(_) => f.write_str("provisioning transport error"),
            Error::Timeout(timeout) => {
                write!(f, "operation did not complete within {:?}", timeout)
            }
            Error::Execution(message) => write!(f, "task execution failed: {}", message),
            Error::ReadConfig(Some(path), _) => {
                write!(f, "could not read config from {}", path.display())
            }
            Error::ReadConfig(None, _) => f.write_str("could not read config"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        #[allow(clippy::match_same_arms)]
        match self {
            Error::InvalidParameter(_, err) => Some(&**err),
            Error::Security(err) => Some(&**err),
            Error::Transport(err) => Some(err),
            Error::ReadConfig(_, err) => Some(&**err),
            Error::Client(_)
            | Error::Authentication(_)
            | Error::Hub(_)
            | Error::Timeout(_)
            | Error::Execution(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err)
    }
}
