use crate::PicoStatus;
use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not open unit {}: {status}", serial.as_deref().unwrap_or("(first found)"))]
    Open {
        serial: Option<String>,
        status: PicoStatus,
    },
    #[error("{call} rejected: {status}")]
    Driver {
        call: &'static str,
        status: PicoStatus,
    },
    #[error("rapid block capture failed: {0}")]
    Capture(PicoStatus),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid acquisition configuration: {0}")]
    Config(String),
    #[error("serial listing needs {required} bytes but only {capacity} are available")]
    SerialListOverflow { capacity: usize, required: usize },
    #[error("malformed data file: {0}")]
    Format(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }

    pub(crate) fn driver(call: &'static str) -> impl FnOnce(PicoStatus) -> Error {
        move |status| Error::Driver { call, status }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
