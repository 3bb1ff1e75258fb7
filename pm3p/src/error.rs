use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("Could not open Modbus session: {0}")]
    Session(#[source] std::io::Error),

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    #[error("Poll task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}
