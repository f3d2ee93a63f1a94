use thiserror::Error;

#[derive(Error, Debug)]
pub enum VitalsError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Duplicate metric name: {0}")]
    DuplicateName(String),

    #[error("Registry has been destroyed")]
    RegistryClosed,

    #[error("No active registry: set up a live registry before starting the push daemon")]
    NoActiveRegistry,

    #[error("Failed to bind exposition listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Transport initialization failed: {0}")]
    TransportInit(String),

    #[error("Transport send failed: {0}")]
    TransportSend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VitalsError>;
