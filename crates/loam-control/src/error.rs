use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown major pack version: {0:?}")]
    UnknownMajorPackVersion(String),

    #[error("corrupted control file")]
    CorruptedControlFile,

    #[error("control payload of {size} bytes exceeds the {page}-byte page")]
    PayloadTooLarge { size: usize, page: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ControlResult<T> = Result<T, ControlError>;
