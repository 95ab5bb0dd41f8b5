use thiserror::Error;

#[derive(Error, Debug)]
pub enum UmbraError {
    #[error("Out of capacity: cannot admit {requested} bytes")]
    OutOfCapacity { requested: u64 },

    #[error("Invalid pointer: not issued by this allocator")]
    InvalidPointer,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, UmbraError>;
