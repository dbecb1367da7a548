//! Error types for generator construction, input validation and weight loading.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("generator architecture `{0}` is not recognized")]
    UnknownArchitecture(String),

    #[error("padding mode `{0}` is not supported")]
    UnsupportedPadding(String),

    #[error("normalization layer `{0}` is not found")]
    UnknownNorm(String),

    #[error("initialization method `{0}` is not implemented")]
    UnknownInit(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{axis} top-k must be a positive integer, got {value}")]
    InvalidTopK { axis: &'static str, value: usize },

    #[error("asymmetric encoder/decoder: {down} downsample stages vs {up} upsample stages")]
    AsymmetricStages { down: usize, up: usize },

    #[error("invalid input of shape {shape:?}: {reason}")]
    InvalidInput { shape: [usize; 4], reason: String },

    #[error("parameter `{0}` is missing from the weight blob")]
    MissingParameter(String),

    #[error("parameter `{0}` is registered twice")]
    DuplicateParameter(String),

    #[error("shape mismatch for `{name}`: graph expects {expected:?}, blob has {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("weight blob entries match no parameter: {0:?}")]
    UnexpectedParameters(Vec<String>),

    #[error("tensor `{name}` holds {actual} values but its shape needs {expected}")]
    CorruptTensor {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, GeneratorError>;
