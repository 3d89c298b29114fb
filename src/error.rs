// (c) Roel Kluin, 2023, GPL v3

use thiserror::Error;

/// Errors raised by the screening core. Everything above it uses anyhow.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScreenError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid window length: expected {expected}, found {found}")]
    InvalidLength { expected: usize, found: usize },
}

pub type ScreenResult<T> = std::result::Result<T, ScreenError>;

macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::ScreenError::InvalidConfig(format!($($arg)*)).into());
        }
    };
}
pub(crate) use ensure_config;
