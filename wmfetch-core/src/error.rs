use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Decode Error - {0}")]
    Decode(String),

    #[error("KV Error - {0}")]
    KV(String),
}
