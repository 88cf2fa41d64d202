use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("activation pipeline error: {0}")]
    Activation(#[from] activation::Error),
    #[error("hare pipeline error: {0}")]
    Hare(#[from] hare::Error),
}
