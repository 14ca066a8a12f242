#[derive(thiserror::Error, Debug)]
pub(crate) enum ServerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid proxy URL: {0}")]
    InvalidProxyUrl(String),
}
