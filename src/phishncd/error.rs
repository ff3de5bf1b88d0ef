use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClassifyError>;

#[derive(Error, Debug)]
pub enum ClassifyError {
    /// A corpus directory or list file is absent or unusable.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unable to decode artifact: {0}")]
    Decode(String),

    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassifyError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Decode(_) => "decode",
            Self::Network(_) => "network",
            Self::Validation(_) => "validation",
            Self::Io(_) => "io",
        }
    }
}

impl From<image::ImageError> for ClassifyError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}
