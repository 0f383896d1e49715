use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Model checkpoint not found: {}", .0.display())]
    MissingCheckpoint(PathBuf),

    #[error("Invalid detection map shape: {0}")]
    MapShape(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
