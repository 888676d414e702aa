use std::{fmt, io};

#[derive(Debug)]
pub enum ConvError {
    Ply(String),
    CompressedPly(String),
    Splat(String),
    Ksplat(String),
    Spz(String),
    Sog(String),
    Validate(String),
    UnknownExtension(String),
    IoError(io::Error),
}

impl fmt::Display for ConvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvError::Ply(e) => {
                write!(f, "ply codec failed: {}", e)
            }
            ConvError::CompressedPly(e) => {
                write!(f, "compressed ply codec failed: {}", e)
            }
            ConvError::Splat(e) => {
                write!(f, "splat codec failed: {}", e)
            }
            ConvError::Ksplat(e) => {
                write!(f, "ksplat codec failed: {}", e)
            }
            ConvError::Spz(e) => {
                write!(f, "spz codec failed: {}", e)
            }
            ConvError::Sog(e) => {
                write!(f, "sog codec failed: {}", e)
            }
            ConvError::Validate(e) => {
                write!(f, "validation failed: {}", e)
            }
            ConvError::UnknownExtension(e) => {
                write!(f, "no handler registered for extension: {}", e)
            }
            ConvError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for ConvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConvError {
    fn from(e: io::Error) -> Self {
        ConvError::IoError(e)
    }
}
