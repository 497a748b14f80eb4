// ============================================================================
// ERRORS — one error type for every fallible canvas operation
// ============================================================================

use crate::canvas::LayerId;
use crate::ops::ai::CollaboratorError;

pub type CanvasResult<T> = Result<T, CanvasError>;

#[derive(Debug)]
pub enum CanvasError {
    /// Zero width or height on buffer create/resize or canvas resize/crop.
    InvalidDimensions { width: u32, height: u32 },
    /// A synchronous call referenced a layer id that is not in the stack.
    LayerNotFound(LayerId),
    UnsupportedBlendMode(String),
    UnsupportedFilterKind(String),
    InvalidParameter(String),
    Image(image::ImageError),
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
    Font(String),
    /// Opaque failure reported by the generative collaborator.
    Collaborator(CollaboratorError),
}

impl std::fmt::Display for CanvasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanvasError::InvalidDimensions { width, height } => {
                write!(f, "Invalid dimensions: {}x{}", width, height)
            }
            CanvasError::LayerNotFound(id) => write!(f, "Layer not found: {}", id),
            CanvasError::UnsupportedBlendMode(m) => write!(f, "Unsupported blend mode: {}", m),
            CanvasError::UnsupportedFilterKind(k) => write!(f, "Unsupported filter kind: {}", k),
            CanvasError::InvalidParameter(p) => write!(f, "Invalid parameter: {}", p),
            CanvasError::Image(e) => write!(f, "Image error: {}", e),
            CanvasError::Io(e) => write!(f, "I/O error: {}", e),
            CanvasError::Serialize(e) => write!(f, "Serialization error: {}", e),
            CanvasError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
            CanvasError::Font(e) => write!(f, "Font error: {}", e),
            CanvasError::Collaborator(e) => write!(f, "Collaborator error: {}", e),
        }
    }
}

impl std::error::Error for CanvasError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CanvasError::Image(e) => Some(e),
            CanvasError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CanvasError {
    fn from(e: std::io::Error) -> Self {
        CanvasError::Io(e)
    }
}

impl From<image::ImageError> for CanvasError {
    fn from(e: image::ImageError) -> Self {
        CanvasError::Image(e)
    }
}

impl From<Box<bincode::ErrorKind>> for CanvasError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CanvasError::Serialize(e.to_string())
    }
}

impl From<CollaboratorError> for CanvasError {
    fn from(e: CollaboratorError) -> Self {
        CanvasError::Collaborator(e)
    }
}
