// ============================================================================
// GENERATIVE COLLABORATOR BOUNDARY
// ============================================================================
//
// The network client lives outside this crate. It consumes JPEG previews
// exported from the session and hands back either a decoded bitmap or an
// opaque failure. Nothing here interprets why a generation failed beyond
// flagging the invalid-credentials condition.
// ============================================================================

use std::fmt;

/// Message the collaborator reports when the configured credentials do not
/// resolve to a usable model.
pub const INVALID_CREDENTIALS_MARKER: &str = "Requested entity was not found";

/// Aspect ratios the image generator accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AspectRatio {
    Wide,
    Landscape,
    Square,
    Portrait,
    Tall,
}

impl AspectRatio {
    /// Nearest supported ratio for a canvas of `width` × `height`.
    pub fn for_canvas(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return AspectRatio::Square;
        }
        let ratio = width as f32 / height as f32;
        if ratio >= 1.7 {
            AspectRatio::Wide
        } else if ratio >= 1.3 {
            AspectRatio::Landscape
        } else if ratio <= 0.6 {
            AspectRatio::Tall
        } else if ratio <= 0.8 {
            AspectRatio::Portrait
        } else {
            AspectRatio::Square
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Wide => "16:9",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Tall => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a JPEG preview is being sent to the collaborator for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewPurpose {
    /// Critique request, low fidelity is fine.
    Analyze,
    /// Style transfer, needs more detail.
    Remix,
}

impl PreviewPurpose {
    pub fn jpeg_quality(&self) -> u8 {
        match self {
            PreviewPurpose::Analyze => 50,
            PreviewPurpose::Remix => 80,
        }
    }
}

/// Where an accepted generated bitmap lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratedTarget {
    /// New image layer on top of the stack.
    Layer,
    /// Cover-fit into the background layer.
    Background,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollaboratorError {
    pub message: String,
    pub credentials_invalid: bool,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let credentials_invalid = message.contains(INVALID_CREDENTIALS_MARKER);
        Self { message, credentials_invalid }
    }
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.credentials_invalid {
            write!(f, "invalid credentials ({})", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for CollaboratorError {}
