//! LayerFE: a layered raster compositing engine.
//!
//! `project::CanvasSession` is the entry point. It owns the layer stack,
//! undo history and filter workers, and hands the render context a
//! `project::FrameSource` that always reads a complete snapshot.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::large_enum_variant)]

pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod error;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{BlendMode, Layer, LayerId, LayerKind, LayerStack, PixelBuffer, Transform};
pub use error::{CanvasError, CanvasResult};
pub use project::{CanvasSession, FrameSource, Interaction, LayerUpdate, SceneSnapshot};
