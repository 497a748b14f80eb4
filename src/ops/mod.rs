pub mod adjustments;
pub mod ai;
pub mod canvas_ops;
pub mod effects;
pub mod engine;
pub mod filters;
pub mod text;
