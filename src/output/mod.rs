//! Build plan schema and renderers

pub mod dockerfile;
pub mod schema;

pub use dockerfile::render as render_dockerfile;
pub use schema::{BuildPlan, BuildStep, CopySpec};
