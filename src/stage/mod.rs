//! The three pipeline stages: base, builder and final

pub mod base;
pub mod builder;
pub mod final_stage;

pub use base::{BaseEnvironment, RuntimeFlags, StageEnvironment};
pub use builder::{BuildError, BuildInputs, ContainmentProblem, EnvironmentBuilder};
pub use final_stage::{ImagePromoter, PromotionError};
