pub mod tensorzero;
pub mod vision;

pub use tensorzero::{ContentBlock, LlmClient, LlmConfig, VisionMessage};
