//! LLM-backed classification capability.
//!
//! The model is only asked to name a category and a score. Calibration,
//! retries, priority and routing stay in `routedesk-core`, so a misbehaving
//! model can at worst push a request into the review queue.

pub mod classifier;
pub mod llm;

pub use classifier::{LlmTextClassifier, ParsedVerdict};
pub use llm::{LlmClient, LlmRequest};
