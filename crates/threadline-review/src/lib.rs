//! Rule evaluation, check orchestration, and fix detection.
//!
//! - [`llm`]: the generation-service seam and its OpenAI-compatible client
//! - [`prompt`]: grounding prompts and verdict parsing
//! - [`evaluator`]: one rule against one diff
//! - [`orchestrator`]: every rule concurrently, with a per-rule budget
//! - [`request`]: inbound request validation and the outbound report
//! - [`report`]: text and markdown rendering
//! - [`state`]: persisted checks
//! - [`fixes`]: attention → resolved transitions between checks

pub mod evaluator;
pub mod fixes;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod report;
pub mod request;
pub mod state;
