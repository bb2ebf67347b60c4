//! The maistro agent: one user turn at a time.
//!
//! Each turn follows an **assistant → route → act** cycle:
//!
//! 1. **Render** the system prompt from the stored to-do list and instructions
//! 2. **Ask** the assistant, offering `UpdateMemory` plus every external tool
//! 3. **Route** on the tool invocations it returned:
//!    - external tools run concurrently and their results are appended
//!    - `UpdateMemory` runs the matching [`Reflector`] path
//!    - anything else ends the turn
//! 4. **Loop** back to step 1 until the turn ends or the iteration limit hits

pub mod completion;
pub mod extract;
pub mod prompts;
pub mod reflect;
pub mod router;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use extract::{ExistingRecord, ExtractedChange, ExtractionRequest, Extractor, ToolCallExtractor};
pub use reflect::{Reflection, Reflector, merge_message_runs, summarize_changes};
pub use router::{RouterDecision, ToolTarget, UPDATE_MEMORY_TOOL, UpdateType, classify, route};
pub use turn::{StopReason, TurnLoop, TurnOutcome};
