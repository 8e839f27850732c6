//! Prompt System - section templates and the assembler
//!
//! Prompts are built from Handlebars section templates; sections whose data
//! is empty are dropped so no bare headers reach the host.

mod assembler;
mod render;
mod templates;

pub use assembler::{
    AgentView, CompletionInput, PromptAssembler, PromptInput, RenderedPrompt, SignalView, WaitingInput, status_line,
};
pub use render::PromptRenderer;
