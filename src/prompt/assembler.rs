//! Prompt Assembler - builds the text handed back to the host.
//!
//! Rendering is a pure function of its input: the same `PromptInput` always
//! produces byte-identical output.

use serde::Serialize;
use serde_json::json;

use super::render::PromptRenderer;
use super::templates::{COMPLETION_SECTIONS, ITERATION_SECTIONS, TEMPLATES, WAITING};
use crate::domain::loop_record::{InferenceMode, progress_label};
use crate::error::Result;

const SECTION_SEPARATOR: &str = "\n\n";

/// A hook or engine result as shown in the prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalView {
    pub exit: String,
    pub tail: String,
}

/// Feedback agent the actor should consult
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentView {
    pub name: String,
    pub description: Option<String>,
    pub notes_path: String,
}

/// Everything an iteration prompt may show
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptInput {
    pub slug: String,
    pub goal: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub targets: String,
    pub mode: InferenceMode,
    pub files: Vec<String>,
    pub files_total: usize,
    pub change_stat: Option<String>,
    pub evaluator: Option<SignalView>,
    pub engine: Option<SignalView>,
    pub feedback: Option<SignalView>,
    pub artifacts: Vec<String>,
    pub agent_feedback: Option<String>,
    pub agent: Option<AgentView>,
}

/// Input for the final summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionInput {
    pub slug: String,
    pub goal: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub change_stat: Option<String>,
}

/// Input for the "engine still running" notice
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitingInput {
    pub slug: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub pid: u32,
    pub elapsed_secs: u64,
}

/// Rendered text plus the short status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub text: String,
    pub status: String,
}

/// Status line, e.g. `turnloop docs-1a2b: iteration 2/3`
pub fn status_line(slug: &str, iteration: u32, max_iterations: u32) -> String {
    format!("turnloop {}: iteration {}", slug, progress_label(iteration, max_iterations))
}

pub struct PromptAssembler {
    renderer: PromptRenderer,
}

impl PromptAssembler {
    /// Create an assembler with the built-in section templates registered
    pub fn new() -> Result<Self> {
        let mut renderer = PromptRenderer::new();
        for (name, template) in TEMPLATES {
            renderer.register_template(name, template)?;
        }
        Ok(Self { renderer })
    }

    /// Render the next-iteration prompt
    pub fn assemble(&self, input: &PromptInput) -> Result<RenderedPrompt> {
        let shown = input.files.len();
        let context = json!({
            "slug": input.slug,
            "goal": input.goal.trim(),
            "progress": progress_label(input.iteration, input.max_iterations),
            "targets": input.targets,
            "external": input.mode == InferenceMode::ExternalEngine,
            "wrap_up": input.max_iterations > 0 && input.iteration > input.max_iterations,
            "files": bullet_list(&input.files),
            "files_total": input.files_total,
            "files_more": input.files_total.saturating_sub(shown),
            "change_stat": non_blank(input.change_stat.as_deref()),
            "evaluator": input.evaluator.as_ref().map(present_signal),
            "engine": input.engine.as_ref().map(present_signal),
            "feedback": input.feedback.as_ref().map(present_signal),
            "artifacts": bullet_list(&input.artifacts),
            "agent_feedback": non_blank(input.agent_feedback.as_deref()),
            "agent": input.agent,
        });

        Ok(RenderedPrompt {
            text: self.join_sections(ITERATION_SECTIONS, &context)?,
            status: status_line(&input.slug, input.iteration, input.max_iterations),
        })
    }

    /// Render the summary emitted once the budget is spent
    pub fn completion(&self, input: &CompletionInput) -> Result<RenderedPrompt> {
        let completed = input.iteration.saturating_sub(1);
        let context = json!({
            "slug": input.slug,
            "goal": input.goal.trim(),
            "completed": completed,
            "change_stat": non_blank(input.change_stat.as_deref()),
        });

        Ok(RenderedPrompt {
            text: self.join_sections(COMPLETION_SECTIONS, &context)?,
            status: format!(
                "turnloop {}: complete after {} iteration(s)",
                input.slug, completed
            ),
        })
    }

    /// Render the notice emitted while a background engine job runs
    pub fn waiting(&self, input: &WaitingInput) -> Result<RenderedPrompt> {
        let context = json!({
            "slug": input.slug,
            "progress": progress_label(input.iteration, input.max_iterations),
            "pid": input.pid,
            "elapsed_secs": input.elapsed_secs,
        });

        Ok(RenderedPrompt {
            text: self.renderer.render_named(WAITING, &context)?.trim().to_string(),
            status: format!(
                "{} (waiting for engine)",
                status_line(&input.slug, input.iteration, input.max_iterations)
            ),
        })
    }

    fn join_sections(&self, sections: &[&str], context: &serde_json::Value) -> Result<String> {
        let mut rendered = Vec::with_capacity(sections.len());
        for name in sections {
            let text = self.renderer.render_named(name, context)?;
            let text = text.trim();
            if !text.is_empty() {
                rendered.push(text.to_string());
            }
        }
        Ok(rendered.join(SECTION_SEPARATOR))
    }
}

fn present_signal(signal: &SignalView) -> SignalView {
    let tail = signal.tail.trim_end();
    SignalView {
        exit: signal.exit.clone(),
        tail: if tail.trim().is_empty() {
            "(no output)".to_string()
        } else {
            tail.to_string()
        },
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim_end).filter(|t| !t.trim().is_empty())
}

fn bullet_list(items: &[String]) -> String {
    items.iter().map(|item| format!("- {}", item)).collect::<Vec<_>>().join("\n")
}
