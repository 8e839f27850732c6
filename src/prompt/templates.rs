//! Built-in section templates.
//!
//! Each section gates itself on its data so that an empty source renders to
//! an empty string and is dropped by the assembler.

pub const HEADER: &str = "header";
pub const MODE: &str = "mode";
pub const FILES: &str = "files";
pub const CHANGES: &str = "changes";
pub const EVALUATOR: &str = "evaluator";
pub const ENGINE: &str = "engine";
pub const FEEDBACK: &str = "feedback";
pub const ARTIFACTS: &str = "artifacts";
pub const AGENT_FEEDBACK: &str = "agent_feedback";
pub const AGENT_DIRECTIVE: &str = "agent_directive";

pub const COMPLETION_HEADER: &str = "completion_header";
pub const COMPLETION_CHANGES: &str = "completion_changes";
pub const COMPLETION_NEXT: &str = "completion_next";
pub const WAITING: &str = "waiting";

/// Iteration prompt sections, in output order
pub const ITERATION_SECTIONS: &[&str] = &[
    HEADER,
    MODE,
    FILES,
    CHANGES,
    EVALUATOR,
    ENGINE,
    FEEDBACK,
    ARTIFACTS,
    AGENT_FEEDBACK,
    AGENT_DIRECTIVE,
];

pub const COMPLETION_SECTIONS: &[&str] = &[COMPLETION_HEADER, COMPLETION_CHANGES, COMPLETION_NEXT];

pub const TEMPLATES: &[(&str, &str)] = &[
    (
        HEADER,
        "# Improvement loop: iteration {{progress}}\n\n**Goal:** {{goal}}\n\n**Targets:** {{targets}}",
    ),
    (
        MODE,
        "{{#if wrap_up}}## Your task\n\n\
The iteration budget is spent, so this is a wrap-up pass. Do not start new \
improvements. Review the accumulated changes, fix anything broken, then end \
your turn; the loop finishes after this.\
{{else if external}}## Your task\n\n\
The external engine has applied this iteration's change. Review the result \
against the goal and the signals below, repair anything it broke, then end \
your turn. The next iteration starts automatically.\
{{else}}## Your task\n\n\
Make ONE focused improvement to the targets that moves them toward the goal. \
Use the signals below to decide what to change, edit the files directly, then \
end your turn. The next iteration starts automatically.{{/if}}",
    ),
    (
        FILES,
        "{{#if files}}## Files in scope ({{files_total}})\n\n{{files}}{{#if files_more}}\n- ... and {{files_more}} more{{/if}}{{/if}}",
    ),
    (
        CHANGES,
        "{{#if change_stat}}## Changes so far\n\n```\n{{change_stat}}\n```{{/if}}",
    ),
    (
        EVALUATOR,
        "{{#if evaluator}}## Evaluator signal (exit {{evaluator.exit}})\n\n```\n{{evaluator.tail}}\n```{{/if}}",
    ),
    (
        ENGINE,
        "{{#if engine}}## Engine log (exit {{engine.exit}})\n\n```\n{{engine.tail}}\n```{{/if}}",
    ),
    (
        FEEDBACK,
        "{{#if feedback}}## Feedback signal (exit {{feedback.exit}})\n\n```\n{{feedback.tail}}\n```{{/if}}",
    ),
    (
        ARTIFACTS,
        "{{#if artifacts}}## Feedback artifacts\n\nInspect these files before changing anything:\n\n{{artifacts}}{{/if}}",
    ),
    (
        AGENT_FEEDBACK,
        "{{#if agent_feedback}}## Agent feedback\n\n{{agent_feedback}}{{/if}}",
    ),
    (
        AGENT_DIRECTIVE,
        "{{#if agent}}## Review agent\n\n\
After making the change, ask the `{{agent.name}}` agent to review it\
{{#if agent.description}} ({{agent.description}}){{/if}}. \
Write its notes to `{{agent.notes_path}}` so the next iteration can use them.{{/if}}",
    ),
    (
        COMPLETION_HEADER,
        "# Improvement loop complete: {{slug}}\n\n\
Finished {{completed}} iteration(s) toward the goal:\n\n{{goal}}",
    ),
    (
        COMPLETION_CHANGES,
        "{{#if change_stat}}## Change summary\n\n```\n{{change_stat}}\n```{{/if}}",
    ),
    (
        COMPLETION_NEXT,
        "## Suggested next steps\n\n\
- Review the accumulated changes and keep what works.\n\
- Run your tests or evaluator once more on the final state.\n\
- Start a new loop with a refined goal if more work remains.",
    ),
    (
        WAITING,
        "# Waiting for the external engine\n\n\
Loop {{slug}} is at iteration {{progress}}. The engine (pid {{pid}}) started \
{{elapsed_secs}}s ago and is still running. Do not edit the targets while it \
works. End your turn to check again.",
    ),
];
