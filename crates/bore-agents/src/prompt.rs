//! Prompt seam between the engine and the prompt-template layer.
//!
//! Full template bodies live outside this workspace; the engine only needs a
//! string per agent call. `DefaultPrompts` renders compact sections so the
//! workspace runs end-to-end without the UI layer.

use std::fmt::Write;

use bore_core::types::{Crew, Task};

use crate::types::{ExecutionBrief, WorkerNeed, WorkerResult};

/// Supplies the engine with one prompt string per agent call.
pub trait PromptSource: Send + Sync {
    fn boss_plan_prompt(
        &self,
        task: &Task,
        brief: &ExecutionBrief,
        crew: Option<&Crew>,
        worker_budget: i64,
    ) -> String;

    fn worker_prompt(&self, need: &WorkerNeed, crew: Option<&Crew>) -> String;

    fn boss_summary_prompt(
        &self,
        task: &Task,
        brief: &ExecutionBrief,
        crew: Option<&Crew>,
        results: &[WorkerResult],
    ) -> String;
}

/// Minimal built-in prompt rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrompts;

impl PromptSource for DefaultPrompts {
    fn boss_plan_prompt(
        &self,
        task: &Task,
        brief: &ExecutionBrief,
        crew: Option<&Crew>,
        worker_budget: i64,
    ) -> String {
        let mut out = String::new();
        out.push_str(
            "You are Boss, a manager-only agent. Plan the task below as steps, \
             each mapping to one worker with a narrow role. Do not edit files \
             yourself. Respond with ONLY a JSON object of type \"boss_plan\" \
             with fields steps, validation, estimated_files, needs_workers.\n\n",
        );
        let _ = write!(out, "## Task\n\n{}\n\n", task.prompt);
        let _ = write!(out, "- Mode: {}\n", task.mode);
        let _ = write!(out, "- Worker budget: {worker_budget}\n");
        write_brief(&mut out, brief);
        write_crew(&mut out, crew);
        out
    }

    fn worker_prompt(&self, need: &WorkerNeed, crew: Option<&Crew>) -> String {
        let mut out = String::new();
        out.push_str(
            "You are a Worker agent operating inside a git worktree. Make the \
             required changes, run only the allowed commands, and respond with \
             ONLY a JSON object of type \"worker_result\" with fields outcome, \
             summary, files_changed, commands_run, validation_results, notes, \
             blockers.\n\n## Assignment\n\n",
        );
        let _ = write!(out, "- Role: {}\n- Goal: {}\n", need.role, need.goal);
        write_list(&mut out, "Target files/paths", &need.files_or_paths);
        write_list(&mut out, "Allowed commands", &need.commands);
        write_list(&mut out, "Success criteria", &need.success_criteria);
        write_crew(&mut out, crew);
        out
    }

    fn boss_summary_prompt(
        &self,
        task: &Task,
        brief: &ExecutionBrief,
        crew: Option<&Crew>,
        results: &[WorkerResult],
    ) -> String {
        let mut out = String::new();
        out.push_str(
            "You are Boss. Review the worker results below and produce the \
             final summary. Respond with ONLY a JSON object of type \
             \"boss_summary\" with fields outcome (success | partial | \
             failed), what_changed, files_touched, commands_run, \
             validation_results, risks_or_followups, lessons.\n\n",
        );
        let _ = write!(out, "## Task\n\n{}\n\n", task.prompt);
        write_brief(&mut out, brief);
        write_crew(&mut out, crew);

        out.push_str("## Worker Results\n\n");
        if results.is_empty() {
            out.push_str("No worker results collected.\n");
        }
        for (i, result) in results.iter().enumerate() {
            let _ = write!(out, "### Worker {} - {}\n\n", i + 1, result.outcome);
            if !result.summary.is_empty() {
                let _ = write!(out, "{}\n\n", result.summary);
            }
            write_list(&mut out, "Files changed", &result.files_changed);
            write_list(&mut out, "Blockers", &result.blockers);
        }
        out
    }
}

fn write_brief(out: &mut String, brief: &ExecutionBrief) {
    out.push_str("\n## Execution Brief\n\n");
    let _ = write!(out, "- Task title: {}\n", brief.task_title);
    let _ = write!(out, "- Base branch: {}\n", brief.base_branch);
    if !brief.thread.is_empty() {
        let _ = write!(out, "- Thread: {}\n", brief.thread);
    }
    write_list(out, "Scope", &brief.scope);
    write_list(out, "Not in scope", &brief.not_in_scope);
    write_list(out, "Success criteria", &brief.success_criteria);
    write_list(out, "Key risks", &brief.key_risks);
    out.push('\n');
}

fn write_crew(out: &mut String, crew: Option<&Crew>) {
    match crew {
        Some(crew) => {
            let _ = write!(out, "- Crew: {}\n- Crew objective: {}\n", crew.name, crew.objective);
            if !crew.constraints.is_empty() {
                let _ = write!(out, "- Crew constraints: {}\n", crew.constraints);
            }
            if !crew.allowed_commands.is_empty() {
                let _ = write!(out, "- Allowed commands: {}\n", crew.allowed_commands);
            }
            if !crew.ownership_paths.is_empty() {
                let _ = write!(out, "- Ownership paths: {}\n", crew.ownership_paths);
            }
        }
        None => out.push_str("- Crew: none (no crew constraints)\n"),
    }
}

fn write_list(out: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = write!(out, "- {label}:\n");
    for item in items {
        let _ = write!(out, "  - {item}\n");
    }
}
