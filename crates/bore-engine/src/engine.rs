//! Phased state machine driving one execution end-to-end:
//! start -> boss plan -> per-worker fan-out -> boss summary -> finish.
//!
//! Within one execution the boss and workers run strictly sequentially; each
//! worker holds a slot from the global scheduler while its CLI call is in
//! flight. Worker failures are recorded and never prevent the summary phase.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use bore_agents::parse::parse_response;
use bore_agents::prompt::PromptSource;
use bore_agents::types::{AgentResponse, BossPlan, BossSummary, ExecutionBrief, WorkerNeed, WorkerResult};
use bore_core::cancel::CancelToken;
use bore_core::types::{
    AgentType, Crew, EventLevel, Execution, LessonType, Outcome, Status, Task,
};
use bore_git::Repo;
use bore_process::runner::AgentRunner;
use bore_process::scheduler::WorkerScheduler;

use crate::artifacts::RunArtifacts;
use crate::store::{SqliteStore, StoreError};

/// Default number of workers a Boss may spawn per execution.
pub const DEFAULT_WORKER_BUDGET: i64 = 3;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine: {source}")]
    Store {
        #[from]
        source: StoreError,
    },
    #[error("engine: boss plan: {reason}")]
    BossPlan { reason: String },
    #[error("engine: execution cancelled")]
    Cancelled,
    #[error("engine: execution phase panicked: {message}")]
    Panicked { message: String },
}

/// Receives streaming progress from the engine. Out-of-scope front-ends
/// (TUI, SSE fan-out) subscribe here.
pub trait EventSink: Send + Sync {
    fn event(&self, execution_id: i64, level: EventLevel, event_type: &str, message: &str);
    fn agent_output(&self, execution_id: i64, line: &str);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn event(&self, _: i64, _: EventLevel, _: &str, _: &str) {}
    fn agent_output(&self, _: i64, _: &str) {}
}

pub struct ExecutionEngine {
    store: Arc<SqliteStore>,
    repo: Repo,
    runner: AgentRunner,
    scheduler: Arc<WorkerScheduler>,
    prompts: Arc<dyn PromptSource>,
    artifacts: RunArtifacts,
    sink: Arc<dyn EventSink>,
    worker_budget: i64,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<SqliteStore>,
        repo: Repo,
        runner: AgentRunner,
        scheduler: Arc<WorkerScheduler>,
        prompts: Arc<dyn PromptSource>,
        artifacts: RunArtifacts,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            repo,
            runner,
            scheduler,
            prompts,
            artifacts,
            sink,
            worker_budget: DEFAULT_WORKER_BUDGET,
        }
    }

    /// Drives the execution to a terminal status using a minimal brief built
    /// from the execution row. Callers holding the Commander's brief use
    /// [`ExecutionEngine::run_with_brief`].
    pub fn run(&self, token: &CancelToken, execution_id: i64) -> Result<Status, EngineError> {
        self.run_with_brief(token, execution_id, None)
    }

    /// Drives the execution to a terminal status. Runs on the caller's
    /// thread; spawn one thread per execution for parallel runs.
    ///
    /// An unexpected panic inside a phase is caught, logged, and the
    /// execution marked failed.
    pub fn run_with_brief(
        &self,
        token: &CancelToken,
        execution_id: i64,
        brief: Option<ExecutionBrief>,
    ) -> Result<Status, EngineError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.run_phases(token, execution_id, brief)
        }));

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(execution_id, %message, "execution phase panicked");
                self.record_event(
                    execution_id,
                    EventLevel::Error,
                    "execution_panic",
                    &format!("Execution phase panicked: {message}"),
                );
                if let Ok(execution) = self.store.get_execution(execution_id) {
                    self.mark_failed(&execution, self.store.get_task(execution.task_id).ok().as_ref());
                }
                Err(EngineError::Panicked { message })
            }
        }
    }

    fn run_phases(
        &self,
        token: &CancelToken,
        execution_id: i64,
        brief: Option<ExecutionBrief>,
    ) -> Result<Status, EngineError> {
        let execution = self.store.get_execution(execution_id)?;

        let task = match self.store.get_task(execution.task_id) {
            Ok(task) => task,
            Err(err) => {
                self.mark_failed(&execution, None);
                return Err(err.into());
            }
        };

        // start
        if let Err(err) = self.store.set_execution_started(execution.id) {
            self.mark_failed(&execution, Some(&task));
            return Err(err.into());
        }
        self.record_event(
            execution.id,
            EventLevel::Info,
            "execution_start",
            "Execution started",
        );

        let crew = match execution.crew_id {
            Some(crew_id) => match self.store.get_crew(crew_id) {
                Ok(crew) => Some(crew),
                Err(err) => {
                    self.record_event(
                        execution.id,
                        EventLevel::Error,
                        "boss_plan_error",
                        &format!("Failed to load crew: {err}"),
                    );
                    self.mark_failed(&execution, Some(&task));
                    return Err(err.into());
                }
            },
            None => None,
        };

        let brief = brief.unwrap_or_else(|| brief_from_execution(&execution, &task));

        // bossPlan
        let plan = self.boss_plan(token, &execution, &task, &brief, crew.as_ref())?;

        // runningWorkers[i]
        let total = plan.needs_workers.len();
        let mut results = Vec::with_capacity(total);
        for (index, need) in plan.needs_workers.iter().enumerate() {
            if let Some(result) = self.run_worker(token, &execution, need, crew.as_ref(), index, total)
            {
                results.push(result);
            }
        }

        // Cancellation mid-run must end in a terminal failed status rather
        // than flowing through the summary's best-effort completion.
        if token.is_cancelled() {
            self.record_event(
                execution.id,
                EventLevel::Error,
                "execution_cancelled",
                "Execution cancelled",
            );
            self.mark_failed(&execution, Some(&task));
            return Err(EngineError::Cancelled);
        }

        // bossSummary
        self.boss_summary(token, &execution, &task, &brief, crew.as_ref(), &results)
    }

    fn boss_plan(
        &self,
        token: &CancelToken,
        execution: &Execution,
        task: &Task,
        brief: &ExecutionBrief,
        crew: Option<&Crew>,
    ) -> Result<BossPlan, EngineError> {
        self.record_event(
            execution.id,
            EventLevel::Info,
            "boss_plan",
            "Running Boss plan phase",
        );

        let prompt = self
            .prompts
            .boss_plan_prompt(task, brief, crew, self.worker_budget);

        let output = match self.run_cli(token, execution, &prompt) {
            Ok(output) => output,
            Err(err) => {
                return Err(self.fail_boss_plan(execution, task, format!("{err}")));
            }
        };

        if let Some(reason) = cli_failure(&output) {
            return Err(self.fail_boss_plan(execution, task, reason));
        }
        let Some(json_block) = output.json_block else {
            return Err(self.fail_boss_plan(execution, task, "no JSON response".to_string()));
        };

        let plan = match parse_response(&json_block) {
            Ok(AgentResponse::BossPlan(plan)) => plan,
            Ok(other) => {
                return Err(self.fail_boss_plan(
                    execution,
                    task,
                    format!("unexpected response type {}", response_tag(&other)),
                ));
            }
            Err(err) => {
                return Err(self.fail_boss_plan(execution, task, format!("parse: {err}")));
            }
        };

        let summary = format!(
            "Plan with {} steps, {} workers",
            plan.steps.len(),
            plan.needs_workers.len()
        );
        self.persist_agent_run(
            execution.id,
            AgentType::Boss,
            "planner",
            &prompt,
            &summary,
            Outcome::Success,
            &plan.estimated_files.join(", "),
        );
        self.record_event(
            execution.id,
            EventLevel::Info,
            "boss_plan_done",
            &format!(
                "Boss plan: {} steps, {} workers needed",
                plan.steps.len(),
                plan.needs_workers.len()
            ),
        );

        Ok(plan)
    }

    /// Runs one worker. Every failure mode is recorded as a failed agent run
    /// and `None` is returned so the engine advances to the next worker.
    fn run_worker(
        &self,
        token: &CancelToken,
        execution: &Execution,
        need: &WorkerNeed,
        crew: Option<&Crew>,
        index: usize,
        total: usize,
    ) -> Option<WorkerResult> {
        self.record_event(
            execution.id,
            EventLevel::Info,
            "worker_start",
            &format!("Starting worker {}/{}: {}", index + 1, total, need.role),
        );

        let prompt = self.prompts.worker_prompt(need, crew);

        // The slot is held for the whole CLI call and returned on every
        // path, including a panicking callback.
        let guard = match self.scheduler.acquire_guard(token) {
            Ok(guard) => guard,
            Err(err) => {
                self.record_event(
                    execution.id,
                    EventLevel::Error,
                    "scheduler_error",
                    &err.to_string(),
                );
                self.persist_agent_run(
                    execution.id,
                    AgentType::Worker,
                    &need.role,
                    &prompt,
                    &format!("Failed: {err}"),
                    Outcome::Failed,
                    "",
                );
                return None;
            }
        };

        let output = self.run_cli(token, execution, &prompt);
        drop(guard);

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                self.record_event(
                    execution.id,
                    EventLevel::Error,
                    "worker_error",
                    &format!("Worker {} failed: {err}", need.role),
                );
                self.persist_agent_run(
                    execution.id,
                    AgentType::Worker,
                    &need.role,
                    &prompt,
                    &format!("Failed: {err}"),
                    Outcome::Failed,
                    "",
                );
                return None;
            }
        };

        if let Some(reason) = cli_failure(&output) {
            self.record_event(
                execution.id,
                EventLevel::Error,
                "worker_error",
                &format!("Worker {} failed: {reason}", need.role),
            );
            self.persist_agent_run(
                execution.id,
                AgentType::Worker,
                &need.role,
                &prompt,
                &format!("Failed: {reason}"),
                Outcome::Failed,
                "",
            );
            return None;
        }

        let Some(json_block) = output.json_block else {
            self.record_event(
                execution.id,
                EventLevel::Warn,
                "worker_no_json",
                &format!("Worker {} returned no JSON", need.role),
            );
            self.persist_agent_run(
                execution.id,
                AgentType::Worker,
                &need.role,
                &prompt,
                "No JSON output",
                Outcome::Failed,
                "",
            );
            return None;
        };

        let result = match parse_response(&json_block) {
            Ok(AgentResponse::WorkerResult(result)) => result,
            Ok(other) => {
                self.record_event(
                    execution.id,
                    EventLevel::Warn,
                    "worker_type_error",
                    &format!(
                        "Worker {} returned unexpected type {}",
                        need.role,
                        response_tag(&other)
                    ),
                );
                self.persist_agent_run(
                    execution.id,
                    AgentType::Worker,
                    &need.role,
                    &prompt,
                    &format!("Unexpected response type {}", response_tag(&other)),
                    Outcome::Failed,
                    "",
                );
                return None;
            }
            Err(err) => {
                self.record_event(
                    execution.id,
                    EventLevel::Warn,
                    "worker_parse_error",
                    &format!("Worker {} parse error: {err}", need.role),
                );
                self.persist_agent_run(
                    execution.id,
                    AgentType::Worker,
                    &need.role,
                    &prompt,
                    &format!("Parse error: {err}"),
                    Outcome::Failed,
                    "",
                );
                return None;
            }
        };

        self.persist_agent_run(
            execution.id,
            AgentType::Worker,
            &need.role,
            &prompt,
            &result.summary,
            parse_outcome(&result.outcome),
            &result.files_changed.join(", "),
        );
        self.record_event(
            execution.id,
            EventLevel::Info,
            "worker_done",
            &format!("Worker {} finished: {}", need.role, result.outcome),
        );

        Some(result)
    }

    /// The summary phase is best-effort: a CLI failure or unusable payload
    /// still finishes the execution. `completed` here is provisional; the
    /// diff-review mapping below reserves real completion for the diff
    /// action executor.
    fn boss_summary(
        &self,
        token: &CancelToken,
        execution: &Execution,
        task: &Task,
        brief: &ExecutionBrief,
        crew: Option<&Crew>,
        results: &[WorkerResult],
    ) -> Result<Status, EngineError> {
        self.record_event(
            execution.id,
            EventLevel::Info,
            "boss_summary",
            "Running Boss summary phase",
        );

        let prompt = self.prompts.boss_summary_prompt(task, brief, crew, results);

        let mut final_status = Status::Completed;
        match self.run_cli(token, execution, &prompt) {
            Err(err) => {
                self.record_event(
                    execution.id,
                    EventLevel::Error,
                    "boss_summary_error",
                    &format!("Boss summary failed: {err}"),
                );
            }
            Ok(output) => {
                if let Some(reason) = cli_failure(&output) {
                    self.record_event(
                        execution.id,
                        EventLevel::Error,
                        "boss_summary_error",
                        &format!("Boss summary failed: {reason}"),
                    );
                } else if let Some(json_block) = output.json_block {
                    if let Ok(AgentResponse::BossSummary(summary)) = parse_response(&json_block) {
                        final_status = self.persist_summary(execution, &prompt, &summary);
                    }
                }
            }
        }

        self.store
            .set_execution_finished(execution.id, final_status)?;
        if let Err(err) = self.store.update_task_status(task.id, final_status) {
            tracing::warn!(task_id = task.id, %err, "failed to update task status");
        }
        self.record_event(
            execution.id,
            EventLevel::Info,
            "execution_done",
            &format!("Execution finished with status: {final_status}"),
        );
        self.write_terminal_artifacts(token, execution);

        Ok(final_status)
    }

    fn persist_summary(
        &self,
        execution: &Execution,
        prompt: &str,
        summary: &BossSummary,
    ) -> Status {
        self.persist_agent_run(
            execution.id,
            AgentType::Boss,
            "summarizer",
            prompt,
            &summary.what_changed.join("; "),
            parse_outcome(&summary.outcome),
            &summary.files_touched.join(", "),
        );

        for lesson in &summary.lessons {
            let lesson_type =
                LessonType::from_str(&lesson.lesson_type).unwrap_or(LessonType::Note);
            if let Err(err) = self.store.create_lesson(
                execution.id,
                AgentType::Boss,
                lesson_type,
                &lesson.content,
            ) {
                tracing::warn!(execution_id = execution.id, %err, "failed to persist lesson");
            }
        }

        // Review is mandatory: anything short of an explicit failure lands in
        // diff review, and `completed` stays reserved for post-review actions.
        match summary.outcome.as_str() {
            "failed" => Status::Failed,
            _ => Status::DiffReview,
        }
    }

    fn run_cli(
        &self,
        token: &CancelToken,
        execution: &Execution,
        prompt: &str,
    ) -> Result<bore_process::runner::RunOutput, bore_process::runner::RunnerError> {
        let sink = Arc::clone(&self.sink);
        let execution_id = execution.id;
        let on_line = move |line: &str| sink.agent_output(execution_id, line);
        self.runner.run(
            token,
            Path::new(&execution.worktree_path),
            prompt,
            &[],
            Some(&on_line),
            None,
        )
    }

    fn fail_boss_plan(&self, execution: &Execution, task: &Task, reason: String) -> EngineError {
        self.record_event(
            execution.id,
            EventLevel::Error,
            "boss_plan_error",
            &format!("Boss plan failed: {reason}"),
        );
        self.mark_failed(execution, Some(task));
        EngineError::BossPlan { reason }
    }

    /// Terminal failure write; best-effort by design so a failing store
    /// cannot mask the original error.
    fn mark_failed(&self, execution: &Execution, task: Option<&Task>) {
        if let Err(err) = self
            .store
            .set_execution_finished(execution.id, Status::Failed)
        {
            tracing::warn!(execution_id = execution.id, %err, "failed to mark execution failed");
        }
        if let Some(task) = task {
            if let Err(err) = self.store.update_task_status(task.id, Status::Failed) {
                tracing::warn!(task_id = task.id, %err, "failed to mark task failed");
            }
        }
        let token = CancelToken::new();
        self.write_terminal_artifacts(&token, execution);
    }

    fn persist_agent_run(
        &self,
        execution_id: i64,
        agent_type: AgentType,
        role: &str,
        prompt: &str,
        summary: &str,
        outcome: Outcome,
        files_changed: &str,
    ) {
        if let Err(err) = self.store.create_agent_run(
            execution_id,
            agent_type,
            role,
            prompt,
            summary,
            outcome,
            files_changed,
        ) {
            tracing::warn!(execution_id, %err, "failed to persist agent run");
        }
    }

    fn record_event(&self, execution_id: i64, level: EventLevel, event_type: &str, message: &str) {
        if let Err(err) = self
            .store
            .create_event(execution_id, level, event_type, message)
        {
            tracing::warn!(execution_id, %err, "failed to persist event");
        }
        if let Err(err) = self
            .artifacts
            .append_event(execution_id, level, event_type, message)
        {
            tracing::warn!(execution_id, %err, "failed to append artifact event");
        }
        self.sink.event(execution_id, level, event_type, message);
        tracing::debug!(execution_id, event_type, message, "engine event");
    }

    fn write_terminal_artifacts(&self, token: &CancelToken, execution: &Execution) {
        match self.store.get_execution(execution.id) {
            Ok(current) => {
                if let Err(err) = self.artifacts.write_execution(&current) {
                    tracing::warn!(execution_id = execution.id, %err, "failed to write execution snapshot");
                }
            }
            Err(err) => {
                tracing::warn!(execution_id = execution.id, %err, "failed to reload execution for snapshot");
            }
        }

        match self
            .repo
            .diff_all(token, Path::new(&execution.worktree_path))
        {
            Ok(patch) => {
                if let Err(err) = self.artifacts.write_diff(execution.id, &patch) {
                    tracing::warn!(execution_id = execution.id, %err, "failed to write diff artifact");
                }
            }
            Err(err) => {
                tracing::warn!(execution_id = execution.id, %err, "failed to capture diff artifact");
            }
        }
    }
}

/// A non-zero exit is fatal only when the reply carries no usable payload;
/// payload validity otherwise governs success.
fn cli_failure(output: &bore_process::runner::RunOutput) -> Option<String> {
    if output.json_block.is_none() && output.exit_code != Some(0) {
        return Some(match output.exit_code {
            Some(code) => format!("CLI exited with status {code} and no JSON response"),
            None => "CLI was killed by a signal with no JSON response".to_string(),
        });
    }
    None
}

/// Minimal brief when the Commander's full brief was not handed over.
fn brief_from_execution(execution: &Execution, task: &Task) -> ExecutionBrief {
    ExecutionBrief {
        base_branch: execution.base_branch.clone(),
        task_title: task.title.clone(),
        ..ExecutionBrief::default()
    }
}

/// Worker and summary outcomes arrive as free text; anything outside the
/// domain is treated as a failure rather than rejected wholesale.
fn parse_outcome(raw: &str) -> Outcome {
    Outcome::from_str(raw).unwrap_or(Outcome::Failed)
}

fn response_tag(response: &AgentResponse) -> &'static str {
    match response {
        AgentResponse::Clarifications(_) => "clarifications",
        AgentResponse::Options(_) => "options",
        AgentResponse::ExecutionBrief(_) => "execution_brief",
        AgentResponse::BossPlan(_) => "boss_plan",
        AgentResponse::SpawnWorkers(_) => "spawn_workers",
        AgentResponse::BossSummary(_) => "boss_summary",
        AgentResponse::WorkerResult(_) => "worker_result",
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
