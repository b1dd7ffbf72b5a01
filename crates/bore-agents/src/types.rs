//! JSON wire shapes produced by the agent CLI, discriminated by a `type` tag.
//!
//! `outcome` and `lesson_type` stay plain strings on the wire; they are
//! mapped to store domains at the persistence boundary so an agent emitting
//! an unexpected value degrades gracefully instead of failing the parse.

use serde::{Deserialize, Serialize};

/// One of the structured replies an agent may produce, keyed on the JSON
/// `type` field. Unknown tags are a parse error, never silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResponse {
    Clarifications(ClarificationsResponse),
    Options(OptionsResponse),
    ExecutionBrief(ExecutionBrief),
    BossPlan(BossPlan),
    SpawnWorkers(SpawnWorkersRequest),
    BossSummary(BossSummary),
    WorkerResult(WorkerResult),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub why: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationsResponse {
    #[serde(default)]
    pub questions: Vec<ClarificationQuestion>,
}

/// One of the Commander's proposed execution approaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOption {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub approach_steps: Vec<String>,
    #[serde(default)]
    pub crew_suggestion: String,
    #[serde(default)]
    pub worker_budget_suggestion: i64,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub validation: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsResponse {
    #[serde(default)]
    pub options: Vec<ExecutionOption>,
}

/// The Commander's final execution plan handed to the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionBrief {
    #[serde(default)]
    pub selected_option_id: String,
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub thread: String,
    #[serde(default)]
    pub task_title: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub not_in_scope: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub crew: String,
    #[serde(default)]
    pub worker_budget: i64,
    #[serde(default)]
    pub key_risks: Vec<String>,
    #[serde(default)]
    pub recommended_validation: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossPlanStep {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub worker_role: String,
}

/// A worker the Boss wants to spawn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerNeed {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub files_or_paths: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// The Boss's initial execution plan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BossPlan {
    #[serde(default)]
    pub steps: Vec<BossPlanStep>,
    #[serde(default)]
    pub validation: Vec<String>,
    #[serde(default)]
    pub estimated_files: Vec<String>,
    #[serde(default)]
    pub needs_workers: Vec<WorkerNeed>,
}

/// The Boss asking for additional workers mid-execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnWorkersRequest {
    #[serde(default)]
    pub workers: Vec<WorkerNeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossLesson {
    #[serde(default)]
    pub lesson_type: String,
    #[serde(default)]
    pub content: String,
}

/// The Boss's final summary after all workers complete.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BossSummary {
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub what_changed: Vec<String>,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    #[serde(default)]
    pub validation_results: Vec<String>,
    #[serde(default)]
    pub risks_or_followups: Vec<String>,
    #[serde(default)]
    pub lessons: Vec<BossLesson>,
}

/// A Worker's report after completing its assignment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerResult {
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<String>,
    #[serde(default)]
    pub validation_results: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boss_plan_deserializes_with_missing_lists_defaulted() {
        let json = r#"{"type":"boss_plan","steps":[{"id":"s1","title":"t","detail":"d","worker_role":"dev"}]}"#;
        let parsed: AgentResponse = serde_json::from_str(json).unwrap();

        let AgentResponse::BossPlan(plan) = parsed else {
            panic!("expected boss plan");
        };
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.needs_workers.is_empty());
        assert!(plan.estimated_files.is_empty());
    }

    #[test]
    fn worker_result_round_trips() {
        let result = WorkerResult {
            outcome: "success".to_string(),
            summary: "did the thing".to_string(),
            files_changed: vec!["src/a.rs".to_string()],
            ..WorkerResult::default()
        };
        let wrapped = AgentResponse::WorkerResult(result.clone());

        let json = serde_json::to_string(&wrapped).unwrap();
        assert!(json.contains("\"type\":\"worker_result\""));

        let decoded: AgentResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, wrapped);
    }

    #[test]
    fn unknown_type_tag_is_an_error() {
        let err = serde_json::from_str::<AgentResponse>(r#"{"type":"haiku"}"#)
            .expect_err("unknown tag must fail");
        assert!(err.to_string().contains("haiku"));
    }

    #[test]
    fn missing_type_tag_is_an_error() {
        assert!(serde_json::from_str::<AgentResponse>(r#"{"outcome":"success"}"#).is_err());
    }
}
