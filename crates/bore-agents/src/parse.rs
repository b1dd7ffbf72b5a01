use crate::types::AgentResponse;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("response JSON missing \"type\" field")]
    MissingType,
    #[error("unknown response type {tag:?}")]
    UnknownType { tag: String },
    #[error("failed to parse {tag} response: {source}")]
    Malformed {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse response JSON: {source}")]
    Invalid {
        #[source]
        source: serde_json::Error,
    },
}

const KNOWN_TAGS: &[&str] = &[
    "clarifications",
    "options",
    "execution_brief",
    "boss_plan",
    "spawn_workers",
    "boss_summary",
    "worker_result",
];

/// Parses an agent reply into the matching [`AgentResponse`] variant based
/// on its `type` discriminator.
pub fn parse_response(json: &str) -> Result<AgentResponse, AgentError> {
    // Probe the discriminator first so the error distinguishes a missing or
    // unknown tag from a field-level mismatch inside a known shape.
    let probe: serde_json::Value =
        serde_json::from_str(json).map_err(|source| AgentError::Invalid { source })?;
    let tag = match probe.get("type").and_then(|t| t.as_str()) {
        Some(tag) if !tag.is_empty() => tag.to_string(),
        _ => return Err(AgentError::MissingType),
    };
    if !KNOWN_TAGS.contains(&tag.as_str()) {
        return Err(AgentError::UnknownType { tag });
    }

    serde_json::from_str(json).map_err(|source| AgentError::Malformed { tag, source })
}

#[cfg(test)]
mod tests {
    use super::{parse_response, AgentError};
    use crate::types::AgentResponse;

    #[test]
    fn parses_each_known_type() {
        let cases = [
            (r#"{"type":"clarifications","questions":[]}"#, "clarifications"),
            (r#"{"type":"options","options":[]}"#, "options"),
            (r#"{"type":"execution_brief","base_branch":"main"}"#, "execution_brief"),
            (r#"{"type":"boss_plan","steps":[]}"#, "boss_plan"),
            (r#"{"type":"spawn_workers","workers":[]}"#, "spawn_workers"),
            (r#"{"type":"boss_summary","outcome":"success"}"#, "boss_summary"),
            (r#"{"type":"worker_result","outcome":"failed"}"#, "worker_result"),
        ];

        for (json, tag) in cases {
            let parsed = parse_response(json).unwrap_or_else(|err| panic!("{tag}: {err}"));
            match (tag, &parsed) {
                ("clarifications", AgentResponse::Clarifications(_))
                | ("options", AgentResponse::Options(_))
                | ("execution_brief", AgentResponse::ExecutionBrief(_))
                | ("boss_plan", AgentResponse::BossPlan(_))
                | ("spawn_workers", AgentResponse::SpawnWorkers(_))
                | ("boss_summary", AgentResponse::BossSummary(_))
                | ("worker_result", AgentResponse::WorkerResult(_)) => {}
                other => panic!("unexpected variant for {other:?}"),
            }
        }
    }

    #[test]
    fn missing_type_field_is_distinguished() {
        let err = parse_response(r#"{"outcome":"success"}"#).expect_err("no tag");
        assert!(matches!(err, AgentError::MissingType));
    }

    #[test]
    fn unknown_tag_is_reported_with_its_value() {
        let err = parse_response(r#"{"type":"weather_report"}"#).expect_err("unknown tag");
        let AgentError::UnknownType { tag } = err else {
            panic!("expected UnknownType");
        };
        assert_eq!(tag, "weather_report");
    }

    #[test]
    fn malformed_known_shape_names_the_tag() {
        let err = parse_response(r#"{"type":"boss_plan","steps":"not-a-list"}"#)
            .expect_err("bad field type");
        let AgentError::Malformed { tag, .. } = err else {
            panic!("expected Malformed");
        };
        assert_eq!(tag, "boss_plan");
    }

    #[test]
    fn non_json_input_is_invalid() {
        let err = parse_response("not json at all").expect_err("invalid");
        assert!(matches!(err, AgentError::Invalid { .. }));
    }
}
