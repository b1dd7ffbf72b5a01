//! Crash recovery: reconcile durable execution state with reality on
//! cluster open.

use bore_core::types::Status;

use crate::store::{SqliteStore, StoreError};

/// Marks every `running` execution in the cluster as `interrupted`.
///
/// This is an unconditional sweep: process supervision is in-process only,
/// so a restart implies no in-flight work. Worktree directories are left on
/// disk for user inspection; the diff action executor removes them on
/// demand. Returns the number of executions recovered.
pub fn recover_interrupted(store: &SqliteStore, cluster_id: i64) -> Result<usize, StoreError> {
    let running = store.list_executions_by_status(cluster_id, Status::Running)?;

    for execution in &running {
        store.update_execution_status(execution.id, Status::Interrupted)?;
        tracing::warn!(
            execution_id = execution.id,
            task_id = execution.task_id,
            "recovered interrupted execution"
        );
    }

    if !running.is_empty() {
        tracing::info!(
            count = running.len(),
            "crash recovery marked executions as interrupted"
        );
    }

    Ok(running.len())
}

#[cfg(test)]
mod tests {
    use bore_core::types::{Complexity, Status, TaskMode};

    use super::recover_interrupted;
    use crate::store::SqliteStore;

    #[test]
    fn marks_running_executions_interrupted_and_leaves_others_alone() {
        let store = SqliteStore::open_in_memory().expect("store");
        let cluster = store.create_cluster("demo", "/tmp/demo", None).expect("cluster");
        let thread = store.create_thread(cluster.id, "core", "").expect("thread");
        let task = store
            .create_task(
                cluster.id,
                thread.id,
                "t",
                "p",
                Complexity::Basic,
                TaskMode::JustGetItDone,
            )
            .expect("task");

        let mk = |branch: &str| {
            store
                .create_execution(
                    task.id,
                    cluster.id,
                    None,
                    "main",
                    branch,
                    &format!("/tmp/demo/.bore/worktrees/{branch}"),
                )
                .expect("execution")
                .id
        };
        let running_a = mk("bore/a");
        let running_b = mk("bore/b");
        let finished = mk("bore/c");

        store.set_execution_started(running_a).expect("start");
        store.set_execution_started(running_b).expect("start");
        store.set_execution_started(finished).expect("start");
        store
            .set_execution_finished(finished, Status::DiffReview)
            .expect("finish");

        let recovered = recover_interrupted(&store, cluster.id).expect("recover");
        assert_eq!(recovered, 2);

        assert_eq!(
            store.get_execution(running_a).expect("get").status,
            Status::Interrupted
        );
        assert_eq!(
            store.get_execution(running_b).expect("get").status,
            Status::Interrupted
        );
        assert_eq!(
            store.get_execution(finished).expect("get").status,
            Status::DiffReview
        );

        // Recovery never creates agent activity.
        assert!(store.list_agent_runs(running_a).expect("runs").is_empty());
    }

    #[test]
    fn sweep_with_nothing_running_is_a_no_op() {
        let store = SqliteStore::open_in_memory().expect("store");
        let cluster = store.create_cluster("demo", "/tmp/demo", None).expect("cluster");
        assert_eq!(recover_interrupted(&store, cluster.id).expect("recover"), 0);
    }
}
