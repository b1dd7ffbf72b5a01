//! Durable state behind a single serialized SQLite connection.
//!
//! Every write goes through one connection guarded by a mutex; readers share
//! the same handle. Foreign keys are enforced and the journal runs in WAL
//! mode. Timestamps are stored as RFC 3339 strings in UTC.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use bore_core::types::{
    AgentLesson, AgentRun, AgentType, Cluster, CommanderMemory, Complexity, Crew, EventLevel,
    Execution, ExecutionEvent, LessonType, Outcome, ReviewPhase, Status, Task, TaskMode,
    TaskReview, Thread,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store: sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("store: failed to create database directory {path}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store: {entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    repo_path TEXT NOT NULL UNIQUE,
    remote_url TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS commander_memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id INTEGER NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(cluster_id, key)
);

CREATE TABLE IF NOT EXISTS crews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id INTEGER NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    objective TEXT NOT NULL DEFAULT '',
    constraints TEXT NOT NULL DEFAULT '',
    allowed_commands TEXT NOT NULL DEFAULT '',
    ownership_paths TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(cluster_id, name)
);

CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id INTEGER NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(cluster_id, name)
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id INTEGER NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
    thread_id INTEGER NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    prompt TEXT NOT NULL,
    complexity TEXT NOT NULL CHECK (complexity IN ('basic', 'medium', 'complex')),
    mode TEXT NOT NULL CHECK (mode IN ('just_get_it_done', 'alert_with_issues')),
    status TEXT NOT NULL CHECK (status IN
        ('pending', 'review', 'running', 'diff_review', 'completed', 'failed', 'interrupted')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_cluster ON tasks(cluster_id);
CREATE INDEX IF NOT EXISTS idx_tasks_thread ON tasks(thread_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(cluster_id, status);

CREATE TABLE IF NOT EXISTS task_reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    phase TEXT NOT NULL CHECK (phase IN ('clarification', 'options', 'selection', 'base_branch')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_reviews_task ON task_reviews(task_id);

CREATE TABLE IF NOT EXISTS executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    cluster_id INTEGER NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
    crew_id INTEGER REFERENCES crews(id) ON DELETE SET NULL,
    base_branch TEXT NOT NULL,
    exec_branch TEXT NOT NULL,
    worktree_path TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN
        ('pending', 'review', 'running', 'diff_review', 'completed', 'failed', 'interrupted')),
    started_at TEXT,
    finished_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(cluster_id, exec_branch),
    UNIQUE(cluster_id, worktree_path)
);

CREATE INDEX IF NOT EXISTS idx_executions_task ON executions(task_id);
CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(cluster_id, status);

CREATE TABLE IF NOT EXISTS execution_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
    ts TEXT NOT NULL,
    level TEXT NOT NULL CHECK (level IN ('debug', 'info', 'warn', 'error')),
    event_type TEXT NOT NULL,
    message TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_execution ON execution_events(execution_id, ts);

CREATE TABLE IF NOT EXISTS agent_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
    agent_type TEXT NOT NULL CHECK (agent_type IN ('boss', 'worker')),
    role TEXT NOT NULL,
    prompt TEXT NOT NULL,
    summary TEXT NOT NULL,
    outcome TEXT NOT NULL CHECK (outcome IN ('success', 'partial', 'failed')),
    files_changed TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_agent_runs_execution ON agent_runs(execution_id, created_at);

CREATE TABLE IF NOT EXISTS agent_lessons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
    agent_type TEXT NOT NULL CHECK (agent_type IN ('boss', 'worker')),
    lesson_type TEXT NOT NULL CHECK (lesson_type IN ('error', 'pattern', 'warning', 'note')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_agent_lessons_execution ON agent_lessons(execution_id);
"#;

/// SQLite-backed store for clusters, tasks, executions, and agent history.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`, enables foreign keys and
    /// WAL journaling, and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path_ref)?;
        Self::init(conn)
    }

    /// Opens an in-memory database with the same schema. Test use only.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Clusters ---

    pub fn create_cluster(
        &self,
        name: &str,
        repo_path: &str,
        remote_url: Option<&str>,
    ) -> Result<Cluster, StoreError> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO clusters (name, repo_path, remote_url, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, repo_path, remote_url, now.to_rfc3339()],
        )?;
        Ok(Cluster {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            repo_path: repo_path.to_string(),
            remote_url: remote_url.map(str::to_string),
            created_at: now,
        })
    }

    pub fn get_cluster(&self, id: i64) -> Result<Cluster, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, name, repo_path, remote_url, created_at FROM clusters WHERE id = ?1",
                params![id],
                scan_cluster,
            )
            .optional()?
            .ok_or_else(|| not_found("cluster", id))
    }

    pub fn get_cluster_by_path(&self, repo_path: &str) -> Result<Cluster, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, name, repo_path, remote_url, created_at FROM clusters WHERE repo_path = ?1",
                params![repo_path],
                scan_cluster,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "cluster",
                key: repo_path.to_string(),
            })
    }

    pub fn list_clusters(&self) -> Result<Vec<Cluster>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, repo_path, remote_url, created_at FROM clusters ORDER BY name",
        )?;
        let rows = stmt.query_map([], scan_cluster)?;
        collect(rows)
    }

    /// Deletes a cluster; cascading deletes remove every child row.
    pub fn delete_cluster(&self, id: i64) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute("DELETE FROM clusters WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(not_found("cluster", id));
        }
        Ok(())
    }

    // --- Commander memory ---

    pub fn set_memory(&self, cluster_id: i64, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO commander_memory (cluster_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(cluster_id, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![cluster_id, key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_memory(&self, cluster_id: i64, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM commander_memory WHERE cluster_id = ?1 AND key = ?2",
                params![cluster_id, key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn get_all_memory(&self, cluster_id: i64) -> Result<Vec<CommanderMemory>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, cluster_id, key, value, updated_at
             FROM commander_memory WHERE cluster_id = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![cluster_id], |row| {
            Ok(CommanderMemory {
                id: row.get(0)?,
                cluster_id: row.get(1)?,
                key: row.get(2)?,
                value: row.get(3)?,
                updated_at: time_field(row, 4)?,
            })
        })?;
        collect(rows)
    }

    pub fn delete_memory(&self, cluster_id: i64, key: &str) -> Result<(), StoreError> {
        let affected = self.conn().execute(
            "DELETE FROM commander_memory WHERE cluster_id = ?1 AND key = ?2",
            params![cluster_id, key],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "memory",
                key: format!("cluster {cluster_id} key {key:?}"),
            });
        }
        Ok(())
    }

    // --- Crews ---

    #[allow(clippy::too_many_arguments)]
    pub fn create_crew(
        &self,
        cluster_id: i64,
        name: &str,
        objective: &str,
        constraints: &str,
        allowed_commands: &str,
        ownership_paths: &str,
    ) -> Result<Crew, StoreError> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO crews (cluster_id, name, objective, constraints, allowed_commands,
                                ownership_paths, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                cluster_id,
                name,
                objective,
                constraints,
                allowed_commands,
                ownership_paths,
                now.to_rfc3339()
            ],
        )?;
        Ok(Crew {
            id: conn.last_insert_rowid(),
            cluster_id,
            name: name.to_string(),
            objective: objective.to_string(),
            constraints: constraints.to_string(),
            allowed_commands: allowed_commands.to_string(),
            ownership_paths: ownership_paths.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_crew(&self, id: i64) -> Result<Crew, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, cluster_id, name, objective, constraints, allowed_commands,
                        ownership_paths, created_at, updated_at
                 FROM crews WHERE id = ?1",
                params![id],
                scan_crew,
            )
            .optional()?
            .ok_or_else(|| not_found("crew", id))
    }

    pub fn list_crews(&self, cluster_id: i64) -> Result<Vec<Crew>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, cluster_id, name, objective, constraints, allowed_commands,
                    ownership_paths, created_at, updated_at
             FROM crews WHERE cluster_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![cluster_id], scan_crew)?;
        collect(rows)
    }

    pub fn update_crew(&self, crew: &Crew) -> Result<(), StoreError> {
        let affected = self.conn().execute(
            "UPDATE crews SET name = ?1, objective = ?2, constraints = ?3,
                    allowed_commands = ?4, ownership_paths = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                crew.name,
                crew.objective,
                crew.constraints,
                crew.allowed_commands,
                crew.ownership_paths,
                Utc::now().to_rfc3339(),
                crew.id
            ],
        )?;
        if affected == 0 {
            return Err(not_found("crew", crew.id));
        }
        Ok(())
    }

    pub fn delete_crew(&self, id: i64) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute("DELETE FROM crews WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(not_found("crew", id));
        }
        Ok(())
    }

    // --- Threads ---

    pub fn create_thread(
        &self,
        cluster_id: i64,
        name: &str,
        description: &str,
    ) -> Result<Thread, StoreError> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO threads (cluster_id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![cluster_id, name, description, now.to_rfc3339()],
        )?;
        Ok(Thread {
            id: conn.last_insert_rowid(),
            cluster_id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_thread(&self, id: i64) -> Result<Thread, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, cluster_id, name, description, created_at, updated_at
                 FROM threads WHERE id = ?1",
                params![id],
                scan_thread,
            )
            .optional()?
            .ok_or_else(|| not_found("thread", id))
    }

    pub fn list_threads(&self, cluster_id: i64) -> Result<Vec<Thread>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, cluster_id, name, description, created_at, updated_at
             FROM threads WHERE cluster_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![cluster_id], scan_thread)?;
        collect(rows)
    }

    pub fn update_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        let affected = self.conn().execute(
            "UPDATE threads SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                thread.name,
                thread.description,
                Utc::now().to_rfc3339(),
                thread.id
            ],
        )?;
        if affected == 0 {
            return Err(not_found("thread", thread.id));
        }
        Ok(())
    }

    // --- Tasks ---

    pub fn create_task(
        &self,
        cluster_id: i64,
        thread_id: i64,
        title: &str,
        prompt: &str,
        complexity: Complexity,
        mode: TaskMode,
    ) -> Result<Task, StoreError> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tasks (cluster_id, thread_id, title, prompt, complexity, mode, status,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
            params![
                cluster_id,
                thread_id,
                title,
                prompt,
                complexity.as_str(),
                mode.as_str(),
                now.to_rfc3339()
            ],
        )?;
        Ok(Task {
            id: conn.last_insert_rowid(),
            cluster_id,
            thread_id,
            title: title.to_string(),
            prompt: prompt.to_string(),
            complexity,
            mode,
            status: Status::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_task(&self, id: i64) -> Result<Task, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, cluster_id, thread_id, title, prompt, complexity, mode, status,
                        created_at, updated_at
                 FROM tasks WHERE id = ?1",
                params![id],
                scan_task,
            )
            .optional()?
            .ok_or_else(|| not_found("task", id))
    }

    pub fn list_tasks(&self, cluster_id: i64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, cluster_id, thread_id, title, prompt, complexity, mode, status,
                    created_at, updated_at
             FROM tasks WHERE cluster_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![cluster_id], scan_task)?;
        collect(rows)
    }

    pub fn list_tasks_by_thread(&self, thread_id: i64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, cluster_id, thread_id, title, prompt, complexity, mode, status,
                    created_at, updated_at
             FROM tasks WHERE thread_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![thread_id], scan_task)?;
        collect(rows)
    }

    pub fn list_tasks_by_status(
        &self,
        cluster_id: i64,
        status: Status,
    ) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, cluster_id, thread_id, title, prompt, complexity, mode, status,
                    created_at, updated_at
             FROM tasks WHERE cluster_id = ?1 AND status = ?2 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![cluster_id, status.as_str()], scan_task)?;
        collect(rows)
    }

    pub fn update_task_status(&self, id: i64, status: Status) -> Result<(), StoreError> {
        let affected = self.conn().execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if affected == 0 {
            return Err(not_found("task", id));
        }
        Ok(())
    }

    // --- Task reviews ---

    pub fn create_task_review(
        &self,
        task_id: i64,
        phase: ReviewPhase,
        content: &str,
    ) -> Result<TaskReview, StoreError> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO task_reviews (task_id, phase, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, phase.as_str(), content, now.to_rfc3339()],
        )?;
        Ok(TaskReview {
            id: conn.last_insert_rowid(),
            task_id,
            phase,
            content: content.to_string(),
            created_at: now,
        })
    }

    pub fn list_task_reviews(&self, task_id: i64) -> Result<Vec<TaskReview>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, phase, content, created_at
             FROM task_reviews WHERE task_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok(TaskReview {
                id: row.get(0)?,
                task_id: row.get(1)?,
                phase: enum_field(row, 2)?,
                content: row.get(3)?,
                created_at: time_field(row, 4)?,
            })
        })?;
        collect(rows)
    }

    // --- Executions ---

    pub fn create_execution(
        &self,
        task_id: i64,
        cluster_id: i64,
        crew_id: Option<i64>,
        base_branch: &str,
        exec_branch: &str,
        worktree_path: &str,
    ) -> Result<Execution, StoreError> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO executions (task_id, cluster_id, crew_id, base_branch, exec_branch,
                                     worktree_path, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
            params![
                task_id,
                cluster_id,
                crew_id,
                base_branch,
                exec_branch,
                worktree_path,
                now.to_rfc3339()
            ],
        )?;
        Ok(Execution {
            id: conn.last_insert_rowid(),
            task_id,
            cluster_id,
            crew_id,
            base_branch: base_branch.to_string(),
            exec_branch: exec_branch.to_string(),
            worktree_path: worktree_path.to_string(),
            status: Status::Pending,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_execution(&self, id: i64) -> Result<Execution, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, task_id, cluster_id, crew_id, base_branch, exec_branch, worktree_path,
                        status, started_at, finished_at, created_at, updated_at
                 FROM executions WHERE id = ?1",
                params![id],
                scan_execution,
            )
            .optional()?
            .ok_or_else(|| not_found("execution", id))
    }

    pub fn list_executions(&self, cluster_id: i64) -> Result<Vec<Execution>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, cluster_id, crew_id, base_branch, exec_branch, worktree_path,
                    status, started_at, finished_at, created_at, updated_at
             FROM executions WHERE cluster_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![cluster_id], scan_execution)?;
        collect(rows)
    }

    pub fn list_executions_by_status(
        &self,
        cluster_id: i64,
        status: Status,
    ) -> Result<Vec<Execution>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, task_id, cluster_id, crew_id, base_branch, exec_branch, worktree_path,
                    status, started_at, finished_at, created_at, updated_at
             FROM executions WHERE cluster_id = ?1 AND status = ?2
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![cluster_id, status.as_str()], scan_execution)?;
        collect(rows)
    }

    pub fn update_execution_status(&self, id: i64, status: Status) -> Result<(), StoreError> {
        let affected = self.conn().execute(
            "UPDATE executions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if affected == 0 {
            return Err(not_found("execution", id));
        }
        Ok(())
    }

    /// Marks the execution running and records its start time.
    pub fn set_execution_started(&self, id: i64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let affected = self.conn().execute(
            "UPDATE executions SET status = 'running', started_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if affected == 0 {
            return Err(not_found("execution", id));
        }
        Ok(())
    }

    /// Records the finish time and sets the final status.
    pub fn set_execution_finished(&self, id: i64, status: Status) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let affected = self.conn().execute(
            "UPDATE executions SET status = ?1, finished_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, id],
        )?;
        if affected == 0 {
            return Err(not_found("execution", id));
        }
        Ok(())
    }

    // --- Execution events ---

    pub fn create_event(
        &self,
        execution_id: i64,
        level: EventLevel,
        event_type: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO execution_events (execution_id, ts, level, event_type, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                execution_id,
                Utc::now().to_rfc3339(),
                level.as_str(),
                event_type,
                message
            ],
        )?;
        Ok(())
    }

    pub fn list_events(&self, execution_id: i64) -> Result<Vec<ExecutionEvent>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, ts, level, event_type, message
             FROM execution_events WHERE execution_id = ?1 ORDER BY ts, id",
        )?;
        let rows = stmt.query_map(params![execution_id], |row| {
            Ok(ExecutionEvent {
                id: row.get(0)?,
                execution_id: row.get(1)?,
                ts: time_field(row, 2)?,
                level: enum_field(row, 3)?,
                event_type: row.get(4)?,
                message: row.get(5)?,
            })
        })?;
        collect(rows)
    }

    // --- Agent runs ---

    #[allow(clippy::too_many_arguments)]
    pub fn create_agent_run(
        &self,
        execution_id: i64,
        agent_type: AgentType,
        role: &str,
        prompt: &str,
        summary: &str,
        outcome: Outcome,
        files_changed: &str,
    ) -> Result<AgentRun, StoreError> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO agent_runs (execution_id, agent_type, role, prompt, summary, outcome,
                                     files_changed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                execution_id,
                agent_type.as_str(),
                role,
                prompt,
                summary,
                outcome.as_str(),
                files_changed,
                now.to_rfc3339()
            ],
        )?;
        Ok(AgentRun {
            id: conn.last_insert_rowid(),
            execution_id,
            agent_type,
            role: role.to_string(),
            prompt: prompt.to_string(),
            summary: summary.to_string(),
            outcome,
            files_changed: files_changed.to_string(),
            created_at: now,
        })
    }

    pub fn list_agent_runs(&self, execution_id: i64) -> Result<Vec<AgentRun>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, agent_type, role, prompt, summary, outcome, files_changed,
                    created_at
             FROM agent_runs WHERE execution_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![execution_id], scan_agent_run)?;
        collect(rows)
    }

    pub fn list_agent_runs_by_type(
        &self,
        execution_id: i64,
        agent_type: AgentType,
    ) -> Result<Vec<AgentRun>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, agent_type, role, prompt, summary, outcome, files_changed,
                    created_at
             FROM agent_runs WHERE execution_id = ?1 AND agent_type = ?2 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![execution_id, agent_type.as_str()], scan_agent_run)?;
        collect(rows)
    }

    // --- Agent lessons ---

    pub fn create_lesson(
        &self,
        execution_id: i64,
        agent_type: AgentType,
        lesson_type: LessonType,
        content: &str,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO agent_lessons (execution_id, agent_type, lesson_type, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                execution_id,
                agent_type.as_str(),
                lesson_type.as_str(),
                content,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn list_lessons(&self, execution_id: i64) -> Result<Vec<AgentLesson>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, agent_type, lesson_type, content, created_at
             FROM agent_lessons WHERE execution_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![execution_id], scan_lesson)?;
        collect(rows)
    }

    pub fn list_all_lessons(&self, cluster_id: i64) -> Result<Vec<AgentLesson>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT al.id, al.execution_id, al.agent_type, al.lesson_type, al.content, al.created_at
             FROM agent_lessons al
             JOIN executions e ON e.id = al.execution_id
             WHERE e.cluster_id = ?1
             ORDER BY al.created_at, al.id",
        )?;
        let rows = stmt.query_map(params![cluster_id], scan_lesson)?;
        collect(rows)
    }

    // --- Context search (Commander reuse) ---

    /// Finds agent runs relevant to a thread: keyword overlap on task prompt
    /// and run summary, unioned with runs from the same thread, ordered by
    /// score then recency. Keywords are clamped to 20.
    pub fn search_relevant_runs(
        &self,
        cluster_id: i64,
        thread_id: i64,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<AgentRun>, StoreError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let keywords = &keywords[..keywords.len().min(20)];
        let limit = if limit <= 0 { 20 } else { limit };

        // Each keyword contributes +1 when it appears in the task prompt and
        // +1 when it appears in the run summary. The score expression is used
        // in both SELECT and WHERE, so the patterns are bound twice.
        let score_expr = keywords
            .iter()
            .map(|_| {
                "(CASE WHEN t.prompt LIKE ? THEN 1 ELSE 0 END \
                  + CASE WHEN ar.summary LIKE ? THEN 1 ELSE 0 END)"
            })
            .collect::<Vec<_>>()
            .join(" + ");

        let query = format!(
            "SELECT ar.id, ar.execution_id, ar.agent_type, ar.role, ar.prompt, ar.summary,
                    ar.outcome, ar.files_changed, ar.created_at, ({score_expr}) AS relevance
             FROM agent_runs ar
             JOIN executions e ON e.id = ar.execution_id
             JOIN tasks t ON t.id = e.task_id
             WHERE e.cluster_id = ? AND (t.thread_id = ? OR ({score_expr}) > 0)
             ORDER BY relevance DESC, ar.created_at DESC
             LIMIT ?"
        );

        let mut args: Vec<rusqlite::types::Value> = Vec::new();
        for keyword in keywords {
            let pattern = format!("%{keyword}%");
            args.push(pattern.clone().into());
            args.push(pattern.into());
        }
        args.push(cluster_id.into());
        args.push(thread_id.into());
        for keyword in keywords {
            let pattern = format!("%{keyword}%");
            args.push(pattern.clone().into());
            args.push(pattern.into());
        }
        args.push(limit.into());

        let conn = self.conn();
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), scan_agent_run)?;
        collect(rows)
    }
}

fn not_found(entity: &'static str, id: i64) -> StoreError {
    StoreError::NotFound {
        entity,
        key: format!("id {id}"),
    }
}

fn collect<T>(
    rows: impl Iterator<Item = Result<T, rusqlite::Error>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Reads an RFC 3339 timestamp column.
fn time_field(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn opt_time_field(row: &Row<'_>, idx: usize) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            }),
    }
}

/// Reads a domain-enum column; the schema CHECK constraints make a parse
/// failure here a corruption signal, not a normal condition.
fn enum_field<T>(row: &Row<'_>, idx: usize) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn scan_cluster(row: &Row<'_>) -> Result<Cluster, rusqlite::Error> {
    Ok(Cluster {
        id: row.get(0)?,
        name: row.get(1)?,
        repo_path: row.get(2)?,
        remote_url: row.get(3)?,
        created_at: time_field(row, 4)?,
    })
}

fn scan_crew(row: &Row<'_>) -> Result<Crew, rusqlite::Error> {
    Ok(Crew {
        id: row.get(0)?,
        cluster_id: row.get(1)?,
        name: row.get(2)?,
        objective: row.get(3)?,
        constraints: row.get(4)?,
        allowed_commands: row.get(5)?,
        ownership_paths: row.get(6)?,
        created_at: time_field(row, 7)?,
        updated_at: time_field(row, 8)?,
    })
}

fn scan_thread(row: &Row<'_>) -> Result<Thread, rusqlite::Error> {
    Ok(Thread {
        id: row.get(0)?,
        cluster_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: time_field(row, 4)?,
        updated_at: time_field(row, 5)?,
    })
}

fn scan_task(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    Ok(Task {
        id: row.get(0)?,
        cluster_id: row.get(1)?,
        thread_id: row.get(2)?,
        title: row.get(3)?,
        prompt: row.get(4)?,
        complexity: enum_field(row, 5)?,
        mode: enum_field(row, 6)?,
        status: enum_field(row, 7)?,
        created_at: time_field(row, 8)?,
        updated_at: time_field(row, 9)?,
    })
}

fn scan_execution(row: &Row<'_>) -> Result<Execution, rusqlite::Error> {
    Ok(Execution {
        id: row.get(0)?,
        task_id: row.get(1)?,
        cluster_id: row.get(2)?,
        crew_id: row.get(3)?,
        base_branch: row.get(4)?,
        exec_branch: row.get(5)?,
        worktree_path: row.get(6)?,
        status: enum_field(row, 7)?,
        started_at: opt_time_field(row, 8)?,
        finished_at: opt_time_field(row, 9)?,
        created_at: time_field(row, 10)?,
        updated_at: time_field(row, 11)?,
    })
}

fn scan_agent_run(row: &Row<'_>) -> Result<AgentRun, rusqlite::Error> {
    Ok(AgentRun {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        agent_type: enum_field(row, 2)?,
        role: row.get(3)?,
        prompt: row.get(4)?,
        summary: row.get(5)?,
        outcome: enum_field(row, 6)?,
        files_changed: row.get(7)?,
        created_at: time_field(row, 8)?,
    })
}

fn scan_lesson(row: &Row<'_>) -> Result<AgentLesson, rusqlite::Error> {
    Ok(AgentLesson {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        agent_type: enum_field(row, 2)?,
        lesson_type: enum_field(row, 3)?,
        content: row.get(4)?,
        created_at: time_field(row, 5)?,
    })
}
