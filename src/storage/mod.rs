//! SQLite persistence for projects, memberships, tasks, comments, and
//! notifications.
//!
//! The authorization engine never talks to this module directly — it
//! consumes [`MembershipStore`] snapshots fetched by the RPC handlers. User
//! accounts live with the external identity service; user ids are opaque
//! strings here and carry no foreign key.

use anyhow::{Context as _, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

use crate::identity::{ActorId, AuthError, IdentityProvider};
use crate::membership::{MembershipStore, ProjectId, Role};

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

/// An internal caller attempted an operation that would break a data-model
/// invariant (e.g. deleting a project owner's membership while the project
/// still exists). Programming error in the calling layer — surfaced as an
/// internal error, never shown to the actor.
#[derive(Debug, thiserror::Error)]
#[error("invariant violation: {0}")]
pub struct InvariantViolation(pub String);

// ─── Rows ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Display color, `#rrggbb`.
    pub color: Option<String>,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRow {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRow {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    /// One of: todo | in_progress | review | done.
    pub status: String,
    /// One of: low | medium | high.
    pub priority: String,
    pub assignee_id: Option<String>,
    pub due_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRow {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: Option<String>,
    pub read: bool,
    pub created_at: String,
}

/// Optional narrowing applied to task listing *after* the membership
/// visibility filter — never instead of it.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub project_id: Option<String>,
    pub status: Option<String>,
    pub assignee_id: Option<String>,
}

/// Partial task update; `None` leaves the column unchanged.
#[derive(Debug, Default, Clone)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee_id: Option<String>,
    pub due_date: Option<String>,
}

// ─── Storage ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("collabd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // A :memory: database lives per-connection — pin the pool to one.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        let stmts = [
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                color TEXT,
                owner_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS project_members (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                created_at TEXT NOT NULL,
                UNIQUE (project_id, user_id)
            )",
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'todo',
                priority TEXT NOT NULL DEFAULT 'medium',
                assignee_id TEXT,
                due_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT,
                read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS api_tokens (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_members_user ON project_members (user_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks (project_id)",
            "CREATE INDEX IF NOT EXISTS idx_comments_task ON comments (task_id)",
            "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications (user_id, read)",
        ];
        for stmt in stmts {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .context("failed to initialize database schema")?;
        }
        Ok(())
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    // ─── Projects ────────────────────────────────────────────────────────────

    /// Create a project and its owner membership in one transaction.
    /// A project must never exist without its creator holding owner rights.
    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        color: Option<&str>,
        owner: &ActorId,
    ) -> Result<ProjectRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO projects (id, name, description, color, owner_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(description)
        .bind(color)
        .bind(owner.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO project_members (id, project_id, user_id, role, created_at)
             VALUES (?, ?, ?, 'owner', ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&id)
        .bind(owner.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_project(&id)
            .await?
            .context("project vanished right after creation")
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<ProjectRow>> {
        Ok(sqlx::query_as("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Every project the actor owns or is a member of, most recently
    /// updated first.
    pub async fn list_projects_for(&self, actor: &ActorId) -> Result<Vec<ProjectRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM projects
                 WHERE owner_id = ?
                    OR id IN (SELECT project_id FROM project_members WHERE user_id = ?)
                 ORDER BY updated_at DESC",
            )
            .bind(actor.as_str())
            .bind(actor.as_str())
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    pub async fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<ProjectRow> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE projects
             SET name = COALESCE(?, name),
                 description = COALESCE(?, description),
                 color = COALESCE(?, color),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(color)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_project(id).await?.context("project not found")
    }

    /// Delete a project. Members, tasks, and comments go with it (cascade).
    pub async fn delete_project(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// User ids of everyone with standing on the project: owner plus all
    /// membership rows. Used to patch live subscriptions after a delete.
    pub async fn project_member_ids(&self, project_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT owner_id FROM projects WHERE id = ?
             UNION
             SELECT user_id FROM project_members WHERE project_id = ?",
        )
        .bind(project_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ─── Members ─────────────────────────────────────────────────────────────

    pub async fn get_member(&self, project_id: &str, user_id: &str) -> Result<Option<MemberRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM project_members WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_members(&self, project_id: &str) -> Result<Vec<MemberRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM project_members WHERE project_id = ? ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn add_member(
        &self,
        project_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<MemberRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO project_members (id, project_id, user_id, role, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_member(project_id, user_id)
            .await?
            .context("membership vanished right after creation")
    }

    /// Remove a membership row. Returns `false` if no such membership
    /// existed. Removing the project owner's own membership while the
    /// project exists breaks the owner-always-has-rights invariant and is
    /// refused outright.
    pub async fn remove_member(&self, project_id: &str, user_id: &str) -> Result<bool> {
        let owner: Option<(String,)> = sqlx::query_as("SELECT owner_id FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        if owner.map(|(id,)| id == user_id).unwrap_or(false) {
            return Err(InvariantViolation(format!(
                "cannot remove owner membership of project {project_id}"
            ))
            .into());
        }
        let result = sqlx::query("DELETE FROM project_members WHERE project_id = ? AND user_id = ?")
            .bind(project_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ─── Tasks ───────────────────────────────────────────────────────────────

    /// Tasks visible to `actor` — membership first, then the optional
    /// narrowing by project, status, or assignee.
    pub async fn list_tasks_for(&self, actor: &ActorId, filter: &TaskFilter) -> Result<Vec<TaskRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT t.* FROM tasks t
                 JOIN projects p ON p.id = t.project_id
                 WHERE (p.owner_id = ?
                        OR EXISTS (SELECT 1 FROM project_members m
                                   WHERE m.project_id = p.id AND m.user_id = ?))
                   AND (? IS NULL OR t.project_id = ?)
                   AND (? IS NULL OR t.status = ?)
                   AND (? IS NULL OR t.assignee_id = ?)
                 ORDER BY t.created_at DESC",
            )
            .bind(actor.as_str())
            .bind(actor.as_str())
            .bind(&filter.project_id)
            .bind(&filter.project_id)
            .bind(&filter.status)
            .bind(&filter.status)
            .bind(&filter.assignee_id)
            .bind(&filter.assignee_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRow>> {
        Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        project_id: &str,
        title: &str,
        description: Option<&str>,
        status: &str,
        priority: &str,
        assignee_id: Option<&str>,
        due_date: Option<&str>,
    ) -> Result<TaskRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO tasks (id, project_id, title, description, status, priority,
                                assignee_id, due_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(title)
        .bind(description)
        .bind(status)
        .bind(priority)
        .bind(assignee_id)
        .bind(due_date)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_task(&id)
            .await?
            .context("task vanished right after creation")
    }

    pub async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<TaskRow> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE tasks
             SET title = COALESCE(?, title),
                 description = COALESCE(?, description),
                 status = COALESCE(?, status),
                 priority = COALESCE(?, priority),
                 assignee_id = COALESCE(?, assignee_id),
                 due_date = COALESCE(?, due_date),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.status)
        .bind(&update.priority)
        .bind(&update.assignee_id)
        .bind(&update.due_date)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_task(id).await?.context("task not found")
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Comments ────────────────────────────────────────────────────────────

    pub async fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        Ok(sqlx::query_as("SELECT * FROM comments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn create_comment(
        &self,
        task_id: &str,
        author: &ActorId,
        content: &str,
    ) -> Result<CommentRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO comments (id, task_id, user_id, content, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(author.as_str())
        .bind(content)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_comment(&id)
            .await?
            .context("comment vanished right after creation")
    }

    pub async fn update_comment(&self, id: &str, content: &str) -> Result<CommentRow> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE comments SET content = ?, updated_at = ? WHERE id = ?")
            .bind(content)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_comment(id).await?.context("comment not found")
    }

    pub async fn delete_comment(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Notifications ───────────────────────────────────────────────────────

    pub async fn create_notification(
        &self,
        user_id: &str,
        kind: &str,
        title: &str,
        body: Option<&str>,
    ) -> Result<NotificationRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO notifications (id, user_id, kind, title, body, read, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    /// Latest 50 notifications for the user, optionally unread only.
    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<NotificationRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM notifications
             WHERE user_id = ? AND (? = 0 OR read = 0)
             ORDER BY created_at DESC
             LIMIT 50",
        )
        .bind(user_id)
        .bind(unread_only as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Mark one notification read. Scoped to the owning user — marking
    /// someone else's notification reports `false`, same as a missing id.
    pub async fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_notifications_read(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ─── API tokens ──────────────────────────────────────────────────────────

    /// Store a token fingerprint for a user. Token minting itself is owned
    /// by the external identity service (or the `collabd token add` admin
    /// command); only the SHA-256 digest ever touches disk.
    pub async fn register_token(&self, user_id: &str, token: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO api_tokens (token_hash, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(hex_sha256(token))
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lookup_token(&self, token: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM api_tokens WHERE token_hash = ?")
                .bind(hex_sha256(token))
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }
}

fn hex_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ─── Boundary contracts ──────────────────────────────────────────────────────

impl MembershipStore for Storage {
    async fn is_owner(&self, project: &ProjectId, actor: &ActorId) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT owner_id FROM projects WHERE id = ?")
            .bind(project.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(owner,)| owner == actor.as_str()).unwrap_or(false))
    }

    async fn membership_role(
        &self,
        project: &ProjectId,
        actor: &ActorId,
    ) -> Result<Option<Role>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT role FROM project_members WHERE project_id = ? AND user_id = ?",
        )
        .bind(project.as_str())
        .bind(actor.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(role,)| role.parse::<Role>().map_err(Into::into))
            .transpose()
    }

    async fn projects_for(&self, actor: &ActorId) -> Result<Vec<ProjectId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM projects WHERE owner_id = ?
             UNION
             SELECT project_id FROM project_members WHERE user_id = ?",
        )
        .bind(actor.as_str())
        .bind(actor.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| ProjectId::new(id)).collect())
    }
}

impl IdentityProvider for Storage {
    async fn verify(&self, token: &str) -> Result<ActorId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        match self.lookup_token(token).await {
            Ok(Some(user_id)) => Ok(ActorId::new(user_id)),
            Ok(None) => Err(AuthError::InvalidToken),
            Err(e) => {
                tracing::error!(err = %e, "token lookup failed");
                Err(AuthError::InvalidToken)
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
