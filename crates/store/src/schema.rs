//! Schema migrations. Every statement is idempotent and runs at open.

/// `(label, statement)` pairs, applied in order.
pub(crate) const MIGRATIONS: &[(&str, &str)] = &[
    (
        "agents table",
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            role            TEXT NOT NULL DEFAULT '',
            system_prompt   TEXT NOT NULL DEFAULT '',
            provider        TEXT NOT NULL DEFAULT '',
            model           TEXT NOT NULL DEFAULT '',
            status          TEXT NOT NULL DEFAULT 'idle',
            team_id         TEXT NOT NULL DEFAULT '',
            is_lead         INTEGER NOT NULL DEFAULT 0,
            is_ephemeral    INTEGER NOT NULL DEFAULT 0,
            parent_agent_id TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            CHECK (is_ephemeral = 0 OR parent_agent_id <> '')
        )
        "#,
    ),
    (
        "agents parent index",
        "CREATE INDEX IF NOT EXISTS idx_agents_parent ON agents(parent_agent_id)",
    ),
    (
        "tasks table",
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status      TEXT NOT NULL DEFAULT 'pending',
            priority    INTEGER NOT NULL DEFAULT 0,
            assigned_to TEXT NOT NULL DEFAULT '',
            parent_id   TEXT NOT NULL DEFAULT '',
            result      TEXT NOT NULL DEFAULT '',
            error       TEXT NOT NULL DEFAULT '',
            project_id  TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        )
        "#,
    ),
    (
        "tasks assignee index",
        "CREATE INDEX IF NOT EXISTS idx_tasks_assigned ON tasks(assigned_to, status)",
    ),
    (
        "tasks status index",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, priority DESC, created_at)",
    ),
    (
        "projects table",
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id             TEXT PRIMARY KEY,
            name           TEXT NOT NULL DEFAULT '',
            workspace_path TEXT NOT NULL DEFAULT '',
            created_at     TEXT NOT NULL
        )
        "#,
    ),
    (
        "tool_policies table",
        r#"
        CREATE TABLE IF NOT EXISTS tool_policies (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            scope        TEXT NOT NULL,
            scope_id     TEXT NOT NULL DEFAULT '',
            tool_pattern TEXT NOT NULL,
            action       TEXT NOT NULL,
            created_at   TEXT NOT NULL
        )
        "#,
    ),
    (
        "transcripts table",
        r#"
        CREATE TABLE IF NOT EXISTS transcripts (
            id           TEXT PRIMARY KEY,
            agent_id     TEXT NOT NULL,
            task_id      TEXT NOT NULL,
            project_id   TEXT NOT NULL DEFAULT '',
            iteration    INTEGER NOT NULL DEFAULT 0,
            role         TEXT NOT NULL,
            content      TEXT NOT NULL DEFAULT '',
            tool_calls   TEXT NOT NULL DEFAULT '[]',
            tool_call_id TEXT,
            redacted     INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL
        )
        "#,
    ),
    (
        "transcripts task index",
        "CREATE INDEX IF NOT EXISTS idx_transcripts_task ON transcripts(task_id, created_at)",
    ),
    (
        "transcripts agent index",
        "CREATE INDEX IF NOT EXISTS idx_transcripts_agent ON transcripts(agent_id, created_at)",
    ),
    (
        "approvals table",
        r#"
        CREATE TABLE IF NOT EXISTS approvals (
            id               TEXT PRIMARY KEY,
            agent_id         TEXT NOT NULL,
            task_id          TEXT NOT NULL DEFAULT '',
            action           TEXT NOT NULL,
            reason           TEXT NOT NULL DEFAULT '',
            details          TEXT NOT NULL DEFAULT '',
            status           TEXT NOT NULL DEFAULT 'pending',
            reviewer_comment TEXT NOT NULL DEFAULT '',
            timeout_minutes  INTEGER NOT NULL,
            created_at       TEXT NOT NULL,
            resolved_at      TEXT
        )
        "#,
    ),
    (
        "approvals status index",
        "CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals(status, created_at)",
    ),
    (
        "human_requests table",
        r#"
        CREATE TABLE IF NOT EXISTS human_requests (
            id               TEXT PRIMARY KEY,
            agent_id         TEXT NOT NULL,
            task_id          TEXT NOT NULL DEFAULT '',
            request_type     TEXT NOT NULL,
            title            TEXT NOT NULL,
            description      TEXT NOT NULL DEFAULT '',
            urgency          TEXT NOT NULL DEFAULT 'normal',
            status           TEXT NOT NULL DEFAULT 'pending',
            metadata         TEXT NOT NULL DEFAULT '{}',
            response_data    TEXT NOT NULL DEFAULT '',
            response_comment TEXT NOT NULL DEFAULT '',
            resolved_by      TEXT NOT NULL DEFAULT '',
            timeout_minutes  INTEGER NOT NULL,
            created_at       TEXT NOT NULL,
            resolved_at      TEXT
        )
        "#,
    ),
    (
        "human_requests status index",
        "CREATE INDEX IF NOT EXISTS idx_human_requests_status ON human_requests(status, created_at)",
    ),
    (
        "memory_entries table",
        r#"
        CREATE TABLE IF NOT EXISTS memory_entries (
            iid        INTEGER PRIMARY KEY AUTOINCREMENT,
            id         TEXT UNIQUE NOT NULL,
            agent_id   TEXT NOT NULL,
            content    TEXT NOT NULL,
            category   TEXT NOT NULL DEFAULT '',
            embedding  BLOB,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "memory_entries agent index",
        "CREATE INDEX IF NOT EXISTS idx_memory_agent ON memory_entries(agent_id, created_at DESC)",
    ),
    (
        "memory FTS5 table",
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS memory_entries_fts USING fts5(
            content,
            content='memory_entries',
            content_rowid='iid',
            tokenize='porter unicode61'
        )
        "#,
    ),
    (
        "memory insert trigger",
        r#"
        CREATE TRIGGER IF NOT EXISTS memory_entries_ai AFTER INSERT ON memory_entries BEGIN
            INSERT INTO memory_entries_fts(rowid, content) VALUES (new.iid, new.content);
        END
        "#,
    ),
    (
        "memory delete trigger",
        r#"
        CREATE TRIGGER IF NOT EXISTS memory_entries_ad AFTER DELETE ON memory_entries BEGIN
            INSERT INTO memory_entries_fts(memory_entries_fts, rowid, content)
            VALUES ('delete', old.iid, old.content);
        END
        "#,
    ),
    (
        "memory update trigger",
        r#"
        CREATE TRIGGER IF NOT EXISTS memory_entries_au AFTER UPDATE ON memory_entries BEGIN
            INSERT INTO memory_entries_fts(memory_entries_fts, rowid, content)
            VALUES ('delete', old.iid, old.content);
            INSERT INTO memory_entries_fts(rowid, content) VALUES (new.iid, new.content);
        END
        "#,
    ),
];
