pub const SCHEMA: &str = r#"
-- Latest content of every versioned document
CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    revision INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- One row per landed change; the head row mirrors documents.revision
CREATE TABLE IF NOT EXISTS commits (
    key TEXT NOT NULL REFERENCES documents(key) ON DELETE CASCADE,
    revision INTEGER NOT NULL,
    author TEXT NOT NULL,
    summary TEXT NOT NULL,
    committed_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (key, revision)
);

-- Physical repositories, independent of their metadata
CREATE TABLE IF NOT EXISTS repositories (
    project TEXT NOT NULL,
    name TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (project, name)
);

CREATE INDEX IF NOT EXISTS idx_commits_key ON commits(key);
"#;
