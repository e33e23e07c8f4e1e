use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE documents (
    id TEXT PRIMARY KEY NOT NULL,
    content_hash TEXT NOT NULL,
    original_name TEXT NOT NULL,
    raw_path TEXT NOT NULL,
    processed_path TEXT,
    mime_type TEXT NOT NULL,
    size_bytes BIGINT NOT NULL,
    is_duplicate INTEGER NOT NULL DEFAULT 0,
    duplicate_of_id TEXT,
    extracted_text TEXT,
    extracted_metadata TEXT,
    skew_angles TEXT,
    quality_score REAL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY NOT NULL,
    content_hash TEXT NOT NULL,
    original_name TEXT NOT NULL,
    raw_path TEXT NOT NULL,
    processed_path TEXT,
    mime_type TEXT NOT NULL,
    size_bytes BIGINT NOT NULL,
    is_duplicate INTEGER NOT NULL DEFAULT 0,
    duplicate_of_id TEXT,
    extracted_text TEXT,
    extracted_metadata TEXT,
    skew_angles TEXT,
    quality_score REAL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE processing_steps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    detail TEXT,
    UNIQUE (document_id, stage)
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE IF NOT EXISTS processing_steps (
    id SERIAL PRIMARY KEY,
    document_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    detail TEXT,
    CONSTRAINT processing_steps_document_stage UNIQUE (document_id, stage)
)"#,
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_documents_content_hash ON documents(content_hash)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX idx_documents_content_hash ON documents(content_hash)",
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_documents_status ON documents(status)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX idx_documents_status ON documents(status)",
                ),
        )
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    "CREATE INDEX idx_processing_steps_status ON processing_steps(status, started_at)",
                )
                .for_backend(
                    "postgres",
                    "CREATE INDEX idx_processing_steps_status ON processing_steps(status, started_at)",
                ),
        )
}
