//! Relational schema for the tariff store
//!
//! One SQLite database holds the temporal rate tables, the evidence store,
//! the work queues and the run/audit records. Rate rows and the audit log
//! are append-only at the row level; supersession only ever touches the
//! predecessor's `effective_end` and `superseded_by_id`.

/// Schema with WAL and cache pragmas applied at open.
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -32000;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS rate_rows (
    id TEXT PRIMARY KEY,
    program_id TEXT NOT NULL,
    hts8 TEXT,
    hts10 TEXT,
    country TEXT,
    country_group TEXT,
    material TEXT,
    variant TEXT,
    chapter99_code TEXT NOT NULL,
    duty_rate REAL,
    formula TEXT,
    effective_start TEXT NOT NULL,
    effective_end TEXT,
    role TEXT NOT NULL,
    source_document_id TEXT,
    evidence_id TEXT,
    supersedes_id TEXT,
    superseded_by_id TEXT,
    dataset_tag TEXT,
    is_archived INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_rate_rows_lookup
    ON rate_rows(program_id, hts8, effective_start DESC);

CREATE INDEX IF NOT EXISTS idx_rate_rows_origin
    ON rate_rows(program_id, country, country_group);

CREATE INDEX IF NOT EXISTS idx_rate_rows_chain
    ON rate_rows(supersedes_id);

CREATE TABLE IF NOT EXISTS section232_materials (
    id TEXT PRIMARY KEY,
    hts8 TEXT NOT NULL,
    hts10 TEXT,
    material TEXT NOT NULL,
    claim_code TEXT NOT NULL,
    disclaim_code TEXT NOT NULL,
    duty_rate REAL NOT NULL,
    min_percent REAL NOT NULL DEFAULT 0,
    split_policy TEXT NOT NULL,
    split_threshold_percent REAL NOT NULL DEFAULT 0,
    content_basis TEXT NOT NULL,
    quantity_unit TEXT,
    effective_start TEXT NOT NULL,
    effective_end TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_section232_hts
    ON section232_materials(hts8, material, effective_start DESC);

CREATE TABLE IF NOT EXISTS exclusion_claims (
    id TEXT PRIMARY KEY,
    hts8 TEXT NOT NULL,
    description TEXT NOT NULL,
    claim_code TEXT NOT NULL,
    effective_start TEXT NOT NULL,
    effective_end TEXT,
    status TEXT NOT NULL DEFAULT 'unverified'
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_exclusion_claims_hts
    ON exclusion_claims(hts8, effective_start DESC);

CREATE TABLE IF NOT EXISTS country_group_members (
    group_name TEXT NOT NULL,
    country TEXT NOT NULL,
    PRIMARY KEY (group_name, country)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    external_id TEXT NOT NULL,
    tier TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    publication_date TEXT,
    fetched_at INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    raw_bytes BLOB NOT NULL,
    canonical_text TEXT,
    UNIQUE (source, external_id)
);

CREATE INDEX IF NOT EXISTS idx_documents_sha ON documents(sha256);

CREATE TABLE IF NOT EXISTS document_chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    char_start INTEGER NOT NULL,
    char_end INTEGER NOT NULL,
    text TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    embedding_key TEXT,
    UNIQUE (document_id, seq)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS evidence_packets (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    quote TEXT NOT NULL,
    quote_sha256 TEXT NOT NULL,
    extractor_output TEXT,
    validator_output TEXT,
    write_gate_passed INTEGER NOT NULL DEFAULT 0,
    gate_failures TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS candidate_changes (
    id TEXT PRIMARY KEY,
    program_id TEXT NOT NULL,
    hts8 TEXT,
    hts10 TEXT,
    country TEXT,
    country_group TEXT,
    material TEXT,
    variant TEXT,
    role TEXT NOT NULL,
    chapter99_code TEXT NOT NULL,
    duty_rate REAL,
    formula TEXT,
    effective_start TEXT NOT NULL,
    effective_end TEXT,
    evidence_id TEXT,
    source_document_id TEXT,
    run_id TEXT,
    dataset_tag TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    block_reason TEXT,
    priority INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_candidates_status
    ON candidate_changes(status, priority DESC, created_at);

CREATE TABLE IF NOT EXISTS ingest_jobs (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    external_id TEXT NOT NULL,
    url TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    attempts INTEGER NOT NULL DEFAULT 0,
    claim_token TEXT,
    last_error TEXT,
    document_id TEXT,
    run_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (source, external_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_ingest_jobs_status
    ON ingest_jobs(status, created_at);

CREATE TABLE IF NOT EXISTS regulatory_runs (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    status TEXT NOT NULL DEFAULT 'running',
    documents_discovered INTEGER NOT NULL DEFAULT 0,
    jobs_enqueued INTEGER NOT NULL DEFAULT 0,
    error TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_runs_source
    ON regulatory_runs(source, started_at DESC);

CREATE TABLE IF NOT EXISTS run_documents (
    run_id TEXT NOT NULL,
    document_external_id TEXT NOT NULL,
    source TEXT NOT NULL,
    url TEXT NOT NULL,
    discovered_at INTEGER NOT NULL,
    PRIMARY KEY (run_id, source, document_external_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS run_changes (
    run_id TEXT NOT NULL,
    rate_row_id TEXT NOT NULL,
    candidate_id TEXT,
    committed_at INTEGER NOT NULL,
    PRIMARY KEY (run_id, rate_row_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    action TEXT NOT NULL,
    before_json TEXT,
    after_json TEXT,
    at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_log_entity
    ON audit_log(entity, entity_id);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;
"#;
