//! SQLite schema definition

/// SQL schema for the index database
pub const SCHEMA_SQL: &str = r#"
-- Sites: one row per configured root
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    status_time TEXT NOT NULL,
    last_error TEXT,
    -- Indexing claim: owning process and expiry (unix millis)
    lease_owner TEXT,
    lease_expires INTEGER
);

-- Pages: one row per fetched path of a site
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    code INTEGER NOT NULL,
    title TEXT,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(site_id, path)
);

-- Lemmas: site-scoped dictionary with running occurrence counts
CREATE TABLE IF NOT EXISTS lemmas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    lemma TEXT NOT NULL,
    frequency INTEGER NOT NULL DEFAULT 0,
    UNIQUE(site_id, lemma)
);

-- Postings: lemma occurrences on one page
CREATE TABLE IF NOT EXISTS postings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    lemma_id INTEGER NOT NULL REFERENCES lemmas(id) ON DELETE CASCADE,
    lemma TEXT NOT NULL,
    rank REAL NOT NULL,
    UNIQUE(page_id, lemma_id)
);

-- Indexing runs: history and stats
CREATE TABLE IF NOT EXISTS indexing_runs (
    id TEXT PRIMARY KEY,
    site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    pages_indexed INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    errors_json TEXT
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_pages_site ON pages(site_id);
CREATE INDEX IF NOT EXISTS idx_lemmas_lemma ON lemmas(lemma);
CREATE INDEX IF NOT EXISTS idx_postings_lemma ON postings(lemma_id);
CREATE INDEX IF NOT EXISTS idx_runs_site ON indexing_runs(site_id);
"#;

/// Columns added to `sites` after the first release, applied to older
/// databases on open
pub const SITE_LEASE_COLUMNS: &[(&str, &str)] = &[
    ("lease_owner", "ALTER TABLE sites ADD COLUMN lease_owner TEXT"),
    ("lease_expires", "ALTER TABLE sites ADD COLUMN lease_expires INTEGER"),
];
