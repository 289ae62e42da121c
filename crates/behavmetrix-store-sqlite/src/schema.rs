//! SQL schema for the BehavMetrix SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! layout so a later release can gate migrations on it.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS` and `OR IGNORE`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Rows are never deleted; `active = 0` retires an animal.
CREATE TABLE IF NOT EXISTS animals (
    animal_id         TEXT PRIMARY KEY,
    name              TEXT,
    cage_id           TEXT NOT NULL,
    sex               TEXT NOT NULL CHECK (sex IN ('M', 'F')),
    age               REAL,
    weight_kg         REAL,
    matriline         TEXT,
    rank_value        REAL NOT NULL,
    rank_origin       TEXT NOT NULL DEFAULT 'computed',  -- 'computed' | 'manual'
    rank_updated_at   TEXT NOT NULL,
    rank_version      INTEGER NOT NULL DEFAULT 0,
    welfare_flag      TEXT,                              -- NULL until evaluated
    enrichment_status TEXT,
    active            INTEGER NOT NULL DEFAULT 1,
    created_at        TEXT NOT NULL
);

-- `ended_at` is NULL while the session is open and written once on close.
CREATE TABLE IF NOT EXISTS sessions (
    session_id  TEXT PRIMARY KEY,
    name        TEXT,
    mode        TEXT NOT NULL,
    observer    TEXT,
    cage_id     TEXT,
    reason      TEXT,
    notes       TEXT,
    started_at  TEXT NOT NULL,
    ended_at    TEXT,
    CHECK (ended_at IS NULL OR ended_at >= started_at)
);

-- The logs are strictly append-only.
CREATE TABLE IF NOT EXISTS behavior_events (
    event_id    TEXT PRIMARY KEY,
    actor_id    TEXT NOT NULL REFERENCES animals(animal_id),
    target_id   TEXT REFERENCES animals(animal_id),
    behavior    TEXT NOT NULL,
    intensity   INTEGER NOT NULL CHECK (intensity BETWEEN 1 AND 5),
    reason      TEXT,
    observer    TEXT,
    session_id  TEXT REFERENCES sessions(session_id),
    observed_at TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    CHECK (target_id IS NULL OR target_id != actor_id)
);

CREATE TABLE IF NOT EXISTS stress_logs (
    log_id      TEXT PRIMARY KEY,
    animal_id   TEXT NOT NULL REFERENCES animals(animal_id),
    indicator   TEXT NOT NULL,
    value       REAL NOT NULL,
    notes       TEXT,
    observed_at TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrichment_logs (
    log_id           TEXT PRIMARY KEY,
    animal_id        TEXT NOT NULL REFERENCES animals(animal_id),
    item             TEXT NOT NULL,
    duration_minutes REAL,
    frequency        INTEGER NOT NULL DEFAULT 1 CHECK (frequency >= 1),
    outcome          TEXT NOT NULL,
    observed_at      TEXT NOT NULL,
    recorded_at      TEXT NOT NULL
);

-- `tags` is comma-joined.
CREATE TABLE IF NOT EXISTS incidents (
    incident_id    TEXT PRIMARY KEY,
    animal_id      TEXT REFERENCES animals(animal_id),
    session_id     TEXT REFERENCES sessions(session_id),
    reason         TEXT NOT NULL,
    description    TEXT,
    attachment_url TEXT,
    media_type     TEXT,
    tags           TEXT NOT NULL DEFAULT '',
    observed_at    TEXT NOT NULL,
    recorded_at    TEXT NOT NULL
);

-- Single row describing whether cached ranks reflect the behavior log.
CREATE TABLE IF NOT EXISTS rank_cache (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    stale           INTEGER NOT NULL DEFAULT 0,
    applied_through TEXT,
    generation      INTEGER NOT NULL DEFAULT 0
);
INSERT OR IGNORE INTO rank_cache (id) VALUES (1);

CREATE INDEX IF NOT EXISTS behavior_observed_idx   ON behavior_events(observed_at);
CREATE INDEX IF NOT EXISTS behavior_actor_idx      ON behavior_events(actor_id);
CREATE INDEX IF NOT EXISTS behavior_target_idx     ON behavior_events(target_id);
CREATE INDEX IF NOT EXISTS stress_animal_idx       ON stress_logs(animal_id, observed_at);
CREATE INDEX IF NOT EXISTS enrichment_animal_idx   ON enrichment_logs(animal_id, observed_at);
CREATE INDEX IF NOT EXISTS animals_cage_idx        ON animals(cage_id);
CREATE INDEX IF NOT EXISTS behavior_session_idx    ON behavior_events(session_id);
CREATE INDEX IF NOT EXISTS incident_observed_idx   ON incidents(observed_at);
CREATE INDEX IF NOT EXISTS session_started_idx     ON sessions(started_at);

PRAGMA user_version = 1;
";
