use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::error::StoreResult;

pub const CURRENT_DB_SCHEMA_VERSION: u32 = 1;

pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: V1_RECORD_MODEL,
}];

const V1_RECORD_MODEL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL CHECK (length(trim(display_name)) > 0),
    email TEXT COLLATE NOCASE UNIQUE,
    app_role TEXT NOT NULL DEFAULT 'researcher' CHECK (app_role IN ('admin', 'researcher')),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS experiments (
    id TEXT PRIMARY KEY,
    owner_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
    name TEXT NOT NULL,
    description TEXT,
    experiment_type TEXT,
    status TEXT NOT NULL DEFAULT 'draft'
        CHECK (status IN ('draft', 'active', 'completed', 'archived')),
    conditions_json TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(conditions_json)),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS experiment_members (
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK (role IN ('owner', 'collaborator', 'viewer')),
    can_add_notes INTEGER NOT NULL DEFAULT 0 CHECK (can_add_notes IN (0, 1)),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (experiment_id, user_id)
);

CREATE TABLE IF NOT EXISTS treatment_groups (
    id TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (experiment_id, name),
    UNIQUE (id, experiment_id)
);

CREATE TABLE IF NOT EXISTS experiment_protocol_defaults (
    experiment_id TEXT PRIMARY KEY REFERENCES experiments(id) ON DELETE CASCADE,
    serum_type TEXT,
    serum_concentration_pct REAL,
    block_minutes INTEGER,
    primary_volume_ul REAL,
    primary_incubation TEXT,
    secondary_volume_ul REAL,
    secondary_incubation TEXT,
    uses_edu INTEGER NOT NULL DEFAULT 0 CHECK (uses_edu IN (0, 1)),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS slides (
    id TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    treatment_group_id TEXT NOT NULL,
    owner_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
    label TEXT NOT NULL,
    specimen_origin_json TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(specimen_origin_json)),
    experiment_overrides_json TEXT NOT NULL DEFAULT '{}'
        CHECK (json_valid(experiment_overrides_json)),
    storage_location TEXT,
    imaged_at TEXT,
    imaging_notes TEXT,
    status TEXT NOT NULL DEFAULT 'in_storage'
        CHECK (status IN ('in_storage', 'checked_out', 'imaged', 'archived', 'destroyed')),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    FOREIGN KEY (treatment_group_id, experiment_id)
        REFERENCES treatment_groups(id, experiment_id)
);

CREATE TABLE IF NOT EXISTS antibodies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    target TEXT,
    host_species TEXT NOT NULL,
    vendor TEXT,
    catalog_number TEXT,
    lot_number TEXT,
    igg_subtype TEXT,
    fluorophore TEXT,
    anti_species TEXT,
    stock_concentration TEXT,
    is_secondary INTEGER NOT NULL DEFAULT 0 CHECK (is_secondary IN (0, 1)),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS slide_primary_antibodies (
    slide_id TEXT NOT NULL REFERENCES slides(id) ON DELETE CASCADE,
    antibody_id TEXT NOT NULL REFERENCES antibodies(id) ON DELETE RESTRICT,
    dilution TEXT,
    incubation_time TEXT,
    incubation_temperature TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (slide_id, antibody_id)
);

CREATE TABLE IF NOT EXISTS slide_secondary_antibodies (
    slide_id TEXT NOT NULL REFERENCES slides(id) ON DELETE CASCADE,
    antibody_id TEXT NOT NULL REFERENCES antibodies(id) ON DELETE RESTRICT,
    dilution TEXT,
    incubation_time TEXT,
    incubation_temperature TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (slide_id, antibody_id)
);

CREATE TABLE IF NOT EXISTS slide_edu_conditions (
    id TEXT PRIMARY KEY,
    slide_id TEXT NOT NULL REFERENCES slides(id) ON DELETE CASCADE,
    edu_concentration_um REAL NOT NULL,
    incubation_hours REAL NOT NULL,
    administration_route TEXT,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS slide_assets (
    id TEXT PRIMARY KEY,
    slide_id TEXT NOT NULL REFERENCES slides(id) ON DELETE CASCADE,
    asset_type TEXT NOT NULL
        CHECK (asset_type IN ('image', 'raw_microscopy', 'cell_count_export', 'analysis', 'other')),
    uri TEXT NOT NULL,
    content_hash TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(metadata_json)),
    created_by_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS slide_notes (
    id TEXT PRIMARY KEY,
    slide_id TEXT NOT NULL REFERENCES slides(id) ON DELETE CASCADE,
    author_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
    note_type TEXT NOT NULL DEFAULT 'general'
        CHECK (note_type IN ('general', 'imaging', 'storage', 'analysis', 'presentation')),
    body TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS slide_usage_events (
    id TEXT PRIMARY KEY,
    slide_id TEXT NOT NULL REFERENCES slides(id) ON DELETE CASCADE,
    used_by_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
    usage_type TEXT NOT NULL
        CHECK (usage_type IN ('presentation', 'cell_counting', 'export', 'publication')),
    context TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(metadata_json)),
    used_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS audit_log (
    id TEXT PRIMARY KEY,
    actor_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    action TEXT NOT NULL CHECK (action IN ('create', 'update', 'delete')),
    before_json TEXT CHECK (before_json IS NULL OR json_valid(before_json)),
    after_json TEXT CHECK (after_json IS NULL OR json_valid(after_json)),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS user_storage_locations (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    location TEXT NOT NULL CHECK (length(trim(location)) > 0),
    last_used_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (user_id, location)
);

CREATE TABLE IF NOT EXISTS experiment_exports (
    id TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    exported_by_user_id TEXT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
    file_path TEXT NOT NULL,
    payload_json TEXT NOT NULL CHECK (json_valid(payload_json)),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_experiments_owner ON experiments(owner_user_id);
CREATE INDEX IF NOT EXISTS idx_experiment_members_user ON experiment_members(user_id);
CREATE INDEX IF NOT EXISTS idx_treatment_groups_experiment ON treatment_groups(experiment_id, sort_order);
CREATE INDEX IF NOT EXISTS idx_slides_experiment ON slides(experiment_id);
CREATE INDEX IF NOT EXISTS idx_slides_group ON slides(treatment_group_id);
CREATE INDEX IF NOT EXISTS idx_slides_owner ON slides(owner_user_id);
CREATE INDEX IF NOT EXISTS idx_slide_primary_antibodies_antibody ON slide_primary_antibodies(antibody_id);
CREATE INDEX IF NOT EXISTS idx_slide_secondary_antibodies_antibody ON slide_secondary_antibodies(antibody_id);
CREATE INDEX IF NOT EXISTS idx_slide_edu_conditions_slide ON slide_edu_conditions(slide_id);
CREATE INDEX IF NOT EXISTS idx_slide_assets_slide ON slide_assets(slide_id);
CREATE INDEX IF NOT EXISTS idx_slide_assets_creator ON slide_assets(created_by_user_id);
CREATE INDEX IF NOT EXISTS idx_slide_notes_slide ON slide_notes(slide_id, created_at);
CREATE INDEX IF NOT EXISTS idx_slide_notes_author ON slide_notes(author_user_id);
CREATE INDEX IF NOT EXISTS idx_slide_usage_events_slide ON slide_usage_events(slide_id, used_at);
CREATE INDEX IF NOT EXISTS idx_slide_usage_events_user ON slide_usage_events(used_by_user_id);
CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_audit_log_actor ON audit_log(actor_user_id);
CREATE INDEX IF NOT EXISTS idx_experiment_exports_experiment ON experiment_exports(experiment_id);
CREATE INDEX IF NOT EXISTS idx_experiment_exports_user ON experiment_exports(exported_by_user_id);

CREATE TRIGGER IF NOT EXISTS slide_notes_append_only
BEFORE UPDATE ON slide_notes
BEGIN
    SELECT RAISE(ABORT, 'slide_notes rows are append-only');
END;

CREATE TRIGGER IF NOT EXISTS slide_usage_events_append_only
BEFORE UPDATE ON slide_usage_events
BEGIN
    SELECT RAISE(ABORT, 'slide_usage_events rows are append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log rows are append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log rows are append-only');
END;

CREATE VIEW IF NOT EXISTS slide_note_feed AS
SELECT
    s.id AS slide_id,
    'slide' AS source,
    NULL AS note_id,
    'imaging' AS note_type,
    s.imaging_notes AS body,
    s.owner_user_id AS author_user_id,
    COALESCE(s.imaged_at, s.updated_at) AS created_at,
    0 AS seq
FROM slides s
WHERE s.imaging_notes IS NOT NULL AND length(trim(s.imaging_notes)) > 0
UNION ALL
SELECT
    n.slide_id,
    'note',
    n.id,
    n.note_type,
    n.body,
    n.author_user_id,
    n.created_at,
    n.rowid
FROM slide_notes n;
"#;

pub fn migrate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    let current = read_schema_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            r#"
            INSERT INTO metadata(key, value)
            VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![migration.version.to_string()],
        )?;
        tx.commit()?;
        info!(version = migration.version, "applied schema migration");
    }

    Ok(())
}

pub fn read_schema_version(conn: &Connection) -> StoreResult<u32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
}
