//! SQLite schema definition.

/// Complete database schema for the drug safety store.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Drug Concepts (local fallback copy of external records)
-- ============================================================================

CREATE TABLE IF NOT EXISTS drug_concepts (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    generic_name TEXT,
    brand_names TEXT NOT NULL DEFAULT '[]',       -- JSON array of strings
    term_type TEXT NOT NULL,
    synonyms TEXT NOT NULL DEFAULT '[]',          -- JSON array of strings
    strength TEXT,
    dosage_form TEXT,
    route TEXT,
    drug_classes TEXT NOT NULL DEFAULT '[]',      -- JSON array of strings
    active_ingredients TEXT NOT NULL DEFAULT '[]',-- JSON array of strings
    last_verified TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

-- FTS5 index used for local search when the knowledge source is unreachable
CREATE VIRTUAL TABLE IF NOT EXISTS drug_concepts_fts USING fts5(
    id,
    name,
    brand_names,
    synonyms,
    content='drug_concepts',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS drug_concepts_ai AFTER INSERT ON drug_concepts BEGIN
    INSERT INTO drug_concepts_fts(rowid, id, name, brand_names, synonyms)
    VALUES (new.rowid, new.id, new.name, new.brand_names, new.synonyms);
END;

CREATE TRIGGER IF NOT EXISTS drug_concepts_ad AFTER DELETE ON drug_concepts BEGIN
    INSERT INTO drug_concepts_fts(drug_concepts_fts, rowid, id, name, brand_names, synonyms)
    VALUES ('delete', old.rowid, old.id, old.name, old.brand_names, old.synonyms);
END;

CREATE TRIGGER IF NOT EXISTS drug_concepts_au AFTER UPDATE ON drug_concepts BEGIN
    INSERT INTO drug_concepts_fts(drug_concepts_fts, rowid, id, name, brand_names, synonyms)
    VALUES ('delete', old.rowid, old.id, old.name, old.brand_names, old.synonyms);
    INSERT INTO drug_concepts_fts(rowid, id, name, brand_names, synonyms)
    VALUES (new.rowid, new.id, new.name, new.brand_names, new.synonyms);
END;

CREATE INDEX IF NOT EXISTS idx_concepts_last_verified ON drug_concepts(last_verified);

-- ============================================================================
-- Allergies (soft delete only)
-- ============================================================================

-- No unique index on (patient_id, lower(allergen_name)) for active rows: the
-- duplicate check is read-then-write and concurrent inserts may both succeed.
CREATE TABLE IF NOT EXISTS allergies (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    allergen_name TEXT NOT NULL,
    allergen_name_normalized TEXT NOT NULL,  -- trimmed, Unicode-lowercased
    allergen_type TEXT NOT NULL,
    allergen_concept_id TEXT,
    severity TEXT NOT NULL,
    reaction TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    verified_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_allergies_patient ON allergies(patient_id, is_active);
CREATE INDEX IF NOT EXISTS idx_allergies_allergen ON allergies(patient_id, allergen_name_normalized, is_active);

-- ============================================================================
-- Safety Checks (interaction / allergy check history + overrides)
-- ============================================================================

CREATE TABLE IF NOT EXISTS safety_checks (
    check_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('interaction', 'allergy', 'unknown')),
    patient_id TEXT,
    drug_ids TEXT NOT NULL DEFAULT '[]',         -- JSON array of strings
    severities TEXT NOT NULL DEFAULT '[]',       -- JSON array of severity labels
    finding_count INTEGER NOT NULL DEFAULT 0,
    overridden INTEGER NOT NULL DEFAULT 0,
    override_reason TEXT,
    overridden_by TEXT,
    overridden_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_checks_patient ON safety_checks(patient_id);
CREATE INDEX IF NOT EXISTS idx_checks_overridden ON safety_checks(overridden);

-- One row per detected allergy conflict, for longitudinal history
CREATE TABLE IF NOT EXISTS conflict_matches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    check_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    allergy_id TEXT NOT NULL,
    allergen_name TEXT NOT NULL,
    matched_drug_id TEXT NOT NULL,
    matched_drug_name TEXT NOT NULL,
    match_type TEXT NOT NULL,
    confidence TEXT NOT NULL,
    severity TEXT NOT NULL,
    matched_on TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conflicts_patient ON conflict_matches(patient_id);
CREATE INDEX IF NOT EXISTS idx_conflicts_check ON conflict_matches(check_id);

-- ============================================================================
-- Audit Log (append-only, hash-chained)
-- ============================================================================

CREATE TABLE IF NOT EXISTS audit_log (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT,
    action TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',         -- JSON object
    timestamp TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    entry_hash TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_resource ON audit_log(resource_type, resource_id);

-- Entries are immutable once written
CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit entries are immutable');
END;
"#;
