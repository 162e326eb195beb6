//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Principals
-- ============================================================

CREATE TABLE IF NOT EXISTS users (
    id BLOB PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    deleted_at INTEGER
);

CREATE TABLE IF NOT EXISTS tribes (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    created_by BLOB NOT NULL REFERENCES users(id),
    created_at INTEGER NOT NULL,
    deleted_at INTEGER
);

-- ============================================================
-- Resources & Ownership
-- ============================================================

CREATE TABLE IF NOT EXISTS resources (
    id BLOB PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('list', 'activity')),
    name TEXT NOT NULL,
    description TEXT,
    visibility TEXT NOT NULL DEFAULT 'private'
        CHECK (visibility IN ('private', 'shared', 'public')),
    created_by BLOB NOT NULL REFERENCES users(id),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);

-- One row per (resource, principal); removal tombstones the row and
-- re-adding reactivates it.
CREATE TABLE IF NOT EXISTS owners (
    resource_id BLOB NOT NULL REFERENCES resources(id),
    principal_id BLOB NOT NULL,
    principal_kind TEXT NOT NULL CHECK (principal_kind IN ('user', 'group')),
    origin TEXT NOT NULL CHECK (origin IN ('direct', 'share')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    PRIMARY KEY (resource_id, principal_id, principal_kind)
);

CREATE INDEX IF NOT EXISTS idx_owners_principal
    ON owners(principal_id, principal_kind) WHERE deleted_at IS NULL;

-- ============================================================
-- Shares
-- ============================================================

CREATE TABLE IF NOT EXISTS shares (
    id BLOB PRIMARY KEY,
    resource_id BLOB NOT NULL REFERENCES resources(id),
    group_id BLOB NOT NULL REFERENCES tribes(id),
    granted_by BLOB NOT NULL REFERENCES users(id),
    expires_at INTEGER,
    version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);

-- At most one active share per (resource, group).
CREATE UNIQUE INDEX IF NOT EXISTS idx_shares_active_pair
    ON shares(resource_id, group_id) WHERE deleted_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_shares_group
    ON shares(group_id) WHERE deleted_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_shares_expiry
    ON shares(expires_at) WHERE deleted_at IS NULL AND expires_at IS NOT NULL;
"#;
