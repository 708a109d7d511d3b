//! Idempotent schema provisioning.
//!
//! Provisioning runs through the uniform query facade, so it works against
//! whichever backend is active. Every statement is written to be safe to
//! re-run, and errors that only say "this already exists" are tolerated, so
//! a crashed or repeated run converges on the same schema.

use crate::db::Db;
use crate::error::{DbError, DbResult};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Tables the platform expects after provisioning, in dependency order.
pub const EXPECTED_TABLES: &[&str] = &[
    "companies",
    "schools",
    "users",
    "user_roles",
    "classes",
    "enrollments",
    "contracts",
    "invoices",
    "ai_preferences",
    "audit_log",
];

/// Schema DDL, ordered so referenced objects exist before their dependents.
///
/// The CREATE TYPE statements have no IF NOT EXISTS form; re-running them
/// raises duplicate_object, which [`is_already_exists`] tolerates.
const PROVISION_STATEMENTS: &[&str] = &[
    "CREATE TYPE user_role AS ENUM \
     ('admin', 'director', 'coordinator', 'teacher', 'staff', 'guardian')",
    "CREATE TYPE contract_status AS ENUM \
     ('draft', 'active', 'suspended', 'terminated')",
    r#"CREATE TABLE IF NOT EXISTS companies (
        id SERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        tax_id VARCHAR(32) UNIQUE,
        email VARCHAR(255),
        phone VARCHAR(32),
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS schools (
        id SERIAL PRIMARY KEY,
        company_id INTEGER NOT NULL REFERENCES companies(id),
        name VARCHAR(255) NOT NULL,
        address TEXT,
        city VARCHAR(128),
        state VARCHAR(64),
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id SERIAL PRIMARY KEY,
        school_id INTEGER REFERENCES schools(id),
        email VARCHAR(255) NOT NULL UNIQUE,
        full_name VARCHAR(255) NOT NULL,
        role user_role NOT NULL DEFAULT 'staff',
        settings JSONB NOT NULL DEFAULT '{}',
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_roles (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id),
        school_id INTEGER NOT NULL REFERENCES schools(id),
        role user_role NOT NULL,
        granted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (user_id, school_id, role)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS classes (
        id SERIAL PRIMARY KEY,
        school_id INTEGER NOT NULL REFERENCES schools(id),
        name VARCHAR(255) NOT NULL,
        grade_level VARCHAR(32),
        school_year INTEGER,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS enrollments (
        id SERIAL PRIMARY KEY,
        class_id INTEGER NOT NULL REFERENCES classes(id),
        student_name VARCHAR(255) NOT NULL,
        guardian_user_id INTEGER REFERENCES users(id),
        status VARCHAR(32) NOT NULL DEFAULT 'active',
        enrolled_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS contracts (
        id SERIAL PRIMARY KEY,
        company_id INTEGER NOT NULL REFERENCES companies(id),
        school_id INTEGER REFERENCES schools(id),
        title VARCHAR(255) NOT NULL,
        amount NUMERIC(12, 2),
        starts_on DATE,
        ends_on DATE,
        status contract_status NOT NULL DEFAULT 'draft',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS invoices (
        id SERIAL PRIMARY KEY,
        contract_id INTEGER NOT NULL REFERENCES contracts(id),
        amount NUMERIC(12, 2) NOT NULL,
        due_on DATE NOT NULL,
        paid_at TIMESTAMPTZ,
        status VARCHAR(32) NOT NULL DEFAULT 'open',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS ai_preferences (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
        assistant_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        model VARCHAR(128),
        temperature NUMERIC(3, 2),
        settings JSONB NOT NULL DEFAULT '{}',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS audit_log (
        id BIGSERIAL PRIMARY KEY,
        user_id INTEGER REFERENCES users(id),
        action VARCHAR(64) NOT NULL,
        entity VARCHAR(64),
        entity_id BIGINT,
        details JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_schools_company ON schools(company_id)",
    "CREATE INDEX IF NOT EXISTS idx_users_school ON users(school_id)",
    "CREATE INDEX IF NOT EXISTS idx_user_roles_user ON user_roles(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_classes_school ON classes(school_id)",
    "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id)",
    "CREATE INDEX IF NOT EXISTS idx_contracts_company ON contracts(company_id)",
    "CREATE INDEX IF NOT EXISTS idx_invoices_contract ON invoices(contract_id)",
    "CREATE INDEX IF NOT EXISTS idx_audit_log_user ON audit_log(user_id)",
];

/// What a provisioning run did.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    pub applied: usize,
    pub skipped: usize,
}

/// Comparison of the live schema against [`EXPECTED_TABLES`].
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

impl SchemaReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Run all provisioning statements against the active backend.
///
/// "Already exists" errors are skipped; anything else aborts the run with
/// the statement that failed in the log.
pub async fn run_provisioning(db: &Db) -> DbResult<MigrationSummary> {
    info!(backend = %db.backend(), "Running schema provisioning");
    let mut applied = 0;
    let mut skipped = 0;

    for statement in PROVISION_STATEMENTS {
        match db.execute(statement, &[]).await {
            Ok(_) => {
                debug!(statement = first_line(statement), "Statement applied");
                applied += 1;
            }
            Err(e) if is_already_exists(&e) => {
                debug!(statement = first_line(statement), "Object already exists");
                skipped += 1;
            }
            Err(e) => {
                warn!(
                    statement = first_line(statement),
                    error = %e,
                    "Provisioning statement failed"
                );
                return Err(e);
            }
        }
    }

    info!(applied, skipped, "Schema provisioning complete");
    Ok(MigrationSummary { applied, skipped })
}

/// Check which of the expected tables exist in the live schema.
pub async fn verify_schema(db: &Db) -> DbResult<SchemaReport> {
    let output = db
        .execute(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'public'",
            &[],
        )
        .await?;

    let live: Vec<String> = output
        .rows
        .iter()
        .filter_map(|row| row.get("table_name"))
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    let mut present = Vec::new();
    let mut missing = Vec::new();
    for table in EXPECTED_TABLES {
        if live.iter().any(|t| t == table) {
            present.push((*table).to_string());
        } else {
            missing.push((*table).to_string());
        }
    }

    if !missing.is_empty() {
        warn!(missing = ?missing, "Schema verification found missing tables");
    }
    Ok(SchemaReport { present, missing })
}

/// Errors PostgreSQL raises when the object being created already exists.
fn is_already_exists(error: &DbError) -> bool {
    if let Some(state) = error.sql_state() {
        // duplicate_table, duplicate_object, duplicate_column,
        // duplicate_schema, invalid_table_definition on re-created objects
        if matches!(state, "42P07" | "42710" | "42701" | "42P06" | "42P16") {
            return true;
        }
    }
    error.to_string().contains("already exists")
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or(statement).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_by_sql_state() {
        let err = DbError::database("relation exists", Some("42P07".to_string()), "");
        assert!(is_already_exists(&err));

        let err = DbError::database("syntax error", Some("42601".to_string()), "");
        assert!(!is_already_exists(&err));
    }

    #[test]
    fn test_already_exists_by_message() {
        let err = DbError::data_api(
            "ERROR: relation \"companies\" already exists",
            false,
        );
        assert!(is_already_exists(&err));
    }

    #[test]
    fn test_statements_are_rerunnable() {
        // Tables and indexes must use IF NOT EXISTS; types have no such
        // form and instead rely on duplicate_object being tolerated.
        for statement in PROVISION_STATEMENTS {
            let head = statement.trim_start().to_uppercase();
            assert!(
                head.starts_with("CREATE TABLE IF NOT EXISTS")
                    || head.starts_with("CREATE INDEX IF NOT EXISTS")
                    || head.starts_with("CREATE TYPE"),
                "non-idempotent statement: {}",
                first_line(statement)
            );
        }
        let duplicate_type = DbError::database(
            "type \"user_role\" already exists",
            Some("42710".to_string()),
            "",
        );
        assert!(is_already_exists(&duplicate_type));
    }

    #[test]
    fn test_every_expected_table_has_ddl() {
        for table in EXPECTED_TABLES {
            assert!(
                PROVISION_STATEMENTS
                    .iter()
                    .any(|s| s.contains(&format!("IF NOT EXISTS {table} "))),
                "no DDL for table {table}"
            );
        }
    }

    #[test]
    fn test_schema_report_completeness() {
        let complete = SchemaReport {
            present: vec!["companies".to_string()],
            missing: Vec::new(),
        };
        assert!(complete.is_complete());

        let incomplete = SchemaReport {
            present: Vec::new(),
            missing: vec!["companies".to_string()],
        };
        assert!(!incomplete.is_complete());
    }
}
