//! Schema upgrades for the SQLite store, tracked in `PRAGMA user_version`.
//! Each entry in `SCHEMAS` moves the store one version forward; all pending
//! steps apply in one transaction.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

const SCHEMAS: &[(&str, &str)] = &[("schema_v1.sql", include_str!("schemas/schema_v1.sql"))];

const CURRENT_SCHEMA_VERSION: i32 = SCHEMAS.len() as i32;

fn stored_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("could not read store schema version")
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found = stored_version(conn)?;
    if found < 0 {
        bail!("store schema version {found} is invalid");
    }
    if found > CURRENT_SCHEMA_VERSION {
        bail!("store schema v{found} was written by a newer build (this one knows v{CURRENT_SCHEMA_VERSION})");
    }

    let pending = &SCHEMAS[found as usize..];
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("could not start store upgrade")?;
    for (name, sql) in pending {
        tx.execute_batch(sql)
            .with_context(|| format!("store upgrade {name} failed"))?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("could not record store schema version")?;
    tx.commit().context("could not commit store upgrade")
}
