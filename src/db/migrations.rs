use anyhow::{ensure, Context, Result};
use rusqlite::Connection;

/// Schema scripts in order; entry `i` upgrades `user_version` from `i` to `i + 1`.
const MIGRATIONS: &[&str] = &[
    include_str!("schemas/schema_v1.sql"),
    include_str!("schemas/schema_v2.sql"),
];

fn schema_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    usize::try_from(version).with_context(|| format!("corrupt user_version {version}"))
}

/// Brings the schema to the latest version in a single transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn)?;
    ensure!(
        current <= MIGRATIONS.len(),
        "database schema v{current} is newer than this build supports (v{})",
        MIGRATIONS.len()
    );
    if current == MIGRATIONS.len() {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (index, script) in MIGRATIONS.iter().enumerate().skip(current) {
        let target = index + 1;
        tx.execute_batch(script)
            .with_context(|| format!("failed to apply schema_v{target}.sql"))?;
        tx.pragma_update(None, "user_version", target as i64)
            .with_context(|| format!("failed to record schema v{target}"))?;
    }
    tx.commit().context("failed to commit migrations")
}
