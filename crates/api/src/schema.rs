//! Idempotent schema bootstrap, run once at startup.

use sqlx::PgPool;

/// All table definitions, outbox first.
pub const DDL: &[&str] = &[
    dispatch::OUTBOX_DDL,
    domain::accounting::ACCOUNTS_DDL,
    domain::crowdfunding::CAMPAIGNS_DDL,
    domain::bitcoin::INVOICES_DDL,
];

/// Applies every table definition against the pool.
pub async fn apply(pool: &PgPool) -> Result<(), sqlx::Error> {
    for ddl in DDL {
        sqlx::raw_sql(ddl).execute(pool).await?;
    }
    Ok(())
}
