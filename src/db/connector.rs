//! Backend connectors.
//!
//! A `Connector` is the concrete object holding the open pool or API client
//! for one backend, behind the uniform `execute`/`close` capability. The
//! closed set of variants mirrors `BackendKind`; construction takes a
//! validated `Selection` so the policy and the side effects stay separate.

use crate::config::{Config, DATA_API_MAX_RETRIES, PoolSettings};
use crate::db::backend::{BackendKind, Selection};
use crate::db::data_api::DataApiExecutor;
use crate::db::params::{QueryOutput, SqlParam, bind_pg_param, is_row_returning};
use crate::db::types::row_to_json_map;
use crate::error::DbResult;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

/// The active connector for one backend kind.
#[derive(Debug)]
pub enum Connector {
    /// Pooled PostgreSQL wire connection, shared by the standard and
    /// serverless kinds (they differ only in pool sizing).
    Pooled { kind: BackendKind, pool: PgPool },
    /// Stateless Data API executor.
    DataApi(DataApiExecutor),
    #[cfg(test)]
    Mock(crate::db::mock::MockConnector),
}

impl Connector {
    /// Build the connector for a validated selection.
    ///
    /// Pools are created lazily and the Data API client is assembled
    /// offline, so this never blocks on the network; connectivity problems
    /// surface on the first query or connection test.
    pub async fn build(selection: &Selection, config: &Config) -> DbResult<Self> {
        match selection {
            Selection::StandardSql { url } => {
                let pool = build_pool(url, &config.standard_pool_settings())?;
                debug!(backend = %BackendKind::StandardSql, "Connection pool created");
                Ok(Self::Pooled {
                    kind: BackendKind::StandardSql,
                    pool,
                })
            }
            Selection::ServerlessPooledSql { url } => {
                let pool = build_pool(url, &config.serverless_pool_settings())?;
                debug!(backend = %BackendKind::ServerlessPooledSql, "Connection pool created");
                Ok(Self::Pooled {
                    kind: BackendKind::ServerlessPooledSql,
                    pool,
                })
            }
            Selection::DataApiRelational { params } => {
                let executor =
                    DataApiExecutor::connect(params.clone(), DATA_API_MAX_RETRIES).await;
                debug!(backend = %BackendKind::DataApiRelational, "Data API client created");
                Ok(Self::DataApi(executor))
            }
        }
    }

    /// Get the backend kind backing this connector.
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Pooled { kind, .. } => *kind,
            Self::DataApi(_) => BackendKind::DataApiRelational,
            #[cfg(test)]
            Self::Mock(mock) => mock.kind,
        }
    }

    /// Execute one statement through whichever backend is active.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> DbResult<QueryOutput> {
        match self {
            Self::Pooled { pool, .. } => execute_pooled(pool, sql, params).await,
            Self::DataApi(executor) => executor.execute(sql, params).await,
            #[cfg(test)]
            Self::Mock(mock) => mock.execute(sql, params).await,
        }
    }

    /// Tear the connector down cleanly.
    pub async fn close(&self) {
        match self {
            Self::Pooled { pool, .. } => pool.close().await,
            Self::DataApi(executor) => executor.close().await,
            #[cfg(test)]
            Self::Mock(_) => {}
        }
    }
}

fn build_pool(url: &str, settings: &PoolSettings) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(settings.min_connections)
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(Some(settings.idle_timeout))
        .test_before_acquire(true)
        .connect_lazy(url)?;
    Ok(pool)
}

async fn execute_pooled(pool: &PgPool, sql: &str, params: &[SqlParam]) -> DbResult<QueryOutput> {
    if is_row_returning(sql) {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_pg_param(query, param);
        }
        let rows = query.fetch_all(pool).await?;
        Ok(QueryOutput {
            rows: rows.iter().map(row_to_json_map).collect(),
            rows_affected: 0,
        })
    } else {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_pg_param(query, param);
        }
        let result = query.execute(pool).await?;
        Ok(QueryOutput {
            rows: Vec::new(),
            rows_affected: result.rows_affected(),
        })
    }
}
