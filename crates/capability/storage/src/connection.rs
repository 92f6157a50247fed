//! 数据库连接管理
//!
//! - connect_pool：建立 Postgres 连接池（最大连接数 8）
//! - ensure_schema：创建采集值与报警事件表（幂等）

use crate::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const SCHEMA: &[&str] = &[
    "create table if not exists value_record ( \
        point_id text not null, \
        ts timestamptz not null, \
        value double precision not null, \
        is_bool boolean not null default false, \
        quality smallint not null \
     )",
    "create index if not exists value_record_point_ts on value_record (point_id, ts)",
    "create index if not exists value_record_ts on value_record (ts)",
    "create table if not exists alarm_event ( \
        id text primary key, \
        rule_id text not null, \
        point_id text not null, \
        value double precision not null, \
        is_bool boolean not null default false, \
        severity smallint not null, \
        message text not null, \
        triggered_at timestamptz not null, \
        acknowledged_at timestamptz, \
        acknowledged_by text, \
        resolved_at timestamptz \
     )",
    "create index if not exists alarm_event_triggered on alarm_event (triggered_at)",
];

/// 建立 Postgres 连接池
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// 建表（已存在则跳过）。
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
