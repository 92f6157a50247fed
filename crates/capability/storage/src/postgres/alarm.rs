//! Postgres 报警事件实现

use crate::error::StorageError;
use crate::models::AlarmFilter;
use crate::postgres::measurement::{join_value, split_value};
use crate::traits::AlarmStore;
use domain::AlarmEvent;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub struct PgAlarmStore {
    pub pool: PgPool,
}

impl PgAlarmStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find(&self, id: &str) -> Result<Option<AlarmEvent>, StorageError> {
        let sql = format!("{SELECT_COLUMNS} where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }
}

const SELECT_COLUMNS: &str = "select id, rule_id, point_id, value, is_bool, severity, message, \
     (extract(epoch from triggered_at) * 1000)::bigint as triggered_at_ms, \
     (extract(epoch from acknowledged_at) * 1000)::bigint as acknowledged_at_ms, \
     acknowledged_by, \
     (extract(epoch from resolved_at) * 1000)::bigint as resolved_at_ms \
     from alarm_event";

fn event_from_row(row: &PgRow) -> Result<AlarmEvent, StorageError> {
    let severity: i16 = row.try_get("severity")?;
    Ok(AlarmEvent {
        id: row.try_get("id")?,
        rule_id: row.try_get("rule_id")?,
        point_id: row.try_get("point_id")?,
        value: join_value(row.try_get("value")?, row.try_get("is_bool")?),
        severity: severity.clamp(0, u8::MAX as i16) as u8,
        message: row.try_get("message")?,
        triggered_at_ms: row.try_get("triggered_at_ms")?,
        acknowledged_at_ms: row.try_get("acknowledged_at_ms")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        resolved_at_ms: row.try_get("resolved_at_ms")?,
    })
}

#[async_trait::async_trait]
impl AlarmStore for PgAlarmStore {
    async fn append_alarm_event(&self, event: &AlarmEvent) -> Result<(), StorageError> {
        let (value, is_bool) = split_value(&event.value);
        sqlx::query(
            "insert into alarm_event \
             (id, rule_id, point_id, value, is_bool, severity, message, triggered_at) \
             values ($1, $2, $3, $4, $5, $6, $7, to_timestamp($8 / 1000.0)) \
             on conflict (id) do nothing",
        )
        .bind(&event.id)
        .bind(&event.rule_id)
        .bind(&event.point_id)
        .bind(value)
        .bind(is_bool)
        .bind(event.severity as i16)
        .bind(&event.message)
        .bind(event.triggered_at_ms as f64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn acknowledge_alarm(
        &self,
        id: &str,
        by: Option<&str>,
        at_ms: i64,
    ) -> Result<Option<AlarmEvent>, StorageError> {
        sqlx::query(
            "update alarm_event \
             set acknowledged_at = to_timestamp($2 / 1000.0), acknowledged_by = $3 \
             where id = $1 and acknowledged_at is null",
        )
        .bind(id)
        .bind(at_ms as f64)
        .bind(by)
        .execute(&self.pool)
        .await?;
        self.find(id).await
    }

    async fn resolve_alarm(
        &self,
        id: &str,
        at_ms: i64,
    ) -> Result<Option<AlarmEvent>, StorageError> {
        sqlx::query(
            "update alarm_event set resolved_at = to_timestamp($2 / 1000.0) \
             where id = $1 and resolved_at is null",
        )
        .bind(id)
        .bind(at_ms as f64)
        .execute(&self.pool)
        .await?;
        self.find(id).await
    }

    async fn list_alarm_events(
        &self,
        filter: &AlarmFilter,
    ) -> Result<Vec<AlarmEvent>, StorageError> {
        let limit = if filter.limit == 0 {
            None
        } else {
            Some(filter.limit as i64)
        };
        let sql = format!(
            "{SELECT_COLUMNS} \
             where ($1::float8 is null or triggered_at >= to_timestamp($1 / 1000.0)) \
             and ($2::float8 is null or triggered_at <= to_timestamp($2 / 1000.0)) \
             and ($3::text is null or point_id = $3) \
             and ($4::int2 is null or severity = $4) \
             and (not $5 or (acknowledged_at is null and resolved_at is null)) \
             order by triggered_at desc \
             limit $6"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.from_ms.map(|v| v as f64))
            .bind(filter.to_ms.map(|v| v as f64))
            .bind(filter.point_id.as_deref())
            .bind(filter.severity.map(i16::from))
            .bind(filter.active_only)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }
}
