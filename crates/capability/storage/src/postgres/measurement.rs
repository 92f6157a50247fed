//! Postgres 采集值实现

use crate::error::StorageError;
use crate::models::RecordQuery;
use crate::traits::MeasurementStore;
use domain::{TagValue, ValueRecord};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub struct PgMeasurementStore {
    pub pool: PgPool,
}

impl PgMeasurementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        crate::connection::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }
}

/// 布尔值按 1/0 存储，另用 `is_bool` 还原类型。
pub(crate) fn split_value(value: &TagValue) -> (f64, bool) {
    (value.as_f64(), value.is_bool())
}

pub(crate) fn join_value(value: f64, is_bool: bool) -> TagValue {
    if is_bool {
        TagValue::Bool(value != 0.0)
    } else {
        TagValue::Number(value)
    }
}

fn record_from_row(row: &PgRow) -> Result<ValueRecord, StorageError> {
    let quality: i16 = row.try_get("quality")?;
    Ok(ValueRecord {
        point_id: row.try_get("point_id")?,
        value: join_value(row.try_get("value")?, row.try_get("is_bool")?),
        quality: quality.clamp(0, 100) as u8,
        ts_ms: row.try_get("ts_ms")?,
    })
}

const SELECT_COLUMNS: &str = "select point_id, \
     (extract(epoch from ts) * 1000)::bigint as ts_ms, \
     value, is_bool, quality \
     from value_record";

#[async_trait::async_trait]
impl MeasurementStore for PgMeasurementStore {
    async fn append_value_records(&self, records: &[ValueRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            let (value, is_bool) = split_value(&record.value);
            sqlx::query(
                "insert into value_record (point_id, ts, value, is_bool, quality) \
                 values ($1, to_timestamp($2 / 1000.0), $3, $4, $5)",
            )
            .bind(&record.point_id)
            .bind(record.ts_ms as f64)
            .bind(value)
            .bind(is_bool)
            .bind(record.quality as i16)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn query_value_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<ValueRecord>, StorageError> {
        let point_ids: Option<Vec<String>> =
            (!query.point_ids.is_empty()).then(|| query.point_ids.clone());
        let sql = format!(
            "{SELECT_COLUMNS} \
             where ($1::text[] is null or point_id = any($1)) \
             and ($2::float8 is null or ts >= to_timestamp($2 / 1000.0)) \
             and ($3::float8 is null or ts <= to_timestamp($3 / 1000.0)) \
             and ($4::int2 is null or quality >= $4) \
             order by ts asc"
        );
        let rows = sqlx::query(&sql)
            .bind(point_ids)
            .bind(query.from_ms.map(|v| v as f64))
            .bind(query.to_ms.map(|v| v as f64))
            .bind(query.min_quality.map(i16::from))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn list_value_records_before(
        &self,
        cutoff_ms: i64,
    ) -> Result<Vec<ValueRecord>, StorageError> {
        let sql = format!("{SELECT_COLUMNS} where ts < to_timestamp($1 / 1000.0) order by ts asc");
        let rows = sqlx::query(&sql)
            .bind(cutoff_ms as f64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn delete_value_records_before(&self, cutoff_ms: i64) -> Result<usize, StorageError> {
        let result = sqlx::query("delete from value_record where ts < to_timestamp($1 / 1000.0)")
            .bind(cutoff_ms as f64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_values_survive_numeric_column() {
        let (value, is_bool) = split_value(&TagValue::Bool(true));
        assert_eq!(join_value(value, is_bool), TagValue::Bool(true));
        let (value, is_bool) = split_value(&TagValue::Number(1.0));
        assert_eq!(join_value(value, is_bool), TagValue::Number(1.0));
    }
}
