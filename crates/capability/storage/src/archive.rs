//! 文件归档：每个 UTC 日一个 JSON Lines 文件，可选 gzip。
//!
//! 文件名 `records-YYYY-MM-DD.jsonl` 或 `records-YYYY-MM-DD.jsonl.gz`。
//! 同一日桶再次写入时与已有内容合并，已归档过的整条记录不会再写一次，
//! 因此重复归档同一批记录不会产生重复数据。

use crate::error::StorageError;
use crate::models::{ArchiveFile, RecordQuery, day_bucket, without_replicas};
use crate::traits::ArchiveStore;
use chrono::{DateTime, NaiveDate};
use domain::ValueRecord;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const PREFIX: &str = "records-";
const PLAIN_EXT: &str = ".jsonl";
const GZIP_EXT: &str = ".jsonl.gz";

/// 本地目录归档。
#[derive(Clone)]
pub struct FsArchiveStore {
    dir: PathBuf,
    // 写入与删除互斥；读取不加锁
    write_lock: Arc<Mutex<()>>,
}

impl FsArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn file_name(bucket_start_ms: i64, compressed: bool) -> Result<String, StorageError> {
    let date = DateTime::from_timestamp_millis(bucket_start_ms)
        .ok_or_else(|| StorageError::new(format!("timestamp out of range: {bucket_start_ms}")))?
        .date_naive();
    let ext = if compressed { GZIP_EXT } else { PLAIN_EXT };
    Ok(format!("{PREFIX}{}{ext}", date.format("%Y-%m-%d")))
}

/// 从文件名解析日桶起点与压缩标记；不是归档文件返回 `None`。
fn parse_file_name(name: &str) -> Option<(i64, bool)> {
    let rest = name.strip_prefix(PREFIX)?;
    let (date, compressed) = match rest.strip_suffix(GZIP_EXT) {
        Some(date) => (date, true),
        None => (rest.strip_suffix(PLAIN_EXT)?, false),
    };
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let start = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
    Some((start, compressed))
}

fn read_file(path: &Path, compressed: bool) -> Result<Vec<ValueRecord>, StorageError> {
    let file = fs::File::open(path)?;
    let reader: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut records = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

fn write_file(path: &Path, records: &[ValueRecord], compressed: bool) -> Result<(), StorageError> {
    let mut body = Vec::new();
    for record in records {
        serde_json::to_writer(&mut body, record)?;
        body.push(b'\n');
    }
    let bytes = if compressed {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body)?;
        encoder.finish()?
    } else {
        body
    };
    // 先写临时文件再改名，避免留下半个文件
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn scan(dir: &Path) -> Result<Vec<ArchiveFile>, StorageError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some((bucket_start_ms, compressed)) = name.to_str().and_then(parse_file_name) else {
            continue;
        };
        let path = entry.path();
        let records = read_file(&path, compressed)?.len();
        files.push(ArchiveFile {
            bucket_start_ms,
            path,
            compressed,
            records,
        });
    }
    files.sort_by(|a, b| {
        a.bucket_start_ms
            .cmp(&b.bucket_start_ms)
            .then(a.compressed.cmp(&b.compressed))
    });
    Ok(files)
}

fn merge_bucket(
    dir: &Path,
    bucket_start_ms: i64,
    incoming: Vec<ValueRecord>,
    compress: bool,
) -> Result<ArchiveFile, StorageError> {
    let target = dir.join(file_name(bucket_start_ms, compress)?);
    let other = dir.join(file_name(bucket_start_ms, !compress)?);

    let mut merged = Vec::new();
    for (path, compressed) in [(&target, compress), (&other, !compress)] {
        if path.exists() {
            // 两种格式可能同时存在（上次改写中断）
            let existing = read_file(path, compressed)?;
            let fresh = without_replicas(&merged, existing);
            merged.extend(fresh);
        }
    }
    let fresh = without_replicas(&merged, incoming);
    merged.extend(fresh);
    merged.sort_by(|a, b| a.ts_ms.cmp(&b.ts_ms).then_with(|| a.point_id.cmp(&b.point_id)));

    write_file(&target, &merged, compress)?;
    if other.exists() {
        fs::remove_file(&other)?;
    }
    Ok(ArchiveFile {
        bucket_start_ms,
        path: target,
        compressed: compress,
        records: merged.len(),
    })
}

#[async_trait::async_trait]
impl ArchiveStore for FsArchiveStore {
    async fn write_records(
        &self,
        records: Vec<ValueRecord>,
        compress: bool,
    ) -> Result<Vec<ArchiveFile>, StorageError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.write_lock.lock().await;
        let dir = self.dir.clone();
        let files = tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&dir)?;
            let mut buckets: BTreeMap<i64, Vec<ValueRecord>> = BTreeMap::new();
            for record in records {
                buckets.entry(day_bucket(record.ts_ms)).or_default().push(record);
            }
            buckets
                .into_iter()
                .map(|(bucket, records)| merge_bucket(&dir, bucket, records, compress))
                .collect::<Result<Vec<_>, StorageError>>()
        })
        .await??;
        for file in &files {
            debug!(
                target: "plcmon.storage",
                path = %file.path.display(),
                records = file.records,
                "archive_bucket_written"
            );
        }
        Ok(files)
    }

    async fn read_records(&self, query: &RecordQuery) -> Result<Vec<ValueRecord>, StorageError> {
        let dir = self.dir.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            for file in scan(&dir)? {
                if query.from_ms.is_some_and(|from| file.bucket_end_ms() <= from)
                    || query.to_ms.is_some_and(|to| file.bucket_start_ms > to)
                {
                    continue;
                }
                records.extend(
                    read_file(&file.path, file.compressed)?
                        .into_iter()
                        .filter(|r| query.matches(&r.point_id, r.ts_ms, r.quality)),
                );
            }
            records.sort_by_key(|record| record.ts_ms);
            Ok(records)
        })
        .await?
    }

    async fn list_files(&self) -> Result<Vec<ArchiveFile>, StorageError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || scan(&dir)).await?
    }

    async fn remove_before(&self, cutoff_ms: i64) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let dir = self.dir.clone();
        let removed = tokio::task::spawn_blocking(move || {
            let mut removed = 0;
            for file in scan(&dir)? {
                if file.bucket_end_ms() <= cutoff_ms {
                    fs::remove_file(&file.path)?;
                    removed += 1;
                }
            }
            Ok::<_, StorageError>(removed)
        })
        .await??;
        if removed > 0 {
            info!(target: "plcmon.storage", removed, cutoff_ms, "archive_files_removed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_round_trip_to_bucket() {
        let bucket = day_bucket(1_700_000_000_000);
        let plain = file_name(bucket, false).expect("name");
        let gz = file_name(bucket, true).expect("name");
        assert_eq!(plain, "records-2023-11-14.jsonl");
        assert_eq!(gz, "records-2023-11-14.jsonl.gz");
        assert_eq!(parse_file_name(&plain), Some((bucket, false)));
        assert_eq!(parse_file_name(&gz), Some((bucket, true)));
        assert_eq!(parse_file_name("notes.txt"), None);
        assert_eq!(parse_file_name("records-2023-11-14.jsonl.tmp"), None);
    }
}
