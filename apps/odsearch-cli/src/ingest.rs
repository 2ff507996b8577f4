//! JSONL ingestion: one `{id, text, metadata?}` object per line, embedded
//! and upserted in batches.

use std::future::Future;
use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result};
use odsearch_core::types::{Metadata, Record};
use odsearch_embed::Embedder;
use odsearch_vector::schema::{truncate_utf8, ID_MAX_LEN, TEXT_MAX_LEN};
use odsearch_vector::VectorStore;

#[derive(Debug, Default)]
pub struct Parsed {
    pub records: Vec<Record>,
    pub skipped: usize,
}

/// Reads records, skipping blank lines and records the collection cannot
/// hold. Malformed JSON is an error naming the line.
pub fn read_records(reader: impl BufRead) -> Result<Parsed> {
    let mut out = Parsed::default();
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", n + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut record: Record =
            serde_json::from_str(line).with_context(|| format!("line {}: not a record object", n + 1))?;
        record.id = record.id.trim().to_string();
        record.text = record.text.trim().to_string();
        if record.id.is_empty() || record.id.len() > ID_MAX_LEN {
            tracing::warn!(line = n + 1, id = %record.id, "skipping record with unusable id");
            out.skipped += 1;
            continue;
        }
        if record.text.is_empty() {
            tracing::warn!(line = n + 1, id = %record.id, "skipping record without text");
            out.skipped += 1;
            continue;
        }
        if record.text.len() > TEXT_MAX_LEN {
            tracing::debug!(id = %record.id, bytes = record.text.len(), "truncating text");
            record.text = truncate_utf8(&record.text, TEXT_MAX_LEN).to_string();
        }
        out.records.push(record);
    }
    Ok(out)
}

/// Runs `op` up to `attempts` times, sleeping `backoff` between retryable
/// failures.
pub async fn with_retry<T, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> odsearch_core::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = odsearch_core::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(attempt, error = %e, "retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Embeds and upserts `records` in chunks of `batch_size`, calling
/// `progress` with the number of records written after each chunk. A chunk
/// is attempted up to `retries` times, `backoff` apart.
pub async fn ingest(
    embedder: &Embedder,
    store: &VectorStore,
    records: &[Record],
    batch_size: usize,
    retries: u32,
    backoff: Duration,
    mut progress: impl FnMut(usize),
) -> odsearch_core::Result<usize> {
    let mut written = 0;
    for chunk in records.chunks(batch_size.max(1)) {
        let ids: Vec<String> = chunk.iter().map(|r| r.id.clone()).collect();
        let texts: Vec<String> = chunk.iter().map(|r| r.text.clone()).collect();
        let metadatas: Vec<Metadata> = chunk.iter().map(|r| r.metadata.clone().unwrap_or_default()).collect();
        let any_metadata = chunk.iter().any(|r| r.metadata.is_some());

        let (ids, texts, metadatas) = (&ids, &texts, any_metadata.then_some(metadatas.as_slice()));
        let vectors = with_retry(retries, backoff, move || embedder.aembed_documents(texts)).await?;
        let vectors = &vectors;
        with_retry(retries, backoff, move || store.upsert(ids, texts, vectors, metadatas)).await?;
        written += chunk.len();
        progress(chunk.len());
    }
    tracing::info!(records = written, collection = store.collection(), "ingest finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn reads_records_and_skips_unusable_ones() {
        let input = r#"
{"id": "a", "text": "bus stops", "metadata": {"type": "dataset"}}

{"id": "b", "text": "   "}
{"id": "", "text": "orphan"}
{"id": "c", "text": " ferries "}
"#;
        let parsed = read_records(Cursor::new(input)).unwrap();
        assert_eq!(parsed.skipped, 2);
        let ids: Vec<&str> = parsed.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(parsed.records[1].text, "ferries");
        assert_eq!(parsed.records[0].metadata.as_ref().unwrap()["type"], "dataset");
    }

    #[test]
    fn long_texts_are_truncated() {
        let text = "x".repeat(TEXT_MAX_LEN + 10);
        let line = format!(r#"{{"id": "a", "text": "{text}"}}"#);
        let parsed = read_records(Cursor::new(line)).unwrap();
        assert_eq!(parsed.records[0].text.len(), TEXT_MAX_LEN);
    }

    #[test]
    fn multibyte_texts_are_truncated_to_the_byte_limit() {
        let text = "ä".repeat(TEXT_MAX_LEN + 10);
        let line = format!(r#"{{"id": "a", "text": "{text}"}}"#);
        let parsed = read_records(Cursor::new(line)).unwrap();
        let kept = &parsed.records[0].text;
        assert!(kept.len() <= TEXT_MAX_LEN, "{} bytes", kept.len());
        assert_eq!(kept.chars().count(), TEXT_MAX_LEN / 2);
        assert!(kept.chars().all(|c| c == 'ä'));
    }

    #[test]
    fn malformed_lines_name_their_position() {
        let err = read_records(Cursor::new("{\"id\": \"a\", \"text\": \"t\"}\nnot json\n")).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[tokio::test]
    async fn retries_only_retryable_errors() {
        let calls = &AtomicU32::new(0);
        let out = with_retry(3, Duration::from_millis(1), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(odsearch_core::Error::Timeout("slow".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!((out, calls.load(Ordering::SeqCst)), (7, 3));

        let calls = &AtomicU32::new(0);
        let err = with_retry(3, Duration::from_millis(1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(odsearch_core::Error::Validation("bad".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, odsearch_core::Error::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
