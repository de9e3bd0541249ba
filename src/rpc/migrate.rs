//! Block export and import through the `migrate_*` RPC extension.

use super::{block_number_of, ChainRpc};
use crate::constants::RPC_BATCH_SIZE;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use flate2::read::GzDecoder;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    #[serde(rename = "blockchainID")]
    pub blockchain_id: String,
    pub start_block: u64,
    pub end_block: u64,
    pub block_count: usize,
    pub export_time: String,
    pub blocks: Vec<Value>,
}

/// Fetch `[start, end]` in batches and write them to `output` as pretty JSON.
///
/// `end == 0` exports up to the current head.
pub async fn export_blocks(
    rpc: &dyn ChainRpc,
    blockchain_id: &str,
    start: u64,
    end: u64,
    output: &Path,
    progress: &ProgressBar,
) -> Result<ExportFile> {
    let end = if end == 0 {
        rpc.block_number()
            .await
            .context("failed to get current block")?
    } else {
        end
    };
    if start > end {
        bail!("start block {} is after end block {}", start, end);
    }

    progress.set_length((end - start).saturating_add(1));
    let mut blocks = Vec::new();
    let mut batch_start = start;
    loop {
        let batch_end = batch_start.saturating_add(RPC_BATCH_SIZE - 1).min(end);
        progress.set_message(format!("Fetching blocks {}-{}", batch_start, batch_end));
        let batch = rpc
            .get_blocks(batch_start, batch_end)
            .await
            .with_context(|| format!("failed to get blocks {}-{}", batch_start, batch_end))?;
        blocks.extend(batch);
        progress.inc((batch_end - batch_start).saturating_add(1));
        if batch_end == end {
            break;
        }
        batch_start = batch_end + 1;
    }

    let export = ExportFile {
        blockchain_id: blockchain_id.to_string(),
        start_block: start,
        end_block: end,
        block_count: blocks.len(),
        export_time: Utc::now().to_rfc3339(),
        blocks,
    };
    let data = serde_json::to_vec_pretty(&export)?;
    std::fs::write(output, data)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("Exported {} blocks to {}", export.block_count, output.display());
    Ok(export)
}

/// Import every block of an export file, in batches of 100.
pub async fn import_blocks(rpc: &dyn ChainRpc, input: &Path, progress: &ProgressBar) -> Result<u64> {
    let (_, blocks, _) = load_import_file(input)?;
    if blocks.is_empty() {
        bail!("no blocks found in input file");
    }
    import_in_batches(rpc, &blocks, RPC_BATCH_SIZE as usize, progress).await
}

async fn import_in_batches(
    rpc: &dyn ChainRpc,
    blocks: &[Value],
    batch_size: usize,
    progress: &ProgressBar,
) -> Result<u64> {
    progress.set_length(blocks.len() as u64);
    let mut total = 0;
    for (i, chunk) in blocks.chunks(batch_size.max(1)).enumerate() {
        progress.set_message(format!("Importing batch {}", i + 1));
        let imported = rpc
            .import_blocks(chunk)
            .await
            .with_context(|| format!("failed to import batch {}", i + 1))?;
        total += imported;
        progress.inc(chunk.len() as u64);
    }
    Ok(total)
}

/// Read a `.json`, `.jsonl` or gzipped export. Returns metadata, blocks and
/// the number of state entries.
pub fn load_import_file(path: &Path) -> Result<(Value, Vec<Value>, usize)> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let name = path.to_string_lossy();
    let (reader, inner): (Box<dyn Read>, &str) = match name.strip_suffix(".gz") {
        Some(inner) => (Box::new(GzDecoder::new(file)), inner),
        None => (Box::new(file), name.as_ref()),
    };

    if inner.ends_with(".jsonl") {
        load_jsonl(BufReader::new(reader))
    } else {
        let value: Value =
            serde_json::from_reader(reader).context("failed to parse import file")?;
        Ok(split_json_export(value))
    }
}

fn load_jsonl<R: BufRead>(reader: R) -> Result<(Value, Vec<Value>, usize)> {
    let mut metadata = Value::Object(Map::new());
    let mut blocks = Vec::new();
    let mut state = 0;
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: Value = serde_json::from_str(&line)
            .with_context(|| format!("failed to parse line {}", i + 1))?;
        match entry.get("type").and_then(Value::as_str) {
            None if i == 0 => metadata = entry,
            Some("block") => {
                if let Some(data) = entry.get("data") {
                    blocks.push(data.clone());
                }
            }
            Some("state") => state += 1,
            _ => {}
        }
    }
    Ok((metadata, blocks, state))
}

fn split_json_export(value: Value) -> (Value, Vec<Value>, usize) {
    let Value::Object(mut map) = value else {
        return (Value::Null, Vec::new(), 0);
    };
    let blocks = match map.remove("blocks") {
        Some(Value::Array(blocks)) => blocks,
        _ => Vec::new(),
    };
    let state = match map.remove("state") {
        Some(Value::Object(state)) => state.len(),
        Some(Value::Array(state)) => state.len(),
        _ => 0,
    };
    let metadata = match map.remove("metadata") {
        Some(meta @ Value::Object(_)) => meta,
        _ => Value::Object(map),
    };
    (metadata, blocks, state)
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub skip_existing: bool,
    pub dry_run: bool,
    pub verify: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: RPC_BATCH_SIZE as usize,
            skip_existing: true,
            dry_run: false,
            verify: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub metadata: Value,
    pub total: usize,
    pub state_entries: usize,
    pub destination_height: Option<u64>,
    pub skipped: usize,
    pub imported: u64,
    pub dry_run: bool,
    /// Destination head matched the last imported block.
    pub verified: Option<bool>,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Import an export file into a running chain.
pub async fn network_import(
    rpc: &dyn ChainRpc,
    file: &Path,
    opts: &ImportOptions,
    progress: &ProgressBar,
) -> Result<ImportReport> {
    let started = Instant::now();
    let (metadata, blocks, state_entries) = load_import_file(file)?;
    if blocks.is_empty() {
        bail!("no blocks found in import file");
    }

    let mut report = ImportReport {
        metadata,
        total: blocks.len(),
        state_entries,
        dry_run: opts.dry_run,
        ..Default::default()
    };

    report.destination_height = match rpc.block_number().await {
        Ok(height) => Some(height),
        Err(e) => {
            warn!("could not query destination height: {:#}", e);
            None
        }
    };

    let pending: Vec<Value> = match (opts.skip_existing, report.destination_height) {
        (true, Some(height)) => blocks
            .into_iter()
            .filter(|b| block_number_of(b).map_or(true, |n| n > height))
            .collect(),
        _ => blocks,
    };
    report.skipped = report.total - pending.len();

    if opts.dry_run {
        report.elapsed = started.elapsed();
        return Ok(report);
    }

    report.imported = import_in_batches(rpc, &pending, opts.batch_size, progress).await?;

    if opts.verify {
        if let Some(expected) = pending.iter().filter_map(block_number_of).max() {
            let head = rpc.block_number().await.context("failed to verify import")?;
            report.verified = Some(head == expected);
            if head != expected {
                warn!("destination head {} does not match last imported block {}", head, expected);
            }
        }
    }

    report.elapsed = started.elapsed();
    info!(
        "Imported {} blocks ({} skipped) in {:.1}s",
        report.imported,
        report.skipped,
        report.elapsed.as_secs_f64()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::fakes::FakeChain;
    use flate2::write::GzEncoder;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_batches_and_writes_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("blocks.json");
        let rpc = FakeChain::with_height(250);

        let export = export_blocks(&rpc, "chainX", 0, 0, &out, &ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(export.end_block, 250);
        assert_eq!(export.block_count, 251);
        assert_eq!(*rpc.calls.lock().unwrap(), vec![(0, 99), (100, 199), (200, 250)]);

        let written: Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(written["blockchainID"], "chainX");
        assert_eq!(written["blockCount"], 251);

        let err = export_blocks(&rpc, "chainX", 10, 5, &out, &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "start block 10 is after end block 5");
    }

    #[tokio::test]
    async fn test_export_ends_at_max_block() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("blocks.json");
        let rpc = FakeChain::default();
        let export = export_blocks(&rpc, "c", u64::MAX - 150, u64::MAX, &out, &ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(export.end_block, u64::MAX);
        assert_eq!(
            *rpc.calls.lock().unwrap(),
            vec![(u64::MAX - 150, u64::MAX - 51), (u64::MAX - 50, u64::MAX)]
        );
    }

    #[tokio::test]
    async fn test_export_then_import() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("blocks.json");
        let source = FakeChain::with_height(120);
        export_blocks(&source, "c", 1, 120, &out, &ProgressBar::hidden())
            .await
            .unwrap();

        let dest = FakeChain::default();
        let imported = import_blocks(&dest, &out, &ProgressBar::hidden()).await.unwrap();
        assert_eq!(imported, 120);
        assert_eq!(dest.imported.lock().unwrap().len(), 120);
    }

    #[tokio::test]
    async fn test_import_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, r#"{"blockchainID":"c","blocks":[]}"#).unwrap();
        let err = import_blocks(&FakeChain::default(), &path, &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no blocks found in input file");
    }

    fn write_jsonl_gz(path: &Path) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
        writeln!(enc, "{}", json!({"version": "1", "chainID": 96369})).unwrap();
        for n in 0..5u64 {
            writeln!(enc, "{}", json!({"type": "block", "data": {"number": format!("0x{:x}", n)}}))
                .unwrap();
        }
        writeln!(enc, "{}", json!({"type": "state", "data": {"0xabc": {}}})).unwrap();
        enc.finish().unwrap();
    }

    #[test]
    fn test_load_gzipped_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.jsonl.gz");
        write_jsonl_gz(&path);

        let (meta, blocks, state) = load_import_file(&path).unwrap();
        assert_eq!(meta["chainID"], 96369);
        assert_eq!(blocks.len(), 5);
        assert_eq!(state, 1);
    }

    #[tokio::test]
    async fn test_network_import_skips_existing_and_verifies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.jsonl.gz");
        write_jsonl_gz(&path);

        // destination already holds blocks 0..=2
        let dest = FakeChain::with_height(2);
        let opts = ImportOptions {
            batch_size: 2,
            verify: true,
            ..Default::default()
        };
        let report = network_import(&dest, &path, &opts, &ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(report.total, 5);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.imported, 2);
        assert_eq!(report.verified, Some(true));

        let dry = ImportOptions {
            dry_run: true,
            skip_existing: false,
            ..Default::default()
        };
        let fresh = FakeChain::default();
        let report = network_import(&fresh, &path, &dry, &ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(report.imported, 0);
        assert!(fresh.imported.lock().unwrap().is_empty());
    }
}
