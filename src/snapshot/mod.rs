//! Snapshots of local network node data.
//!
//! A snapshot holds one gzipped tar per node plus `snapshot_metadata.json`.
//! Incremental snapshots only carry files changed since their base and are
//! restored on top of it.

pub mod chunks;
pub mod cleanup;

pub use cleanup::{cleanup, CleanupConfig, CleanupResult};

use crate::app::Application;
use crate::backup::archive::{extract_tar, write_tar};
use crate::constants::SNAPSHOT_METADATA_FILE;
use crate::localnet::{node_data_dir, run_dir, running_networks, NetworkType};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tabled::Tabled;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files above this size are split into parts.
pub const CHUNK_SIZE: u64 = 99 * 1024 * 1024;
const NODE_ARCHIVE: &str = "node-data.tar.gz";
const DB_DIRS: &[&str] = &["db", "pebbledb", "badgerdb", "leveldb"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotType {
    Full,
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeArchive {
    pub index: u32,
    /// Path relative to the snapshot directory.
    pub archive: String,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub name: String,
    pub network_type: NetworkType,
    pub node_count: u32,
    pub created_at: DateTime<Utc>,
    pub lux_version: String,
    pub snapshot_type: SnapshotType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_snapshot: Option<String>,
    pub nodes: Vec<NodeArchive>,
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub network_type: NetworkType,
    pub incremental_from: Option<String>,
    /// Keep at most this many snapshots after creating one.
    pub keep: Option<usize>,
    /// Overwrite an existing snapshot of the same name once the new one is complete.
    pub replace: bool,
}

impl CreateOptions {
    pub fn new(network_type: NetworkType) -> Self {
        Self {
            name: None,
            network_type,
            incremental_from: None,
            keep: None,
            replace: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct SnapshotRow {
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "SIZE")]
    pub size: String,
    #[tabled(rename = "TYPE")]
    pub snapshot_type: String,
    #[tabled(rename = "DATE")]
    pub date: String,
}

pub fn snapshot_dir(app: &Application, name: &str) -> PathBuf {
    app.snapshots_dir().join(name)
}

pub fn default_name(network_type: NetworkType, now: DateTime<Utc>) -> String {
    format!("{}-{}", network_type, now.format("%Y-%m-%d"))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        bail!("invalid snapshot name {:?}", name);
    }
    Ok(())
}

pub fn load_metadata(app: &Application, name: &str) -> Result<SnapshotMetadata> {
    let dir = snapshot_dir(app, name);
    if !dir.is_dir() {
        bail!("snapshot '{}' not found", name);
    }
    let path = dir.join(SNAPSHOT_METADATA_FILE);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Write metadata through a temporary file so readers never see a partial file.
fn write_metadata(dir: &Path, metadata: &SnapshotMetadata) -> Result<()> {
    let path = dir.join(SNAPSHOT_METADATA_FILE);
    let tmp = dir.join(format!("{}.tmp", SNAPSHOT_METADATA_FILE));
    let mut file = File::create(&tmp)?;
    file.write_all(&serde_json::to_vec_pretty(metadata)?)?;
    file.sync_all()?;
    fs::rename(&tmp, &path).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn create(app: &Application, opts: &CreateOptions) -> Result<SnapshotMetadata> {
    let run = run_dir(app, opts.network_type);
    let nodes = node_dirs(&run)?;
    if nodes.is_empty() {
        bail!("no node data found in {}", run.display());
    }

    let now = Utc::now();
    let name = opts
        .name
        .clone()
        .unwrap_or_else(|| default_name(opts.network_type, now));
    validate_name(&name)?;
    let dir = snapshot_dir(app, &name);
    let replacing = dir.exists();
    if replacing && !opts.replace {
        bail!("snapshot '{}' already exists", name);
    }
    // Existing snapshots are only swapped out after the new one is fully written.
    let staging = if replacing {
        app.snapshots_dir().join(format!(".{}.new", name))
    } else {
        dir.clone()
    };
    if replacing && staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    let base = opts
        .incremental_from
        .as_deref()
        .map(|base| load_metadata(app, base))
        .transpose()?;
    let since = base.as_ref().map(|b| SystemTime::from(b.created_at));

    for (_, node_dir) in &nodes {
        sync_databases(node_dir)?;
    }

    fs::create_dir_all(&staging)?;
    let built = nodes
        .par_iter()
        .map(|(index, node_dir)| archive_node(*index, node_dir, &staging, since))
        .collect::<Result<Vec<NodeArchive>>>()
        .and_then(|archived| {
            let metadata = SnapshotMetadata {
                name: name.clone(),
                network_type: opts.network_type,
                node_count: archived.len() as u32,
                created_at: now,
                lux_version: crate::VERSION.to_string(),
                snapshot_type: if base.is_some() {
                    SnapshotType::Incremental
                } else {
                    SnapshotType::Full
                },
                base_snapshot: base.map(|b| b.name),
                nodes: archived,
            };
            write_metadata(&staging, &metadata)?;
            chunks::split_large_files(&staging, CHUNK_SIZE)?;
            Ok(metadata)
        });
    let metadata = match built {
        Ok(metadata) => metadata,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    };
    if replacing {
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        fs::rename(&staging, &dir)
            .with_context(|| format!("failed to move snapshot into {}", dir.display()))?;
    }

    info!(
        "Created {:?} snapshot {} of {} ({} nodes)",
        metadata.snapshot_type, name, opts.network_type, metadata.node_count
    );

    if let Some(keep) = opts.keep {
        let pruned = prune(app, keep)?;
        if !pruned.is_empty() {
            info!("Pruned snapshots: {}", pruned.join(", "));
        }
    }
    Ok(metadata)
}

/// `run_<i>` directories of a run, ordered by index.
fn node_dirs(run: &Path) -> Result<Vec<(u32, PathBuf)>> {
    if !run.is_dir() {
        return Ok(Vec::new());
    }
    let mut nodes = Vec::new();
    for entry in fs::read_dir(run)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(index) = name.strip_prefix("run_").and_then(|i| i.parse::<u32>().ok()) else {
            continue;
        };
        if entry.file_type()?.is_dir() {
            nodes.push((index, entry.path()));
        }
    }
    nodes.sort_by_key(|(index, _)| *index);
    Ok(nodes)
}

/// Flush database files of a node to disk.
fn sync_databases(node_dir: &Path) -> Result<()> {
    for db in DB_DIRS {
        let db_dir = node_dir.join(db);
        if !db_dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&db_dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                if let Err(e) = File::open(entry.path()).and_then(|f| f.sync_all()) {
                    debug!("could not sync {}: {}", entry.path().display(), e);
                }
            }
        }
    }
    Ok(())
}

fn archive_node(
    index: u32,
    node_dir: &Path,
    snapshot_dir: &Path,
    since: Option<SystemTime>,
) -> Result<NodeArchive> {
    let rel = format!("node-{}/{}", index, NODE_ARCHIVE);
    let path = snapshot_dir.join(&rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    let encoder = flate2::write::GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
    let encoder = write_tar(encoder, node_dir, |_, meta| match (since, meta.modified()) {
        (Some(since), Ok(modified)) => modified > since,
        _ => true,
    })?;
    let file = encoder
        .finish()?
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush {}: {}", path.display(), e.error()))?;
    file.sync_all()?;

    Ok(NodeArchive {
        index,
        archive: rel,
        checksum: file_checksum(&path)?,
        size: fs::metadata(&path)?.len(),
    })
}

/// SHA-256 of a file, streamed.
pub(crate) fn file_checksum(path: &Path) -> Result<String> {
    let mut reader =
        BufReader::new(File::open(path).with_context(|| format!("failed to open {}", path.display()))?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Restore a snapshot into `runs/<type>`, moving any existing run aside.
pub fn restore(
    app: &Application,
    name: &str,
    network_type: Option<NetworkType>,
) -> Result<SnapshotMetadata> {
    if !snapshot_dir(app, name).is_dir() {
        bail!("snapshot '{}' not found", name);
    }
    if !running_networks(app)?.is_empty() {
        bail!("stop the running network before restoring a snapshot");
    }

    let metadata = load_metadata(app, name)?;
    let chain = base_chain(app, metadata.clone())?;
    let target = network_type.unwrap_or(metadata.network_type);
    let run = run_dir(app, target);
    if run.exists() {
        let backup = app.runs_dir().join(format!(
            "{}.backup.{}",
            target,
            Utc::now().format("%Y%m%d-%H%M%S")
        ));
        fs::rename(&run, &backup)
            .with_context(|| format!("failed to move {} aside", run.display()))?;
        info!("Moved existing {} data to {}", target, backup.display());
    }

    for snapshot in &chain {
        extract_snapshot(app, snapshot, &run)?;
    }
    info!("Restored snapshot {} into {}", name, run.display());
    Ok(metadata)
}

/// The snapshot and its bases, oldest first.
fn base_chain(app: &Application, metadata: SnapshotMetadata) -> Result<Vec<SnapshotMetadata>> {
    let mut chain = vec![metadata];
    while let Some(base) = chain.last().and_then(|m| m.base_snapshot.clone()) {
        if chain.iter().any(|m| m.name == base) {
            bail!("snapshot {} has a circular base chain", chain[0].name);
        }
        chain.push(load_metadata(app, &base)?);
    }
    chain.reverse();
    Ok(chain)
}

fn extract_snapshot(app: &Application, metadata: &SnapshotMetadata, run: &Path) -> Result<()> {
    let dir = snapshot_dir(app, &metadata.name);
    let rebuilt = chunks::reassemble(&dir)?;
    if rebuilt > 0 {
        debug!("reassembled {} chunked files in {}", rebuilt, metadata.name);
    }

    metadata.nodes.par_iter().try_for_each(|node| -> Result<()> {
        let archive = dir.join(&node.archive);
        let actual = file_checksum(&archive)?;
        if actual != node.checksum {
            bail!(
                "checksum mismatch for {} in snapshot {}: expected {}, got {}",
                node.archive,
                metadata.name,
                node.checksum,
                actual
            );
        }
        let reader = flate2::read::GzDecoder::new(BufReader::new(File::open(&archive)?));
        extract_tar(reader, &node_data_dir(run, node.index))
    })
}

/// Every readable snapshot, oldest first.
pub fn list_snapshots(app: &Application) -> Result<Vec<SnapshotMetadata>> {
    let dir = app.snapshots_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut snapshots = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        match load_metadata(app, &name) {
            Ok(metadata) => snapshots.push(metadata),
            Err(e) => warn!("skipping snapshot {}: {:#}", name, e),
        }
    }
    snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
    Ok(snapshots)
}

pub fn list(app: &Application) -> Result<Vec<SnapshotRow>> {
    Ok(list_snapshots(app)?
        .into_iter()
        .map(|m| SnapshotRow {
            size: crate::ux::format_bytes(dir_size(&snapshot_dir(app, &m.name))),
            snapshot_type: match m.snapshot_type {
                SnapshotType::Full => "full".to_string(),
                SnapshotType::Incremental => format!(
                    "incremental ({})",
                    m.base_snapshot.as_deref().unwrap_or("-")
                ),
            },
            date: m.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            name: m.name,
        })
        .collect())
}

pub fn delete(app: &Application, name: &str) -> Result<()> {
    validate_name(name)?;
    let dir = snapshot_dir(app, name);
    if !dir.is_dir() {
        bail!("snapshot '{}' not found", name);
    }
    fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
    info!("Deleted snapshot {}", name);
    Ok(())
}

/// Remove the oldest snapshots beyond `keep`, sparing bases of kept snapshots.
///
/// Returns the names removed.
pub fn prune(app: &Application, keep: usize) -> Result<Vec<String>> {
    let snapshots = list_snapshots(app)?;
    if snapshots.len() <= keep {
        return Ok(Vec::new());
    }
    let split = snapshots.len() - keep;
    let by_name: HashMap<&str, &SnapshotMetadata> =
        snapshots.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut protected = HashSet::new();
    for kept in &snapshots[split..] {
        let mut base = kept.base_snapshot.as_deref();
        while let Some(name) = base {
            if !protected.insert(name.to_string()) {
                break;
            }
            base = by_name.get(name).and_then(|m| m.base_snapshot.as_deref());
        }
    }

    let mut removed = Vec::new();
    for old in &snapshots[..split] {
        if protected.contains(&old.name) {
            continue;
        }
        delete(app, &old.name)?;
        removed.push(old.name.clone());
    }
    Ok(removed)
}
