//! Splitting of large snapshot files into fixed size parts and back.
//!
//! A file at `node-0/node-data.tar.gz` becomes
//! `chunks/node-0__node-data.tar.gz.part-0`, `.part-1`, ...

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const CHUNKS_DIR: &str = "chunks";
const PART_MARKER: &str = ".part-";
const PATH_SEPARATOR: &str = "__";

fn encode_name(rel: &Path) -> String {
    rel.to_string_lossy().replace('/', PATH_SEPARATOR)
}

fn decode_name(name: &str) -> PathBuf {
    PathBuf::from(name.replace(PATH_SEPARATOR, "/"))
}

/// Split every file in `dir` larger than `limit` bytes and remove the original.
///
/// Returns the number of files split.
pub fn split_large_files(dir: &Path, limit: u64) -> Result<usize> {
    let chunks_dir = dir.join(CHUNKS_DIR);
    let mut large = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_entry(|e| e.path() != chunks_dir.as_path()) {
        let entry = entry?;
        if entry.file_type().is_file() && entry.metadata()?.len() > limit {
            large.push(entry.into_path());
        }
    }

    for path in &large {
        let rel = path.strip_prefix(dir)?;
        let parts = split_file(path, &chunks_dir, &encode_name(rel), limit)?;
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
        tracing::info!("Chunked {} into {} parts", rel.display(), parts);
    }
    Ok(large.len())
}

fn split_file(path: &Path, chunks_dir: &Path, name: &str, limit: u64) -> Result<usize> {
    fs::create_dir_all(chunks_dir)?;
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
    );
    let mut index = 0;
    loop {
        let part_path = chunks_dir.join(format!("{}{}{}", name, PART_MARKER, index));
        let mut writer = BufWriter::new(File::create(&part_path)?);
        let copied = io::copy(&mut (&mut reader).take(limit), &mut writer)?;
        writer.flush()?;
        if copied == 0 {
            drop(writer);
            fs::remove_file(&part_path)?;
            break;
        }
        index += 1;
        if copied < limit {
            break;
        }
    }
    Ok(index)
}

/// Rebuild chunked files in `dir`. Files that already exist are left alone.
///
/// Returns the number of files reassembled.
pub fn reassemble(dir: &Path) -> Result<usize> {
    let chunks_dir = dir.join(CHUNKS_DIR);
    if !chunks_dir.is_dir() {
        return Ok(0);
    }

    let mut groups: BTreeMap<String, Vec<(u64, PathBuf)>> = BTreeMap::new();
    for entry in fs::read_dir(&chunks_dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some((base, index)) = file_name.rsplit_once(PART_MARKER) else {
            continue;
        };
        let Ok(index) = index.parse::<u64>() else {
            continue;
        };
        groups
            .entry(base.to_string())
            .or_default()
            .push((index, entry.path()));
    }

    let mut rebuilt = 0;
    for (base, mut parts) in groups {
        let target = dir.join(decode_name(&base));
        if target.exists() {
            continue;
        }
        parts.sort_by_key(|(index, _)| *index);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = target.with_extension("assembling");
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for (_, part) in &parts {
            let mut reader = File::open(part)
                .with_context(|| format!("failed to open chunk {}", part.display()))?;
            io::copy(&mut reader, &mut writer)?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &target)?;
        rebuilt += 1;
    }
    Ok(rebuilt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_split_and_reassemble() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("node-0")).unwrap();
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        fs::write(root.join("node-0/node-data.tar.gz"), &data).unwrap();
        fs::write(root.join("small.json"), b"{}").unwrap();

        assert_eq!(split_large_files(root, 1000).unwrap(), 1);
        assert!(!root.join("node-0/node-data.tar.gz").exists());
        assert!(root.join("small.json").exists());
        for i in 0..3 {
            assert!(root
                .join(format!("chunks/node-0__node-data.tar.gz.part-{}", i))
                .is_file());
        }
        assert!(!root.join("chunks/node-0__node-data.tar.gz.part-3").exists());

        assert_eq!(reassemble(root).unwrap(), 1);
        assert_eq!(fs::read(root.join("node-0/node-data.tar.gz")).unwrap(), data);
        assert_eq!(reassemble(root).unwrap(), 0);
    }

    #[test]
    fn test_parts_are_ordered_numerically() {
        let dir = TempDir::new().unwrap();
        let chunks = dir.path().join(CHUNKS_DIR);
        fs::create_dir_all(&chunks).unwrap();
        for i in 0..12 {
            fs::write(chunks.join(format!("a.bin.part-{}", i)), [i as u8]).unwrap();
        }
        reassemble(dir.path()).unwrap();
        assert_eq!(
            fs::read(dir.path().join("a.bin")).unwrap(),
            (0..12u8).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_exact_multiple_has_no_empty_part() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), vec![7u8; 2000]).unwrap();
        split_large_files(dir.path(), 1000).unwrap();
        assert!(dir.path().join("chunks/f.part-1").exists());
        assert!(!dir.path().join("chunks/f.part-2").exists());
    }
}
