//! Archive, compression and encryption stages shared by backups and snapshots.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use walkdir::WalkDir;

pub const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    Gzip,
    None,
}

impl Compression {
    /// File suffix of an archive with this compression.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Zstd => ".tar.zst",
            Compression::Gzip => ".tar.gz",
            Compression::None => ".tar",
        }
    }

    /// All archive suffixes, most specific first.
    pub fn all() -> [Compression; 3] {
        [Compression::Zstd, Compression::Gzip, Compression::None]
    }

    pub fn from_key(key: &str) -> Option<Compression> {
        let key = key.strip_suffix(ENCRYPTED_SUFFIX).unwrap_or(key);
        Self::all()
            .into_iter()
            .find(|c| key.ends_with(c.extension()))
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Zstd => f.write_str("zstd"),
            Compression::Gzip => f.write_str("gzip"),
            Compression::None => f.write_str("none"),
        }
    }
}

impl FromStr for Compression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zstd" | "zst" => Ok(Compression::Zstd),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "none" | "" => Ok(Compression::None),
            other => bail!("unknown compression {:?}: expected zstd, gzip or none", other),
        }
    }
}

pub const ENCRYPTED_SUFFIX: &str = ".age";

/// Write `src` as a tar stream with paths relative to `src`.
///
/// Only files accepted by `filter` are included; directories are always kept.
pub fn write_tar<W, F>(writer: W, src: &Path, filter: F) -> Result<W>
where
    W: Write,
    F: Fn(&Path, &Metadata) -> bool,
{
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escapes {}", entry.path().display(), src.display()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_dir() {
            builder.append_dir(rel, entry.path())?;
        } else if filter(rel, &meta) {
            builder
                .append_path_with_name(entry.path(), rel)
                .with_context(|| format!("Failed to archive {}", entry.path().display()))?;
        }
    }

    Ok(builder.into_inner()?)
}

pub fn tar_directory(src: &Path) -> Result<Vec<u8>> {
    write_tar(Vec::new(), src, |_, _| true)
}

/// Unpack a tar stream into `dst`, creating it if needed.
pub fn extract_tar<R: Read>(reader: R, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create {}", dst.display()))?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive
        .unpack(dst)
        .with_context(|| format!("Failed to extract archive into {}", dst.display()))?;
    Ok(())
}

pub fn compress(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::Zstd => zstd::encode_all(data, ZSTD_LEVEL).context("zstd compression failed"),
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::None => Ok(data.to_vec()),
    }
}

pub fn decompress(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::Zstd => zstd::decode_all(data).context("zstd decompression failed"),
        Compression::Gzip => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(data)
                .read_to_end(&mut out)
                .context("gzip decompression failed")?;
            Ok(out)
        }
        Compression::None => Ok(data.to_vec()),
    }
}

/// Encrypt to age X25519 recipients (`age1...`).
#[cfg(feature = "encryption")]
pub fn encrypt(data: &[u8], recipients: &[String]) -> Result<Vec<u8>> {
    if recipients.is_empty() {
        bail!("encryption requested but no recipients provided");
    }
    let mut parsed: Vec<Box<dyn age::Recipient + Send>> = Vec::with_capacity(recipients.len());
    for r in recipients {
        let recipient = r
            .trim()
            .parse::<age::x25519::Recipient>()
            .map_err(|e| anyhow::anyhow!("invalid age recipient {:?}: {}", r, e))?;
        parsed.push(Box::new(recipient));
    }
    let encryptor = age::Encryptor::with_recipients(parsed)
        .context("no usable age recipients")?;

    let mut out = Vec::new();
    let mut writer = encryptor.wrap_output(&mut out)?;
    writer.write_all(data)?;
    writer.finish()?;
    Ok(out)
}

#[cfg(not(feature = "encryption"))]
pub fn encrypt(_data: &[u8], _recipients: &[String]) -> Result<Vec<u8>> {
    Err(crate::error::Error::FeatureNotAvailable {
        feature: "encryption".to_string(),
    }
    .into())
}

/// Read `AGE-SECRET-KEY-` lines from an identity file.
pub fn load_identities(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read identity file {}", path.display()))?;
    let identities: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();
    if identities.is_empty() {
        bail!("no identities found in {}", path.display());
    }
    Ok(identities)
}

#[cfg(feature = "encryption")]
pub fn decrypt(data: &[u8], identities: &[String]) -> Result<Vec<u8>> {
    if identities.is_empty() {
        bail!("backup is encrypted: an age identity is required to restore it");
    }
    let mut parsed = Vec::with_capacity(identities.len());
    for i in identities {
        let identity = i
            .parse::<age::x25519::Identity>()
            .map_err(|e| anyhow::anyhow!("invalid age identity: {}", e))?;
        parsed.push(identity);
    }

    let decryptor = match age::Decryptor::new(data)? {
        age::Decryptor::Recipients(d) => d,
        _ => bail!("passphrase-encrypted backups are not supported"),
    };
    let mut reader = decryptor.decrypt(parsed.iter().map(|i| i as &dyn age::Identity))?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(not(feature = "encryption"))]
pub fn decrypt(_data: &[u8], _identities: &[String]) -> Result<Vec<u8>> {
    Err(crate::error::Error::FeatureNotAvailable {
        feature: "encryption".to_string(),
    }
    .into())
}
