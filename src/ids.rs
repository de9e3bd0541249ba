//! Chain, subnet and VM identifiers.
//!
//! IDs are 32-byte values printed in CB58: base58 over the payload followed
//! by the last four bytes of its SHA-256 digest.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

pub const ID_LEN: usize = 32;
const CHECKSUM_LEN: usize = 4;

pub fn cb58_encode(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut buf = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    bs58::encode(buf).into_string()
}

pub fn cb58_decode(s: &str) -> Result<Vec<u8>> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|e| Error::invalid(format!("invalid cb58 string {:?}: {}", s, e)))?;
    if raw.len() < CHECKSUM_LEN {
        return Err(Error::invalid(format!("invalid cb58 string {:?}: too short", s)));
    }
    let (payload, checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
    let digest = Sha256::digest(payload);
    if checksum != &digest[digest.len() - CHECKSUM_LEN..] {
        return Err(Error::invalid("invalid checksum"));
    }
    Ok(payload.to_vec())
}

/// Parse a 32-byte ID from CB58.
pub fn parse_id(s: &str) -> Result<[u8; ID_LEN]> {
    let payload = cb58_decode(s)?;
    payload
        .try_into()
        .map_err(|_| Error::invalid(format!("{} is not a 32 byte ID", s)))
}

pub fn empty_id() -> String {
    cb58_encode(&[0u8; ID_LEN])
}

/// VM ID derived from a VM name by zero padding its bytes to 32.
pub fn vm_id_from_name(name: &str) -> Result<String> {
    let bytes = name.as_bytes();
    if bytes.len() > ID_LEN {
        return Err(Error::invalid(format!(
            "VM name {:?} is longer than {} bytes",
            name, ID_LEN
        )));
    }
    let mut id = [0u8; ID_LEN];
    id[..bytes.len()].copy_from_slice(bytes);
    Ok(cb58_encode(&id))
}

/// `0x`-prefixed hex form of a CB58 ID.
pub fn to_hex_id(cb58: &str) -> Result<String> {
    Ok(format!("0x{}", hex::encode(cb58_decode(cb58)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_id() {
        assert_eq!(empty_id(), "11111111111111111111111111111111LpoYY");
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let good = vm_id_from_name("subnetevm").unwrap();
        assert_eq!(cb58_decode(&good).unwrap().len(), ID_LEN);

        let mut chars: Vec<char> = good.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let bad: String = chars.into_iter().collect();
        assert!(cb58_decode(&bad).is_err());
    }

    #[test]
    fn test_vm_id_padding() {
        let id = vm_id_from_name("evm").unwrap();
        let raw = parse_id(&id).unwrap();
        assert_eq!(&raw[..3], b"evm");
        assert!(raw[3..].iter().all(|b| *b == 0));

        let long = "x".repeat(33);
        assert!(vm_id_from_name(&long).is_err());
    }

    #[test]
    fn test_hex_id() {
        let hex_id = to_hex_id(&empty_id()).unwrap();
        assert_eq!(hex_id, format!("0x{}", "00".repeat(32)));
    }
}
