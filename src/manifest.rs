//! The database manifest: a tiny file at the database root identifying
//! the on-disk schema (the "format key") and, where the schema
//! requires native byte layout, an endianness signature.

use std::path::Path;

use crate::error::{PosDbError, Result};

/// Magic values written into an [`EndiannessSignature`], one per
/// integer width, so a reader can detect a byte-order mismatch without
/// guessing.
const MAGIC_U64: u64 = 0x0011223344556677;
const MAGIC_U32: u32 = 0x8899AABB;
const MAGIC_U16: u16 = 0xCCDD;
const MAGIC_U8: u8 = 0xEE;

/// A 16-byte block of known magic values, written in the writer's
/// native byte order; a reader compares it byte-for-byte against its
/// own native encoding to detect endianness mismatches without
/// depending on any particular declared byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndiannessSignature;

impl EndiannessSignature {
    const SIZE: usize = 8 + 4 + 2 + 1;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&MAGIC_U64.to_ne_bytes());
        out[8..12].copy_from_slice(&MAGIC_U32.to_ne_bytes());
        out[12..14].copy_from_slice(&MAGIC_U16.to_ne_bytes());
        out[14] = MAGIC_U8;
        out
    }

    fn matches_native(bytes: &[u8]) -> bool {
        if bytes.len() != Self::SIZE {
            return false;
        }
        bytes[0..8] == MAGIC_U64.to_ne_bytes()
            && bytes[8..12] == MAGIC_U32.to_ne_bytes()
            && bytes[12..14] == MAGIC_U16.to_ne_bytes()
            && bytes[14] == MAGIC_U8
    }
}

/// The outcome of [`validate_manifest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestValidation {
    Ok,
    KeyMismatch,
    EndiannessMismatch,
    InvalidManifest,
}

/// The on-disk database manifest: a format key, plus an endianness
/// signature when the schema requires native layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub format_key: String,
    pub requires_native_endianness: bool,
}

impl Manifest {
    pub fn new(format_key: impl Into<String>, requires_native_endianness: bool) -> Self {
        Manifest { format_key: format_key.into(), requires_native_endianness }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let key_bytes = self.format_key.as_bytes();
        if key_bytes.len() > u8::MAX as usize {
            return Err(PosDbError::StringError("format key too long for manifest".to_string()));
        }
        let mut out = Vec::with_capacity(1 + key_bytes.len() + EndiannessSignature::SIZE);
        out.push(key_bytes.len() as u8);
        out.extend_from_slice(key_bytes);
        if self.requires_native_endianness {
            out.extend_from_slice(&EndiannessSignature.to_bytes());
        }
        Ok(out)
    }

    /// Write this manifest to `path`, truncating any existing file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

/// Validate the manifest at `path` against the `expected_format_key`
/// this build understands, requiring a matching endianness signature
/// when `requires_native_endianness` is set for that format.
pub fn validate_manifest(
    path: impl AsRef<Path>,
    expected_format_key: &str,
    requires_native_endianness: bool,
) -> Result<ManifestValidation> {
    let path = path.as_ref();
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ManifestValidation::InvalidManifest),
        Err(e) => return Err(e.into()),
    };
    validate_manifest_bytes(&bytes, expected_format_key, requires_native_endianness)
}

fn validate_manifest_bytes(
    bytes: &[u8],
    expected_format_key: &str,
    requires_native_endianness: bool,
) -> Result<ManifestValidation> {
    let Some(&key_length) = bytes.first() else {
        return Ok(ManifestValidation::InvalidManifest);
    };
    let key_length = key_length as usize;
    if bytes.len() < 1 + key_length {
        return Ok(ManifestValidation::InvalidManifest);
    }
    let found_key = match std::str::from_utf8(&bytes[1..1 + key_length]) {
        Ok(s) => s,
        Err(_) => return Ok(ManifestValidation::InvalidManifest),
    };
    if found_key != expected_format_key {
        return Ok(ManifestValidation::KeyMismatch);
    }

    if requires_native_endianness {
        let sig_bytes = &bytes[1 + key_length..];
        if sig_bytes.len() != EndiannessSignature::SIZE {
            return Ok(ManifestValidation::InvalidManifest);
        }
        if !EndiannessSignature::matches_native(sig_bytes) {
            return Ok(ManifestValidation::EndiannessMismatch);
        }
    }

    Ok(ManifestValidation::Ok)
}

/// Open-or-create semantics: if `path` doesn't exist, write a fresh
/// manifest for `format_key`/`requires_native_endianness` and succeed;
/// otherwise validate the existing one and fail on mismatch.
pub fn open_or_create(path: impl AsRef<Path>, format_key: &str, requires_native_endianness: bool) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        Manifest::new(format_key, requires_native_endianness).write(path)?;
        return Ok(());
    }
    match validate_manifest(path, format_key, requires_native_endianness)? {
        ManifestValidation::Ok => Ok(()),
        ManifestValidation::KeyMismatch => Err(PosDbError::ManifestKeyMismatch {
            path: path.to_path_buf(),
            expected: format_key.to_string(),
            found: read_found_key(path).unwrap_or_default(),
        }),
        ManifestValidation::EndiannessMismatch => Err(PosDbError::ManifestEndiannessMismatch(path.to_path_buf())),
        ManifestValidation::InvalidManifest => Err(PosDbError::InvalidManifest(path.to_path_buf())),
    }
}

fn read_found_key(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let key_length = *bytes.first()? as usize;
    std::str::from_utf8(bytes.get(1..1 + key_length)?).ok().map(str::to_string)
}
