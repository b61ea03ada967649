//! Canonical schema digests (versioned).
//!
//! Workbooks record the digest of the schema they were written against so a
//! reader can tell when a file is being read with a different schema version.
//!
//! - algorithm: **FNV-1a 64-bit**
//! - input: the UTF-8 bytes of the schema file as-read
//! - output: `"fnv1a64:<16 lowercase hex digits>"`
//!
//! This digest is **not** a security primitive. It is an identity tool.

/// Prefix used in serialized digests.
pub const SCHEMA_DIGEST_V1_PREFIX: &str = "fnv1a64:";

/// Compute a v1 digest (FNV-1a 64-bit) over arbitrary bytes.
pub fn fnv1a64_digest_bytes(bytes: &[u8]) -> String {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for b in bytes {
        hash ^= (*b) as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    format!("{SCHEMA_DIGEST_V1_PREFIX}{hash:016x}")
}

/// Compute the v1 digest for schema text.
pub fn schema_digest_v1(text: &str) -> String {
    fnv1a64_digest_bytes(text.as_bytes())
}
