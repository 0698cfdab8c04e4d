//! Core library for `keysmith`: SSH key discovery, identification, and
//! generation.
//!
//! Three components, leaves first:
//!
//! - [`parser`] — extracts algorithm, comment, fingerprints, and encryption
//!   status from a key pair's files.  Pure transformation over file bytes.
//! - [`scanner`] — enumerates the key-storage directory, pairs private and
//!   public files into [`Key`] records, and delegates to the parser.
//! - [`generator`] — validates a [`KeySpec`], guards against overwrites, and
//!   drives `ssh-keygen` with a staged-stdin protocol.
//!
//! All three are synchronous.  Each call reads fresh filesystem state and
//! returns an independent result; callers that generate a key and want to
//! see it must re-scan afterwards.

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::Zeroizing;

pub mod generator;
pub mod parser;
pub mod scanner;

pub use generator::{Generator, KeygenCommand, KeygenOutput, KeygenRunner};
pub use scanner::Scanner;

/// The algorithm family of an SSH key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyType {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "ED25519")]
    Ed25519,
    #[serde(rename = "ECDSA")]
    Ecdsa,
    #[serde(rename = "DSA")]
    Dsa,
    Unknown,
}

impl KeyType {
    /// Map an algorithm identifier (e.g. `"ssh-ed25519"`,
    /// `"ecdsa-sha2-nistp256"`) to a key type by case-sensitive substring
    /// match.  Anything unrecognised maps to [`KeyType::Unknown`].
    pub fn from_algorithm(algorithm: &str) -> Self {
        if algorithm.contains("rsa") {
            Self::Rsa
        } else if algorithm.contains("ed25519") {
            Self::Ed25519
        } else if algorithm.contains("ecdsa") {
            Self::Ecdsa
        } else if algorithm.contains("dsa") || algorithm.contains("dss") {
            Self::Dsa
        } else {
            Self::Unknown
        }
    }

    /// The `-t` argument value `ssh-keygen` expects for this type.
    ///
    /// Only meaningful for the generatable types; `Dsa` and `Unknown` are
    /// rejected during validation before this is ever consulted.
    pub(crate) fn keygen_name(self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
            Self::Ecdsa => "ecdsa",
            Self::Dsa => "dsa",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rsa => "RSA",
            Self::Ed25519 => "ED25519",
            Self::Ecdsa => "ECDSA",
            Self::Dsa => "DSA",
            Self::Unknown => "Unknown",
        };
        f.pad(s)
    }
}

/// One discovered SSH key pair.
///
/// Constructed fresh on every scan — there is no persistent identity across
/// scans.  `name` is the base filename (public suffix stripped) and is unique
/// within a single scan result.
///
/// Invariant: a record only ever reaches a caller with `has_public == true`;
/// private-key-only files are invisible because metadata cannot be derived
/// from an (often encrypted) private key alone.
#[derive(Debug, Clone, Serialize)]
pub struct Key {
    /// Base identifier: filename without the `.pub` suffix.
    pub name: String,
    /// Absolute path of the private key file, if present.
    pub private_path: Option<PathBuf>,
    /// Absolute path of the public key file, if present.
    pub public_path: Option<PathBuf>,
    pub key_type: KeyType,
    /// `"SHA256:<unpadded-base64>"` over the binary key encoding.
    pub fingerprint_sha256: String,
    /// Legacy MD5 fingerprint: lowercase hex bytes joined by `:`.
    pub fingerprint_md5: String,
    /// Free-text comment embedded in the public key; empty if absent.
    pub comment: String,
    /// Informational bit length (RSA modulus size, curve size, etc.).
    pub bit_length: Option<u32>,
    /// Modification time of the public key file (private if no public).
    pub modified: Option<DateTime<Utc>>,
    pub has_private: bool,
    pub has_public: bool,
    /// True iff the private key file carries a known encryption marker.
    /// Meaningless when `has_private` is false.
    pub is_encrypted: bool,
    /// Verbatim text of the public key file, for display and clipboard use.
    pub public_key: String,
}

impl Key {
    /// An empty record for `name`, to be filled in by the scanner and parser.
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            private_path: None,
            public_path: None,
            key_type: KeyType::Unknown,
            fingerprint_sha256: String::new(),
            fingerprint_md5: String::new(),
            comment: String::new(),
            bit_length: None,
            modified: None,
            has_private: false,
            has_public: false,
            is_encrypted: false,
            public_key: String::new(),
        }
    }
}

/// A key-generation request.
///
/// Transient: validated once per [`Generator::generate`] call and never
/// persisted.  `Debug` redacts the passphrase so it cannot leak into logs.
#[derive(Clone)]
pub struct KeySpec {
    /// Target base filename (e.g. `"id_ed25519"`).
    pub name: String,
    pub key_type: KeyType,
    /// Bit length; meaningful only for RSA and ECDSA.  `None` selects the
    /// per-type default (4096 for RSA, 521 for ECDSA).
    pub bits: Option<u32>,
    /// Optional comment passed to `ssh-keygen -C`.
    pub comment: String,
    /// Optional passphrase, fed to `ssh-keygen` over stdin so it never
    /// appears in a process argument list.  Empty means no passphrase.
    pub passphrase: Zeroizing<String>,
}

impl std::fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySpec")
            .field("name", &self.name)
            .field("key_type", &self.key_type)
            .field("bits", &self.bits)
            .field("comment", &self.comment)
            .field("passphrase", &"[redacted]")
            .finish()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot resolve home directory (HOME is not set)")]
    NoHomeDir,

    #[error("failed to read key directory {path}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create key directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse public key {path}: {source}")]
    ParsePublicKey {
        path: PathBuf,
        #[source]
        source: ssh_key::Error,
    },

    #[error("key name is required")]
    EmptyName,

    #[error("key name cannot contain spaces or slashes")]
    InvalidNameChars,

    #[error("key name too long ({0} characters, max 255)")]
    NameTooLong(usize),

    #[error("RSA key size must be at least 2048 bits (got {0})")]
    RsaBitsTooSmall(u32),

    #[error("ECDSA key size must be 256, 384, or 521 bits (got {0})")]
    InvalidEcdsaBits(u32),

    #[error("unsupported key type for generation: {0}")]
    UnsupportedKeyType(KeyType),

    /// A normal, expected outcome to surface to the user — not a fault.
    #[error("key already exists: {path}")]
    KeyExists { path: PathBuf },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("ssh-keygen failed: {output}")]
    KeygenFailed { output: String },

    /// Weak permissions on private key material are a security failure, so
    /// this is surfaced even though the key was already written.
    #[error("failed to set permissions on {path}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolve the conventional per-user key-storage directory (`~/.ssh`).
///
/// Inability to resolve a home location is a construction-time error;
/// non-existence of the directory itself is tolerated by the scanner.
pub fn storage_dir() -> Result<PathBuf, Error> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".ssh"))
        .ok_or(Error::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_mapping_is_total() {
        assert_eq!(KeyType::from_algorithm("ssh-rsa"), KeyType::Rsa);
        assert_eq!(KeyType::from_algorithm("rsa-sha2-512"), KeyType::Rsa);
        assert_eq!(KeyType::from_algorithm("ssh-ed25519"), KeyType::Ed25519);
        assert_eq!(
            KeyType::from_algorithm("sk-ssh-ed25519@openssh.com"),
            KeyType::Ed25519
        );
        assert_eq!(
            KeyType::from_algorithm("ecdsa-sha2-nistp256"),
            KeyType::Ecdsa
        );
        assert_eq!(KeyType::from_algorithm("ssh-dss"), KeyType::Dsa);
        assert_eq!(KeyType::from_algorithm("unknown-algo"), KeyType::Unknown);
        assert_eq!(KeyType::from_algorithm(""), KeyType::Unknown);
    }

    #[test]
    fn key_spec_debug_redacts_passphrase() {
        let spec = KeySpec {
            name: "id_ed25519".to_string(),
            key_type: KeyType::Ed25519,
            bits: None,
            comment: String::new(),
            passphrase: Zeroizing::new("hunter2".to_string()),
        };
        let debug = format!("{spec:?}");
        assert!(debug.contains("[redacted]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn key_type_display() {
        assert_eq!(KeyType::Rsa.to_string(), "RSA");
        assert_eq!(KeyType::Ed25519.to_string(), "ED25519");
        assert_eq!(KeyType::Unknown.to_string(), "Unknown");
    }
}
