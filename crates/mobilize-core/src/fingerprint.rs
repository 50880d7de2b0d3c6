//! Deduplication fingerprints.
//!
//! A fingerprint is a SHA-256 over a length-framed preimage, so that
//! `("ab", "c")` and `("a", "bc")` never collide.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::job::{FileSet, JobInput, JobKind};
use crate::platform::PlatformSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint from the job's content.
    pub fn derive(kind: JobKind, owner: &str, input: &JobInput, platforms: &PlatformSet) -> Self {
        let mut hasher = Framed::new(kind, owner);
        match input {
            JobInput::Archive { archive, .. } => hasher.part(archive),
            JobInput::Chat {
                messages,
                base_files,
            } => {
                for message in messages {
                    hasher.part(message.role.as_bytes());
                    hasher.part(message.content.as_bytes());
                }
                hasher.files(base_files);
            }
            JobInput::Files { files, repo_name } => {
                hasher.files(files);
                hasher.part(repo_name.as_deref().unwrap_or_default().as_bytes());
            }
        }
        hasher.platforms(platforms);
        hasher.finish()
    }

    /// Fingerprint from a client-supplied idempotency key.
    pub fn from_client_key(kind: JobKind, owner: &str, key: &str, platforms: &PlatformSet) -> Self {
        let mut hasher = Framed::new(kind, owner);
        hasher.part(b"client-key");
        hasher.part(key.as_bytes());
        hasher.platforms(platforms);
        hasher.finish()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

struct Framed(Sha256);

impl Framed {
    fn new(kind: JobKind, owner: &str) -> Self {
        let mut framed = Self(Sha256::new());
        framed.part(kind.as_str().as_bytes());
        framed.part(owner.as_bytes());
        framed
    }

    fn part(&mut self, bytes: &[u8]) {
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }

    fn files(&mut self, files: &FileSet) {
        self.part(&(files.len() as u64).to_le_bytes());
        for (path, content) in files {
            self.part(path.as_bytes());
            self.part(content.as_bytes());
        }
    }

    fn platforms(&mut self, platforms: &PlatformSet) {
        for platform in platforms {
            self.part(platform.as_str().as_bytes());
        }
    }

    fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.0.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Platform;

    fn archive(bytes: &[u8]) -> JobInput {
        JobInput::Archive {
            file_name: "app.zip".to_string(),
            archive: bytes.to_vec(),
        }
    }

    #[test]
    fn test_same_archive_same_fingerprint() {
        let platforms = PlatformSet::from([Platform::Ios]);
        let a = Fingerprint::derive(JobKind::Conversion, "u1", &archive(b"abc"), &platforms);
        let b = Fingerprint::derive(JobKind::Conversion, "u1", &archive(b"abc"), &platforms);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_owner_platform_and_content() {
        let ios = PlatformSet::from([Platform::Ios]);
        let both = PlatformSet::from(Platform::ALL);
        let base = Fingerprint::derive(JobKind::Conversion, "u1", &archive(b"abc"), &ios);

        assert_ne!(
            base,
            Fingerprint::derive(JobKind::Conversion, "u2", &archive(b"abc"), &ios)
        );
        assert_ne!(
            base,
            Fingerprint::derive(JobKind::Conversion, "u1", &archive(b"abc"), &both)
        );
        assert_ne!(
            base,
            Fingerprint::derive(JobKind::Conversion, "u1", &archive(b"abd"), &ios)
        );
    }

    #[test]
    fn test_file_framing_prevents_boundary_collisions() {
        let platforms = PlatformSet::from([Platform::Android]);
        let left = JobInput::Files {
            files: FileSet::from([("ab".to_string(), "c".to_string())]),
            repo_name: None,
        };
        let right = JobInput::Files {
            files: FileSet::from([("a".to_string(), "bc".to_string())]),
            repo_name: None,
        };
        assert_ne!(
            Fingerprint::derive(JobKind::Build, "u", &left, &platforms),
            Fingerprint::derive(JobKind::Build, "u", &right, &platforms)
        );
    }

    #[test]
    fn test_client_key_fingerprint() {
        let platforms = PlatformSet::from([Platform::Ios]);
        let a = Fingerprint::from_client_key(JobKind::AiGeneration, "u", "k-1", &platforms);
        let b = Fingerprint::from_client_key(JobKind::AiGeneration, "u", "k-1", &platforms);
        let c = Fingerprint::from_client_key(JobKind::AiGeneration, "u", "k-2", &platforms);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
