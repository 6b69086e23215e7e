//! Blob & manifest store (C1).
//!
//! Content-addressed files rooted at `data_dir/registry`:
//!
//! ```text
//! blobs/sha256/<shard>/<hex>/data
//! uploads/<uuid>/data + meta
//! manifests/<name>/revisions/<hex>
//! manifests/<name>/tags/<tag>/current
//! ```

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, SystemTime},
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
};
use uuid::Uuid;

use crate::{
    error::{GordonError, GordonResult},
    registry::digest::{Digest, RollingHash},
};

/// Manifests may not exceed this size.
pub const MAX_MANIFEST_BYTES: u64 = 10 * 1024 * 1024;

/// A single upload chunk may not exceed this size (kept below 100 MiB for
/// reverse-proxy compatibility).
pub const MAX_CHUNK_BYTES: u64 = 95 * 1024 * 1024;

/// Upload sessions idle for longer than this are eligible for GC.
pub const UPLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

fn repository_name_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
    })
}

/// Validates an OCI-compliant repository name.
pub fn validate_repository_name(name: &str) -> GordonResult<()> {
    if name.is_empty() || !repository_name_re().is_match(name) {
        return Err(GordonError::NameInvalid(name.to_string()));
    }
    Ok(())
}

/// A manifest reference: either a mutable tag or an immutable digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A human-readable mutable pointer.
    Tag(String),
    /// An immutable content address.
    Digest(Digest),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(t) => f.write_str(t),
            Reference::Digest(d) => write!(f, "{d}"),
        }
    }
}

fn tag_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap())
}

impl FromStr for Reference {
    type Err = GordonError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Ok(digest) = raw.parse::<Digest>() {
            return Ok(Reference::Digest(digest));
        }
        if !tag_re().is_match(raw) {
            return Err(GordonError::TagInvalid(raw.to_string()));
        }
        Ok(Reference::Tag(raw.to_string()))
    }
}

/// A stored manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Owning repository name.
    pub name: String,
    /// Content-type header value (e.g. `application/vnd.oci.image.manifest.v1+json`).
    pub media_type: String,
    /// Raw manifest bytes, exactly as uploaded.
    pub bytes: Vec<u8>,
}

impl Manifest {
    /// Computes this manifest's content digest.
    pub fn digest(&self) -> Digest {
        Digest::of(&self.bytes)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadMeta {
    repository: String,
    started_at: u64,
    last_activity: u64,
    total_bytes: u64,
}

struct UploadState {
    hash: RollingHash,
    total_bytes: u64,
}

/// A blob/manifest store rooted at `<data_dir>/registry`.
pub struct Store {
    root: PathBuf,
    uploads: RwLock<HashMap<Uuid, Arc<Mutex<UploadState>>>>,
}

impl Store {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> GordonResult<Self> {
        let root = root.into();
        for sub in ["blobs/sha256", "uploads", "manifests"] {
            fs::create_dir_all(root.join(sub)).await?;
        }
        Ok(Store {
            root,
            uploads: RwLock::new(HashMap::new()),
        })
    }

    fn blob_dir(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs/sha256")
            .join(digest.shard())
            .join(digest.hex())
    }

    fn upload_dir(&self, uuid: Uuid) -> PathBuf {
        self.root.join("uploads").join(uuid.to_string())
    }

    fn manifest_revision_path(&self, name: &str, digest: &Digest) -> PathBuf {
        self.root
            .join("manifests")
            .join(name)
            .join("revisions")
            .join(digest.hex())
    }

    fn tag_path(&self, name: &str, tag: &str) -> PathBuf {
        self.root
            .join("manifests")
            .join(name)
            .join("tags")
            .join(tag)
            .join("current")
    }

    /// Starts a new upload session for `repository`, returning its uuid.
    pub async fn start_upload(&self, repository: &str) -> GordonResult<Uuid> {
        validate_repository_name(repository)?;
        let uuid = Uuid::new_v4();
        let dir = self.upload_dir(uuid);
        fs::create_dir_all(&dir).await?;
        fs::File::create(dir.join("data")).await?;

        let now = now_unix();
        let meta = UploadMeta {
            repository: repository.to_string(),
            started_at: now,
            last_activity: now,
            total_bytes: 0,
        };
        write_json_atomic(&dir.join("meta"), &meta).await?;

        self.uploads.write().await.insert(
            uuid,
            Arc::new(Mutex::new(UploadState {
                hash: RollingHash::new(),
                total_bytes: 0,
            })),
        );

        Ok(uuid)
    }

    /// Appends `chunk` to the upload identified by `uuid`, returning the new
    /// total byte count. Concurrent appends to the same uuid are serialized.
    pub async fn append_chunk(&self, uuid: Uuid, chunk: &[u8]) -> GordonResult<u64> {
        if chunk.len() as u64 > MAX_CHUNK_BYTES {
            return Err(GordonError::SizeInvalid(format!(
                "chunk of {} bytes exceeds limit of {MAX_CHUNK_BYTES}",
                chunk.len()
            )));
        }

        let state = {
            let uploads = self.uploads.read().await;
            uploads
                .get(&uuid)
                .cloned()
                .ok_or(GordonError::UploadUnknown(uuid))?
        };

        let dir = self.upload_dir(uuid);
        if !dir.exists() {
            return Err(GordonError::UploadUnknown(uuid));
        }

        let mut guard = state.lock().await;

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.join("data"))
            .await
            .map_err(|e| GordonError::BlobUploadInvalid(e.to_string()))?;
        file.write_all(chunk)
            .await
            .map_err(|e| GordonError::BlobUploadInvalid(e.to_string()))?;
        file.flush().await?;

        guard.hash.update(chunk);
        guard.total_bytes += chunk.len() as u64;
        let total = guard.total_bytes;
        drop(guard);

        self.touch_upload_meta(uuid, total).await?;
        Ok(total)
    }

    async fn touch_upload_meta(&self, uuid: Uuid, total_bytes: u64) -> GordonResult<()> {
        let dir = self.upload_dir(uuid);
        let raw = fs::read(dir.join("meta")).await?;
        let mut meta: UploadMeta = serde_json::from_slice(&raw)?;
        meta.last_activity = now_unix();
        meta.total_bytes = total_bytes;
        write_json_atomic(&dir.join("meta"), &meta).await
    }

    /// Finalizes an upload: verifies the rolling hash matches
    /// `expected_digest`, then atomically moves the blob into place.
    pub async fn finish_upload(&self, uuid: Uuid, expected_digest: &Digest) -> GordonResult<()> {
        let state = {
            let mut uploads = self.uploads.write().await;
            uploads.remove(&uuid).ok_or(GordonError::UploadUnknown(uuid))?
        };

        let guard = state.lock().await;
        let computed = guard.hash.clone().finalize();
        drop(guard);

        let dir = self.upload_dir(uuid);
        if &computed != expected_digest {
            fs::remove_dir_all(&dir).await.ok();
            return Err(GordonError::DigestMismatch {
                expected: expected_digest.to_string(),
                computed: computed.to_string(),
            });
        }

        let blob_dir = self.blob_dir(&computed);
        fs::create_dir_all(&blob_dir).await?;
        fs::rename(dir.join("data"), blob_dir.join("data")).await?;
        fs::remove_dir_all(&dir).await.ok();

        Ok(())
    }

    /// Returns the on-disk path of a finalized blob, if it exists.
    pub async fn get_blob_path(&self, digest: &Digest) -> GordonResult<PathBuf> {
        let path = self.blob_dir(digest).join("data");
        if fs::metadata(&path).await.is_err() {
            return Err(GordonError::BlobUnknown(digest.to_string()));
        }
        Ok(path)
    }

    /// Stores `manifest`, updating the tag pointer if `reference` is a tag.
    /// Returns the computed digest.
    pub async fn put_manifest(
        &self,
        name: &str,
        reference: &Reference,
        manifest: Manifest,
    ) -> GordonResult<Digest> {
        validate_repository_name(name)?;

        if manifest.bytes.len() as u64 > MAX_MANIFEST_BYTES {
            return Err(GordonError::SizeInvalid(format!(
                "manifest of {} bytes exceeds limit of {MAX_MANIFEST_BYTES}",
                manifest.bytes.len()
            )));
        }

        let digest = manifest.digest();
        let revision_path = self.manifest_revision_path(name, &digest);
        fs::create_dir_all(revision_path.parent().unwrap()).await?;

        #[derive(Serialize, Deserialize)]
        struct Revision {
            media_type: String,
            #[serde(with = "serde_bytes_as_base64")]
            bytes: Vec<u8>,
        }
        write_json_atomic(
            &revision_path,
            &Revision {
                media_type: manifest.media_type,
                bytes: manifest.bytes,
            },
        )
        .await?;

        if let Reference::Tag(tag) = reference {
            let tag_path = self.tag_path(name, tag);
            fs::create_dir_all(tag_path.parent().unwrap()).await?;
            write_atomic(&tag_path, digest.as_str().as_bytes()).await?;
        }

        Ok(digest)
    }

    /// Resolves `reference` (tag or digest) and returns the manifest bytes
    /// plus content-type.
    pub async fn get_manifest(
        &self,
        name: &str,
        reference: &Reference,
    ) -> GordonResult<(Vec<u8>, String)> {
        let digest = self.resolve_reference(name, reference).await?;
        let revision_path = self.manifest_revision_path(name, &digest);
        let raw = fs::read(&revision_path)
            .await
            .map_err(|_| GordonError::ManifestUnknown(name.to_string(), reference.to_string()))?;

        #[derive(Deserialize)]
        struct Revision {
            media_type: String,
            #[serde(with = "serde_bytes_as_base64")]
            bytes: Vec<u8>,
        }
        let revision: Revision = serde_json::from_slice(&raw)?;
        Ok((revision.bytes, revision.media_type))
    }

    /// Resolves a tag or digest reference to a concrete digest.
    pub async fn resolve_reference(
        &self,
        name: &str,
        reference: &Reference,
    ) -> GordonResult<Digest> {
        match reference {
            Reference::Digest(d) => Ok(d.clone()),
            Reference::Tag(tag) => {
                let tag_path = self.tag_path(name, tag);
                let raw = fs::read_to_string(&tag_path).await.map_err(|_| {
                    GordonError::ManifestUnknown(name.to_string(), tag.to_string())
                })?;
                raw.parse()
                    .map_err(|_| GordonError::ManifestUnknown(name.to_string(), tag.to_string()))
            }
        }
    }

    /// Lists tags for `name` in lexicographic order.
    pub async fn list_tags(&self, name: &str) -> GordonResult<Vec<String>> {
        let tags_dir = self.root.join("manifests").join(name).join("tags");
        let mut tags = Vec::new();
        let mut entries = match fs::read_dir(&tags_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(tags),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                tags.push(name.to_string());
            }
        }
        tags.sort();
        Ok(tags)
    }

    /// Lists every repository that has at least one tag, found by walking
    /// the manifest tree (repository names may themselves contain `/`, so a
    /// leaf directory is one that has a `tags` subdirectory).
    pub async fn list_repositories(&self) -> GordonResult<Vec<String>> {
        let root = self.root.join("manifests");
        let mut repos = Vec::new();
        Self::walk_repositories(root.clone(), &root, &mut repos).await?;
        repos.sort();
        Ok(repos)
    }

    fn walk_repositories<'a>(
        dir: PathBuf,
        manifests_root: &'a Path,
        out: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = GordonResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => return Ok(()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let path = entry.path();
                if path.join("tags").is_dir() {
                    if let Ok(relative) = path.strip_prefix(manifests_root) {
                        if let Some(name) = relative.to_str() {
                            out.push(name.replace(std::path::MAIN_SEPARATOR, "/"));
                        }
                    }
                } else {
                    Self::walk_repositories(path, manifests_root, out).await?;
                }
            }
            Ok(())
        })
    }

    /// Applies "keep latest + K previous" retention to `name`: the `latest`
    /// tag, if present, is always kept; of the remaining tags, the `keep`
    /// most recently created (by tag-pointer mtime) survive and the rest
    /// are removed. Only the tag pointer is deleted — manifest revisions
    /// and blobs are left in place (no unreferenced-content GC). Returns
    /// the removed tag names.
    pub async fn prune_repository_tags(&self, name: &str, keep: u32) -> GordonResult<Vec<String>> {
        let tags_dir = self.root.join("manifests").join(name).join("tags");
        let mut entries = match fs::read_dir(&tags_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        let mut dated = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(tag) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if tag == "latest" {
                continue;
            }
            let created = fs::metadata(entry.path().join("current"))
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            dated.push((tag, created));
        }
        dated.sort_by(|a, b| b.1.cmp(&a.1));

        let mut removed = Vec::new();
        for (tag, _) in dated.into_iter().skip(keep as usize) {
            fs::remove_dir_all(tags_dir.join(&tag)).await.ok();
            removed.push(tag);
        }
        Ok(removed)
    }

    /// Applies [`Self::prune_repository_tags`] to every repository, returning
    /// the total number of tags removed.
    pub async fn prune_all_repositories(&self, keep: u32) -> GordonResult<usize> {
        let mut removed = 0;
        for repo in self.list_repositories().await? {
            removed += self.prune_repository_tags(&repo, keep).await?.len();
        }
        Ok(removed)
    }

    /// Removes upload sessions whose last activity predates `now - UPLOAD_IDLE_TIMEOUT`.
    pub async fn gc_idle_uploads(&self) -> GordonResult<usize> {
        let uploads_dir = self.root.join("uploads");
        let mut removed = 0;
        let mut entries = match fs::read_dir(&uploads_dir).await {
            Ok(e) => e,
            Err(_) => return Ok(0),
        };
        let cutoff = now_unix().saturating_sub(UPLOAD_IDLE_TIMEOUT.as_secs());
        while let Some(entry) = entries.next_entry().await? {
            let meta_path = entry.path().join("meta");
            let Ok(raw) = fs::read(&meta_path).await else {
                continue;
            };
            let Ok(meta) = serde_json::from_slice::<UploadMeta>(&raw) else {
                continue;
            };
            if meta.last_activity < cutoff {
                if let Ok(uuid) = Uuid::parse_str(&entry.file_name().to_string_lossy()) {
                    self.uploads.write().await.remove(&uuid);
                }
                fs::remove_dir_all(entry.path()).await.ok();
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> GordonResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> GordonResult<()> {
    let bytes = serde_json::to_vec(value)?;
    write_atomic(path, &bytes).await
}

mod serde_bytes_as_base64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        hex::decode(raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn new_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn chunked_upload_round_trip() {
        let (_dir, store) = new_store().await;
        let uuid = store.start_upload("app").await.unwrap();

        store.append_chunk(uuid, &[0u8; 5 * 1024 * 1024]).await.unwrap();
        let total = store.append_chunk(uuid, &[1u8; 5 * 1024 * 1024]).await.unwrap();
        assert_eq!(total, 10 * 1024 * 1024);

        let mut expected = vec![0u8; 5 * 1024 * 1024];
        expected.extend(vec![1u8; 5 * 1024 * 1024]);
        let digest = Digest::of(&expected);

        store.finish_upload(uuid, &digest).await.unwrap();
        let path = store.get_blob_path(&digest).await.unwrap();
        let on_disk = tokio::fs::read(path).await.unwrap();
        assert_eq!(on_disk, expected);
    }

    #[tokio::test]
    async fn digest_mismatch_is_rejected_and_blob_absent() {
        let (_dir, store) = new_store().await;
        let uuid = store.start_upload("app").await.unwrap();
        store.append_chunk(uuid, b"hello").await.unwrap();

        let wrong = Digest::of(b"not hello");
        let err = store.finish_upload(uuid, &wrong).await.unwrap_err();
        assert_eq!(err.kind().code(), "DIGEST_INVALID");

        let err = store.get_blob_path(&wrong).await.unwrap_err();
        assert_eq!(err.kind().code(), "BLOB_UNKNOWN");
    }

    #[tokio::test]
    async fn append_to_unknown_upload_fails() {
        let (_dir, store) = new_store().await;
        let err = store
            .append_chunk(Uuid::new_v4(), b"hi")
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "UPLOAD_UNKNOWN");
    }

    #[tokio::test]
    async fn manifest_put_get_round_trip() {
        let (_dir, store) = new_store().await;
        let manifest = Manifest {
            name: "app".to_string(),
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            bytes: br#"{"schemaVersion":2}"#.to_vec(),
        };
        let reference = Reference::Tag("latest".to_string());

        let digest = store
            .put_manifest("app", &reference, manifest.clone())
            .await
            .unwrap();
        assert_eq!(digest, manifest.digest());

        let (bytes, media_type) = store.get_manifest("app", &reference).await.unwrap();
        assert_eq!(bytes, manifest.bytes);
        assert_eq!(media_type, manifest.media_type);
    }

    #[tokio::test]
    async fn manifest_exceeding_size_limit_is_rejected() {
        let (_dir, store) = new_store().await;
        let manifest = Manifest {
            name: "app".to_string(),
            media_type: "application/json".to_string(),
            bytes: vec![0u8; (MAX_MANIFEST_BYTES + 1) as usize],
        };
        let err = store
            .put_manifest("app", &Reference::Tag("latest".into()), manifest)
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "SIZE_INVALID");
    }

    #[tokio::test]
    async fn list_tags_is_lexicographic() {
        let (_dir, store) = new_store().await;
        for tag in ["zeta", "alpha", "mid"] {
            let manifest = Manifest {
                name: "app".to_string(),
                media_type: "application/json".to_string(),
                bytes: format!("{{\"tag\":\"{tag}\"}}").into_bytes(),
            };
            store
                .put_manifest("app", &Reference::Tag(tag.to_string()), manifest)
                .await
                .unwrap();
        }
        assert_eq!(store.list_tags("app").await.unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn list_repositories_finds_multi_segment_names() {
        let (_dir, store) = new_store().await;
        for name in ["app", "myorg/app", "myorg/sub/app"] {
            let manifest = Manifest {
                name: name.to_string(),
                media_type: "application/json".to_string(),
                bytes: b"{}".to_vec(),
            };
            store
                .put_manifest(name, &Reference::Tag("latest".into()), manifest)
                .await
                .unwrap();
        }
        assert_eq!(
            store.list_repositories().await.unwrap(),
            vec!["app", "myorg/app", "myorg/sub/app"]
        );
    }

    #[tokio::test]
    async fn prune_repository_tags_keeps_latest_and_k_most_recent() {
        let (_dir, store) = new_store().await;
        for tag in ["v1", "v2", "v3", "latest"] {
            let manifest = Manifest {
                name: "app".to_string(),
                media_type: "application/json".to_string(),
                bytes: format!("{{\"tag\":\"{tag}\"}}").into_bytes(),
            };
            store
                .put_manifest("app", &Reference::Tag(tag.to_string()), manifest)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let removed = store.prune_repository_tags("app", 1).await.unwrap();
        assert_eq!(removed, vec!["v1".to_string(), "v2".to_string()]);

        let mut remaining = store.list_tags("app").await.unwrap();
        remaining.sort();
        assert_eq!(remaining, vec!["latest".to_string(), "v3".to_string()]);
    }

    #[tokio::test]
    async fn prune_repository_tags_on_bare_repository_is_untouched() {
        let (_dir, store) = new_store().await;
        let manifest = Manifest {
            name: "app".to_string(),
            media_type: "application/json".to_string(),
            bytes: b"{}".to_vec(),
        };
        store
            .put_manifest("app", &Reference::Tag("latest".into()), manifest)
            .await
            .unwrap();

        let removed = store.prune_repository_tags("app", 5).await.unwrap();
        assert!(removed.is_empty());
        assert_eq!(store.list_tags("app").await.unwrap(), vec!["latest".to_string()]);
    }

    #[tokio::test]
    async fn prune_all_repositories_sums_removed_tags_across_repos() {
        let (_dir, store) = new_store().await;
        for repo in ["app", "myorg/app"] {
            for tag in ["v1", "v2", "latest"] {
                let manifest = Manifest {
                    name: repo.to_string(),
                    media_type: "application/json".to_string(),
                    bytes: format!("{{\"tag\":\"{tag}\"}}").into_bytes(),
                };
                store
                    .put_manifest(repo, &Reference::Tag(tag.to_string()), manifest)
                    .await
                    .unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }

        let total = store.prune_all_repositories(0).await.unwrap();
        assert_eq!(total, 4);
    }

    #[test]
    fn rejects_invalid_repository_names() {
        assert!(validate_repository_name("App").is_err());
        assert!(validate_repository_name("").is_err());
        assert!(validate_repository_name("a/b/c_d-e.f").is_ok());
    }
}
