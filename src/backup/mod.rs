//! Backup job runner: detects a database kind from an attachment's image
//! reference and shells a dump command into the running container via
//! [`ContainerEngine::exec`]. Grounded on spec §3's `BackupJob`/`DBInfo`
//! record and `backups.{dir,keep}` (§6), using the same write-then-list
//! file-record pattern as [`crate::secrets::FileSecretsBackend`].

use std::{path::PathBuf, sync::Arc, time::SystemTime};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{config::AttachmentConfig, engine::ContainerEngine, error::GordonResult};

/// A database family a backup command is known for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Postgres,
    MySql,
    Redis,
}

impl DbKind {
    /// Classifies an attachment image reference by its repository name.
    pub fn detect(image: &str) -> Option<DbKind> {
        let repo = image.split(':').next().unwrap_or(image);
        let repo = repo.rsplit('/').next().unwrap_or(repo);
        match repo {
            "postgres" | "postgis" => Some(DbKind::Postgres),
            "mysql" | "mariadb" => Some(DbKind::MySql),
            "redis" => Some(DbKind::Redis),
            _ => None,
        }
    }

    fn dump_command(self, db_name: &str) -> Vec<String> {
        match self {
            DbKind::Postgres => vec![
                "pg_dump".to_string(),
                "-U".to_string(),
                "postgres".to_string(),
                db_name.to_string(),
            ],
            DbKind::MySql => vec![
                "mysqldump".to_string(),
                "-u".to_string(),
                "root".to_string(),
                db_name.to_string(),
            ],
            DbKind::Redis => vec![
                "redis-cli".to_string(),
                "--rdb".to_string(),
                "/data/dump.rdb".to_string(),
            ],
        }
    }
}

/// Lifecycle state of a [`BackupJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A single backup attempt's record, as listed by `GET /admin/backups/{d}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub domain: String,
    pub db_name: String,
    pub status: BackupStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub file_path: Option<String>,
}

/// Runs and lists backup jobs under `<data_dir>/<backups.dir>/<domain>/`.
pub struct BackupService {
    engine: Arc<dyn ContainerEngine>,
    root: PathBuf,
    keep: u32,
}

impl BackupService {
    /// Builds a backup service rooted at `data_dir/backups_dir` (or
    /// `data_dir/backups` when `backups_dir` is empty).
    pub fn new(engine: Arc<dyn ContainerEngine>, data_dir: impl Into<PathBuf>, backups_dir: &str, keep: u32) -> Self {
        let data_dir = data_dir.into();
        let root = if backups_dir.is_empty() {
            data_dir.join("backups")
        } else {
            data_dir.join(backups_dir)
        };
        BackupService { engine, root, keep }
    }

    /// Lists recorded jobs for `domain`, oldest first.
    pub async fn list(&self, domain: &str) -> GordonResult<Vec<BackupJob>> {
        let dir = self.root.join(domain);
        let mut jobs = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(jobs),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(raw) = fs::read(entry.path()).await {
                if let Ok(job) = serde_json::from_slice::<BackupJob>(&raw) {
                    jobs.push(job);
                }
            }
        }
        jobs.sort_by_key(|j| j.started_at);
        Ok(jobs)
    }

    /// Runs a backup of `container_id` (an attachment container for
    /// `domain`), recording and returning the resulting job. An
    /// unrecognized database image produces a `Failed` job rather than an
    /// error — the backup surface degrades per-job, not per-request.
    pub async fn run(&self, domain: &str, attachment: &AttachmentConfig, container_id: &str) -> GordonResult<BackupJob> {
        let started_at = now_unix();

        let Some(kind) = DbKind::detect(&attachment.image) else {
            let job = BackupJob {
                domain: domain.to_string(),
                db_name: domain.to_string(),
                status: BackupStatus::Failed,
                started_at,
                finished_at: Some(started_at),
                file_path: None,
            };
            self.persist(domain, &job).await?;
            return Ok(job);
        };

        let dump = self.engine.exec(container_id, kind.dump_command(domain)).await;

        let dir = self.root.join(domain);
        fs::create_dir_all(&dir).await?;
        let file_path = dir.join(format!("{started_at}.dump"));

        let job = match dump {
            Ok(bytes) => {
                fs::write(&file_path, &bytes).await?;
                BackupJob {
                    domain: domain.to_string(),
                    db_name: domain.to_string(),
                    status: BackupStatus::Completed,
                    started_at,
                    finished_at: Some(now_unix()),
                    file_path: Some(file_path.to_string_lossy().into_owned()),
                }
            }
            Err(_) => BackupJob {
                domain: domain.to_string(),
                db_name: domain.to_string(),
                status: BackupStatus::Failed,
                started_at,
                finished_at: Some(now_unix()),
                file_path: None,
            },
        };

        self.persist(domain, &job).await?;
        self.enforce_retention(domain).await?;
        Ok(job)
    }

    async fn persist(&self, domain: &str, job: &BackupJob) -> GordonResult<()> {
        let dir = self.root.join(domain);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", job.started_at));
        fs::write(&path, serde_json::to_vec_pretty(job)?).await?;
        Ok(())
    }

    async fn enforce_retention(&self, domain: &str) -> GordonResult<()> {
        if self.keep == 0 {
            return Ok(());
        }
        let jobs = self.list(domain).await?;
        let dir = self.root.join(domain);
        let excess = jobs.len().saturating_sub(self.keep as usize);
        for job in jobs.into_iter().take(excess) {
            if let Some(path) = &job.file_path {
                fs::remove_file(path).await.ok();
            }
            fs::remove_file(dir.join(format!("{}.json", job.started_at))).await.ok();
        }
        Ok(())
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use tempfile::tempdir;

    fn attachment(image: &str) -> AttachmentConfig {
        AttachmentConfig {
            target: "app.example.com".to_string(),
            image: image.to_string(),
            network: "gordon-app".to_string(),
        }
    }

    #[test]
    fn detects_known_database_images() {
        assert_eq!(DbKind::detect("postgres:16"), Some(DbKind::Postgres));
        assert_eq!(DbKind::detect("reg.example.com/mariadb:10"), Some(DbKind::MySql));
        assert_eq!(DbKind::detect("redis:7-alpine"), Some(DbKind::Redis));
        assert_eq!(DbKind::detect("nginx:latest"), None);
    }

    #[tokio::test]
    async fn run_writes_completed_job_and_dump_file() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let service = BackupService::new(engine, dir.path(), "", 10);

        let job = service.run("app.example.com", &attachment("postgres:16"), "container-1").await.unwrap();

        assert_eq!(job.status, BackupStatus::Completed);
        let file_path = job.file_path.unwrap();
        let contents = tokio::fs::read(&file_path).await.unwrap();
        assert_eq!(contents, b"fake-dump-output");
    }

    #[tokio::test]
    async fn unrecognized_image_produces_failed_job() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let service = BackupService::new(engine, dir.path(), "", 10);

        let job = service.run("app.example.com", &attachment("nginx:latest"), "container-1").await.unwrap();
        assert_eq!(job.status, BackupStatus::Failed);
        assert!(job.file_path.is_none());
    }

    #[tokio::test]
    async fn retention_keeps_only_the_newest_jobs() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let service = BackupService::new(engine, dir.path(), "", 2);

        for _ in 0..4 {
            service.run("app.example.com", &attachment("postgres:16"), "container-1").await.unwrap();
        }

        let jobs = service.list("app.example.com").await.unwrap();
        assert!(jobs.len() <= 2);
    }
}
