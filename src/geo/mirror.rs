use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::types::{Project, RepoKind};

/// Brings a local copy of a project repository up to date with the primary.
#[async_trait]
pub trait RepositoryMirror: Send + Sync {
    async fn fetch(&self, primary_url: &str, project: &Project, kind: RepoKind) -> Result<()>;
}

/// Mirrors with `git fetch` into bare repositories on the configured storages.
pub struct GitMirror {
    storages: BTreeMap<String, PathBuf>,
    timeout: Duration,
}

impl GitMirror {
    pub fn new(storages: BTreeMap<String, PathBuf>, timeout: Duration) -> Self {
        Self { storages, timeout }
    }

    pub fn local_path(&self, project: &Project, kind: RepoKind) -> Result<PathBuf> {
        let root = self.storages.get(&project.repository_storage).ok_or_else(|| {
            Error::Mirror(format!(
                "unknown repository storage: {}",
                project.repository_storage
            ))
        })?;
        Ok(root.join(format!("{}{}", project.disk_path, kind.path_suffix())))
    }

    async fn mirror(&self, primary_url: &str, project: &Project, kind: RepoKind) -> Result<()> {
        let path = self.local_path(project, kind)?;
        let url = remote_url(primary_url, project, kind);

        if !path.join("HEAD").exists() {
            init_bare_repo(&path).await?;
        }

        let mut cmd = Command::new("git");
        cmd.arg("--git-dir")
            .arg(&path)
            .args(["fetch", "--prune", "--quiet"])
            .arg(&url)
            .arg("+refs/*:refs/*")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout(format!("fetch of {url} exceeded {:?}", self.timeout)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Mirror(format!("git fetch {url}: {}", stderr.trim())));
        }

        Ok(())
    }
}

#[async_trait]
impl RepositoryMirror for GitMirror {
    async fn fetch(&self, primary_url: &str, project: &Project, kind: RepoKind) -> Result<()> {
        self.mirror(primary_url, project, kind).await
    }
}

fn remote_url(primary_url: &str, project: &Project, kind: RepoKind) -> String {
    format!(
        "{}/{}{}",
        primary_url.trim_end_matches('/'),
        project.disk_path,
        kind.path_suffix()
    )
}

async fn init_bare_repo(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let output = Command::new("git")
        .args(["init", "--bare", "--quiet"])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Mirror(format!(
            "git init {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn project(storage: &str) -> Project {
        Project {
            id: 7,
            namespace_id: 1,
            name: "gitlab".to_string(),
            disk_path: "group/gitlab".to_string(),
            repository_storage: storage.to_string(),
            wiki_enabled: true,
            last_repository_updated_at: None,
            last_wiki_updated_at: None,
            repository_size_bytes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_remote_url() {
        assert_eq!(
            remote_url("https://primary.example.com/", &project("default"), RepoKind::Wiki),
            "https://primary.example.com/group/gitlab.wiki.git"
        );
        assert_eq!(
            remote_url("http://primary:8080", &project("default"), RepoKind::Repository),
            "http://primary:8080/group/gitlab.git"
        );
    }

    #[test]
    fn test_local_path_per_storage() {
        let mut storages = BTreeMap::new();
        storages.insert("default".to_string(), PathBuf::from("/srv/repos"));
        let mirror = GitMirror::new(storages, Duration::from_secs(10));

        assert_eq!(
            mirror.local_path(&project("default"), RepoKind::Repository).unwrap(),
            PathBuf::from("/srv/repos/group/gitlab.git")
        );
        assert!(matches!(
            mirror.local_path(&project("broken"), RepoKind::Repository),
            Err(Error::Mirror(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_storage_fails_without_running_git() {
        let mirror = GitMirror::new(BTreeMap::new(), Duration::from_secs(10));
        let result = mirror
            .fetch("http://primary/", &project("default"), RepoKind::Repository)
            .await;
        assert!(matches!(result, Err(Error::Mirror(_))));
    }
}
