//! Site executor: the process that owns nginx's configuration directories.
//!
//! Runs inside `berthd proxy-agent`, next to nginx. Every operation is
//! exposed over the RPC channel by [`SiteExecutor::register`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use berth_core::ProxyConfig;
use berth_rpc::{EventSink, RpcError, RpcResult, RpcServer};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::access_log::{LogTail, NginxAccessLog};
use crate::error::{ProxyError, ProxyResult};
use crate::protocol::*;

#[derive(Debug, Clone)]
pub struct SiteExecutor {
    sites_available: PathBuf,
    sites_enabled: PathBuf,
    access_log: PathBuf,
    nginx_bin: String,
    restart_command: Vec<String>,
}

impl SiteExecutor {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            sites_available: config.sites_available.clone(),
            sites_enabled: config.sites_enabled.clone(),
            access_log: config.access_log.clone(),
            nginx_bin: config.nginx_bin.clone(),
            restart_command: config.restart_command.clone(),
        }
    }

    fn available_path(&self, filename: &str) -> ProxyResult<PathBuf> {
        validate_filename(filename)?;
        Ok(self.sites_available.join(filename))
    }

    fn enabled_path(&self, filename: &str) -> ProxyResult<PathBuf> {
        validate_filename(filename)?;
        Ok(self.sites_enabled.join(filename))
    }

    // ── Site files ─────────────────────────────────────────────────

    /// Every regular file under `sites-available`, sorted by name.
    pub async fn list_sites(&self) -> ProxyResult<Vec<SiteFile>> {
        let mut entries = tokio::fs::read_dir(&self.sites_available).await?;
        let mut sites = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            if filename.starts_with('.') {
                continue;
            }
            let content = tokio::fs::read_to_string(entry.path()).await?;
            sites.push(SiteFile { filename, content });
        }
        sites.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(sites)
    }

    pub async fn read_site(&self, filename: &str) -> ProxyResult<String> {
        let path = self.available_path(filename)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProxyError::SiteNotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a site file. Written to a temporary sibling first and renamed
    /// into place, so nginx never reads a half-written file.
    pub async fn write_site(&self, filename: &str, content: &str) -> ProxyResult<()> {
        let path = self.available_path(filename)?;
        let tmp = self.sites_available.join(format!(".{filename}.tmp"));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        info!(filename, bytes = content.len(), "site written");
        Ok(())
    }

    pub async fn site_available_exists(&self, filename: &str) -> ProxyResult<bool> {
        let path = self.available_path(filename)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    pub async fn site_enabled_exists(&self, filename: &str) -> ProxyResult<bool> {
        let path = self.enabled_path(filename)?;
        Ok(tokio::fs::symlink_metadata(&path).await.is_ok())
    }

    /// Enable a site by linking it into `sites-enabled`. Re-enabling an
    /// already enabled site replaces the link.
    pub async fn deploy_site(&self, filename: &str) -> ProxyResult<()> {
        let source = self.available_path(filename)?;
        let link = self.enabled_path(filename)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(ProxyError::SiteNotFound(filename.to_string()));
        }
        if tokio::fs::symlink_metadata(&link).await.is_ok() {
            tokio::fs::remove_file(&link).await?;
        }
        tokio::fs::symlink(&source, &link).await?;
        info!(filename, "site enabled");
        Ok(())
    }

    // ── nginx ──────────────────────────────────────────────────────

    /// `nginx -t`. A failing test is reported in the result.
    pub async fn test_config(&self) -> ProxyResult<ConfigTest> {
        let output = Command::new(&self.nginx_bin).arg("-t").output().await?;
        let result = ConfigTest {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.ok {
            warn!(stderr = %result.stderr, "nginx config test failed");
        }
        Ok(result)
    }

    pub async fn reload(&self) -> ProxyResult<()> {
        let args = vec!["-s".to_string(), "reload".to_string()];
        run(&self.nginx_bin, &args).await?;
        info!("nginx reloaded");
        Ok(())
    }

    pub async fn restart(&self) -> ProxyResult<()> {
        let (program, args) = self
            .restart_command
            .split_first()
            .ok_or_else(|| ProxyError::Command {
                command: String::new(),
                stderr: "restart command is empty".to_string(),
            })?;
        run(program, args).await?;
        info!("nginx restarted");
        Ok(())
    }

    // ── RPC surface ────────────────────────────────────────────────

    /// Register every executor operation on `server`.
    pub fn register(self: Arc<Self>, server: RpcServer) -> RpcServer {
        let list = Arc::clone(&self);
        let read = Arc::clone(&self);
        let write = Arc::clone(&self);
        let available = Arc::clone(&self);
        let enabled = Arc::clone(&self);
        let deploy = Arc::clone(&self);
        let test = Arc::clone(&self);
        let reload = Arc::clone(&self);
        let restart = Arc::clone(&self);
        let monitor = self;

        server
            .call(OP_SITES_AVAILABLE, move |_: serde_json::Value| {
                let exec = Arc::clone(&list);
                async move { exec.list_sites().await.map_err(RpcError::from) }
            })
            .call(OP_READ_SITE, move |filename: String| {
                let exec = Arc::clone(&read);
                async move { exec.read_site(&filename).await.map_err(RpcError::from) }
            })
            .call(OP_WRITE_SITE, move |site: SiteFile| {
                let exec = Arc::clone(&write);
                async move { exec.write_site(&site.filename, &site.content).await.map_err(RpcError::from) }
            })
            .call(OP_SITE_AVAILABLE_EXISTS, move |filename: String| {
                let exec = Arc::clone(&available);
                async move { exec.site_available_exists(&filename).await.map_err(RpcError::from) }
            })
            .call(OP_SITE_ENABLED_EXISTS, move |filename: String| {
                let exec = Arc::clone(&enabled);
                async move { exec.site_enabled_exists(&filename).await.map_err(RpcError::from) }
            })
            .call(OP_DEPLOY_SITE, move |filename: String| {
                let exec = Arc::clone(&deploy);
                async move { exec.deploy_site(&filename).await.map_err(RpcError::from) }
            })
            .call(OP_TEST, move |_: serde_json::Value| {
                let exec = Arc::clone(&test);
                async move { exec.test_config().await.map_err(RpcError::from) }
            })
            .call(OP_RELOAD, move |_: serde_json::Value| {
                let exec = Arc::clone(&reload);
                async move { exec.reload().await.map_err(RpcError::from) }
            })
            .call(OP_RESTART, move |_: serde_json::Value| {
                let exec = Arc::clone(&restart);
                async move { exec.restart().await.map_err(RpcError::from) }
            })
            .stream(CHANNEL_ACCESS_LOG, move |_: serde_json::Value, sink: EventSink| {
                let path = monitor.access_log.clone();
                async move { stream_access_log(&path, sink).await }
            })
    }
}

/// Push parsed access-log lines until the subscriber goes away. Lines that
/// are not in combined format and read failures go to the error side
/// channel.
async fn stream_access_log(path: &Path, sink: EventSink) {
    let mut tail = match LogTail::open(path).await {
        Ok(tail) => tail,
        Err(e) => {
            let _ = sink.error(format!("cannot open {}: {e}", path.display()));
            return;
        }
    };
    debug!(path = %path.display(), "access log subscription started");

    loop {
        let sent: RpcResult<()> = match tail.next_line().await {
            Ok(line) => match NginxAccessLog::parse(&line) {
                Some(entry) => sink.send(&entry),
                None => sink.error(format!("unparsed access log line: {line}")),
            },
            Err(e) => {
                let _ = sink.error(format!("access log read failed: {e}"));
                return;
            }
        };
        if sent.is_err() {
            debug!("access log subscriber gone");
            return;
        }
    }
}

/// Reject names that could escape the sites directories.
pub fn validate_filename(filename: &str) -> ProxyResult<()> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename.contains("..")
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0');
    if invalid {
        return Err(ProxyError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

async fn run(program: &str, args: &[String]) -> ProxyResult<()> {
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(ProxyError::Command {
            command: std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(dir: &Path) -> SiteExecutor {
        let available = dir.join("sites-available");
        let enabled = dir.join("sites-enabled");
        std::fs::create_dir_all(&available).unwrap();
        std::fs::create_dir_all(&enabled).unwrap();
        SiteExecutor::new(&ProxyConfig {
            sites_available: available,
            sites_enabled: enabled,
            access_log: dir.join("access.log"),
            nginx_bin: "true".to_string(),
            restart_command: vec!["true".to_string()],
            ..ProxyConfig::default()
        })
    }

    #[tokio::test]
    async fn write_then_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        exec.write_site("shop_main", "server {}\n").await.unwrap();
        exec.write_site("blog_main", "server { listen 81; }\n").await.unwrap();

        assert_eq!(exec.read_site("shop_main").await.unwrap(), "server {}\n");
        let sites = exec.list_sites().await.unwrap();
        let names: Vec<_> = sites.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["blog_main", "shop_main"]);
    }

    #[tokio::test]
    async fn overwrite_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        exec.write_site("a", "one").await.unwrap();
        exec.write_site("a", "two").await.unwrap();
        assert_eq!(exec.read_site("a").await.unwrap(), "two");
        let count = std::fs::read_dir(dir.path().join("sites-available"))
            .unwrap()
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn read_missing_site() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let err = exec.read_site("ghost").await.unwrap_err();
        assert!(matches!(err, ProxyError::SiteNotFound(_)));
    }

    #[tokio::test]
    async fn deploy_creates_enabled_link() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        exec.write_site("shop_main", "server {}\n").await.unwrap();
        assert!(exec.site_available_exists("shop_main").await.unwrap());
        assert!(!exec.site_enabled_exists("shop_main").await.unwrap());

        exec.deploy_site("shop_main").await.unwrap();
        assert!(exec.site_enabled_exists("shop_main").await.unwrap());
        let link = dir.path().join("sites-enabled/shop_main");
        assert_eq!(std::fs::read_to_string(&link).unwrap(), "server {}\n");

        // Second deploy replaces the link instead of failing.
        exec.deploy_site("shop_main").await.unwrap();
    }

    #[tokio::test]
    async fn deploy_unknown_site_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let err = exec.deploy_site("ghost").await.unwrap_err();
        assert!(matches!(err, ProxyError::SiteNotFound(_)));
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        for name in ["../etc/passwd", "a/b", "..", "", "x\\y"] {
            let err = exec.write_site(name, "x").await.unwrap_err();
            assert!(matches!(err, ProxyError::InvalidFilename(_)), "{name:?}");
        }
        assert!(exec.read_site("../sites-enabled/x").await.is_err());
        assert!(exec.deploy_site("../../x").await.is_err());
    }

    #[tokio::test]
    async fn config_test_reports_failure_as_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        assert!(exec.test_config().await.unwrap().ok);

        exec.nginx_bin = "false".to_string();
        let result = exec.test_config().await.unwrap();
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn reload_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        exec.reload().await.unwrap();
        exec.restart().await.unwrap();

        exec.nginx_bin = "false".to_string();
        let err = exec.reload().await.unwrap_err();
        assert!(matches!(err, ProxyError::Command { .. }));

        exec.restart_command.clear();
        assert!(exec.restart().await.is_err());
    }
}
