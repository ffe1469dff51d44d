use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rbvault_types::{ImageId, SnapshotName};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::driver::{DiffStream, StorageDriver};

/// The one concrete [`StorageDriver`] this crate ships: shells out to
/// the `rbd`/`ceph` CLI tools via `tokio::process::Command`, the way
/// the teacher wraps external tooling in `src/auth.rs`. The Ceph wire
/// protocol itself stays out of scope (spec.md §1); this exists only
/// so the rest of the pipeline has a real driver to run against.
///
/// One instance is constructed per cluster (live or backup); `monhost`
/// carries the `-m` monitor address for a remote cluster, `None` for
/// the local one.
pub struct RbdDriver {
    pool: String,
    monhost: Option<String>,
}

impl RbdDriver {
    pub fn new(pool: impl Into<String>, monhost: Option<String>) -> Self {
        Self {
            pool: pool.into(),
            monhost,
        }
    }

    /// Proxmox VE disks already carry their storage (pool) name as the
    /// first path component of `image` (see `ProxmoxAdapter::parse_disks`),
    /// so a driver constructed with an empty `pool` (one per proxmox
    /// live cluster) must not prepend a second one.
    fn spec(&self, image: &ImageId) -> String {
        if self.pool.is_empty() {
            image.as_str().to_owned()
        } else {
            format!("{}/{}", self.pool, image.as_str())
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let program = args[0];
        let mut cmd = Command::new(program);
        cmd.args(&args[1..]);
        if let Some(host) = &self.monhost {
            cmd.arg("-m").arg(host);
        }
        cmd
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T> {
        let output = self
            .command(args)
            .output()
            .await
            .with_context(|| format!("spawning {args:?}"))?;
        if !output.status.success() {
            bail!(
                "{args:?} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing json output of {args:?}"))
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let output = self
            .command(args)
            .output()
            .await
            .with_context(|| format!("spawning {args:?}"))?;
        if !output.status.success() {
            bail!(
                "{args:?} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RbdSnapEntry {
    name: String,
}

#[async_trait]
impl StorageDriver for RbdDriver {
    async fn list_images(&self, pool: &str) -> Result<Vec<ImageId>> {
        let names: Vec<String> = self
            .run_json(&["rbd", "ls", "--format", "json", "-p", pool])
            .await?;
        Ok(names.into_iter().map(ImageId::new).collect())
    }

    async fn snapshots(&self, image: &ImageId) -> Result<Vec<String>> {
        let spec = self.spec(image);
        let entries: Vec<RbdSnapEntry> = self
            .run_json(&["rbd", "snap", "ls", "--format", "json", &spec])
            .await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    async fn checksum(&self, image: &ImageId, snap: &str) -> Result<String> {
        // SHA-256 over the full export-diff content, pinned as the
        // checksum algorithm for every driver implementation in this
        // crate (spec.md §9 open question, resolved in SPEC_FULL.md §4.10).
        let mut stream = self.export_diff(image, None, snap).await?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = stream.read(&mut buf).await.context("reading export-diff stream for checksum")?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    async fn make_snap(&self, image: &ImageId, name: &SnapshotName) -> Result<()> {
        let spec = format!("{}@{}", self.spec(image), name);
        self.run(&["rbd", "snap", "create", &spec]).await
    }

    async fn rm_snap(&self, image: &ImageId, name: &str) -> Result<()> {
        let spec = format!("{}@{}", self.spec(image), name);
        self.run(&["rbd", "snap", "rm", &spec]).await
    }

    async fn rm_image(&self, image: &ImageId) -> Result<()> {
        let spec = self.spec(image);
        self.run(&["rbd", "rm", &spec]).await
    }

    async fn export_diff(
        &self,
        image: &ImageId,
        from: Option<&str>,
        to: &str,
    ) -> Result<DiffStream> {
        let spec = format!("{}@{}", self.spec(image), to);
        let mut cmd = self.command(&["rbd", "export-diff"]);
        if let Some(from) = from {
            cmd.arg("--from-snap").arg(from);
        }
        cmd.arg(&spec).arg("-");
        cmd.stdout(std::process::Stdio::piped());

        let mut child = cmd.spawn().with_context(|| format!("spawning rbd export-diff for {spec}"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("rbd export-diff did not provide a stdout pipe"))?;

        // The child is detached here: its stdout is consumed by the
        // caller as an AsyncRead, and reaching EOF on a piped stdout
        // only happens once the process itself exits, so we do not
        // need to join on its exit status separately.
        Ok(Box::new(stdout))
    }

    async fn import_diff(&self, dest_image: &ImageId, mut stream: DiffStream) -> Result<()> {
        let spec = self.spec(dest_image);
        let mut cmd = self.command(&["rbd", "import-diff", "-"]);
        cmd.arg(&spec);
        cmd.stdin(std::process::Stdio::piped());

        let mut child = cmd.spawn().with_context(|| format!("spawning rbd import-diff for {spec}"))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("rbd import-diff did not provide a stdin pipe"))?;

        tokio::io::copy(&mut stream, &mut stdin)
            .await
            .with_context(|| format!("piping diff stream into rbd import-diff for {spec}"))?;
        stdin.shutdown().await.ok();
        drop(stdin);

        let status = child.wait().await.context("waiting for rbd import-diff")?;
        if !status.success() {
            bail!("rbd import-diff into {spec} exited with {status}");
        }
        Ok(())
    }

    async fn exists(&self, image: &ImageId) -> Result<bool> {
        let spec = self.spec(image);
        let status = self
            .command(&["rbd", "info", "--format", "json"])
            .arg(&spec)
            .status()
            .await
            .with_context(|| format!("spawning rbd info for {spec}"))?;
        Ok(status.success())
    }
}
