//! Server lifecycle: detection, install, model pulls, and update checks

use futures::StreamExt;
use serde::Deserialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{
    error::{Error, Result},
    platform,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Where to ask for the latest released server version
const LATEST_RELEASE_URL: &str = "https://api.github.com/repos/ollama/ollama/releases/latest";

/// Result of probing for the local inference server
#[derive(Debug, Clone, Default)]
pub struct ServerStatus {
    pub installed: bool,
    pub running: bool,
    pub path: Option<PathBuf>,
}

/// Result of an update check. Never constructed by a failing path; network
/// trouble reads as "no update known".
#[derive(Debug, Clone, Default)]
pub struct UpdateCheck {
    pub installed: Option<String>,
    pub latest: Option<String>,
    pub update_available: bool,
}

/// Manages the local inference server's lifecycle over its HTTP surface
/// and the host filesystem.
pub struct Lifecycle {
    client: reqwest::Client,
    base_url: String,
}

impl Lifecycle {
    /// Create a lifecycle manager for the server at the given URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Detect whether the server is installed and/or running.
    ///
    /// Checks, in order: a bundled binary, well-known install locations, a
    /// PATH lookup, and finally a live HTTP probe. A successful probe
    /// implies the server is installed even when no binary was found.
    pub async fn detect(&self) -> ServerStatus {
        let mut status = ServerStatus::default();

        if let Some(bundled) = platform::bundled_server_path() {
            if bundled.is_file() {
                status.installed = true;
                status.path = Some(bundled);
            }
        }

        if !status.installed {
            for location in platform::install_locations() {
                if location.is_file() {
                    status.installed = true;
                    status.path = Some(location);
                    break;
                }
            }
        }

        if !status.installed {
            if let Some(found) = lookup_on_path().await {
                status.installed = true;
                status.path = Some(found);
            }
        }

        status.running = self.probe().await;
        if status.running {
            status.installed = true;
        }

        status
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Query GPU memory capacity in MB via the vendor diagnostic tool.
    /// Returns 0 on any failure: no GPU, tool missing, or garbage output.
    pub async fn system_memory_mb() -> u32 {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .and_then(|line| line.trim().parse::<u32>().ok())
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Download the server installer into the staging directory, reporting
    /// progress as a rounded percentage when the size is known.
    pub async fn download_server<F>(&self, mut on_progress: F) -> Result<PathBuf>
    where
        F: FnMut(u8) + Send,
    {
        let staging = platform::staging_dir();
        tokio::fs::create_dir_all(&staging).await?;

        let dest = staging.join(format!("ollama-installer{}", platform::installer_suffix()));
        let resp = self.client.get(platform::installer_url()).send().await?;
        if !resp.status().is_success() {
            return Err(Error::api(
                resp.status().as_u16(),
                "installer download failed",
            ));
        }

        let total = resp.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(&dest).await?;
        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if total > 0 {
                on_progress(rounded_percent(written, total));
            }
        }
        file.flush().await?;

        Ok(dest)
    }

    /// Run a downloaded installer. The path must live inside the staging
    /// directory and carry the platform installer suffix; anything else is
    /// refused with an access-denied error before execution.
    pub async fn install(&self, installer: &Path) -> Result<()> {
        validate_installer(installer, &platform::staging_dir(), platform::installer_suffix())?;

        let status = Command::new(installer).status().await?;
        if !status.success() {
            return Err(Error::UnexpectedResponse(format!(
                "installer exited with {}",
                status
            )));
        }
        Ok(())
    }

    /// Start the server detached, with its output discarded
    pub async fn start_server(&self, binary: &Path) -> Result<()> {
        Command::new(binary)
            .arg("serve")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }

    /// Pull a model, streaming newline-delimited progress records.
    /// The callback receives a rounded percentage. A record carrying an
    /// error field aborts the pull.
    pub async fn pull_model<F>(&self, name: &str, mut on_progress: F) -> Result<()>
    where
        F: FnMut(u8) + Send,
    {
        let url = format!("{}/api/pull", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "name": name, "stream": true }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::api(status, body));
        }

        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buf.extend_from_slice(&chunk);

            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                handle_pull_record(line.trim(), &mut on_progress)?;
            }
        }

        if !buf.is_empty() {
            let line = String::from_utf8_lossy(&buf).to_string();
            handle_pull_record(line.trim(), &mut on_progress)?;
        }

        Ok(())
    }

    /// Remove a model from the local server
    pub async fn delete_model(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/delete", self.base_url);
        let resp = self
            .client
            .delete(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::api(status, body));
        }
        Ok(())
    }

    /// Get the running server's version string
    pub async fn installed_version(&self) -> Result<String> {
        let url = format!("{}/api/version", self.base_url);
        let resp = self.client.get(&url).timeout(PROBE_TIMEOUT).send().await?;
        if !resp.status().is_success() {
            return Err(Error::api(resp.status().as_u16(), "version query failed"));
        }
        let version: VersionResponse = resp.json().await?;
        Ok(version.version)
    }

    /// Compare the installed server version against the latest release.
    /// Network failure on either side degrades to "no update known"; this
    /// never errors.
    pub async fn check_for_update(&self) -> UpdateCheck {
        let installed = self.installed_version().await.ok();

        let latest = match self
            .client
            .get(LATEST_RELEASE_URL)
            .header("User-Agent", "wyrm")
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp
                .json::<LatestRelease>()
                .await
                .ok()
                .map(|r| r.tag_name.trim_start_matches('v').to_string()),
            _ => None,
        };

        let update_available = match (&installed, &latest) {
            (Some(current), Some(remote)) => {
                compare_versions(remote, current) == Ordering::Greater
            }
            _ => false,
        };

        UpdateCheck {
            installed,
            latest,
            update_available,
        }
    }
}

async fn lookup_on_path() -> Option<PathBuf> {
    let output = Command::new(platform::path_lookup_command())
        .arg(platform::server_binary_name())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|line| PathBuf::from(line.trim()))
}

/// Reject installer paths outside the staging dir or with the wrong suffix.
fn validate_installer(installer: &Path, staging: &Path, suffix: &str) -> Result<()> {
    let canonical = installer
        .canonicalize()
        .map_err(|_| Error::AccessDenied("installer not found".into()))?;

    let staging = staging
        .canonicalize()
        .map_err(|_| Error::AccessDenied("staging directory missing".into()))?;

    if !canonical.starts_with(&staging) {
        return Err(Error::AccessDenied(
            "installer outside staging directory".into(),
        ));
    }

    let name = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !name.ends_with(suffix) {
        return Err(Error::AccessDenied("unexpected installer type".into()));
    }

    Ok(())
}

fn handle_pull_record<F>(line: &str, on_progress: &mut F) -> Result<()>
where
    F: FnMut(u8),
{
    if line.is_empty() {
        return Ok(());
    }

    match serde_json::from_str::<PullProgress>(line) {
        Ok(record) => {
            if let Some(err) = record.error {
                return Err(Error::PullFailed(err));
            }
            if let (Some(total), Some(completed)) = (record.total, record.completed) {
                if total > 0 {
                    on_progress(rounded_percent(completed, total));
                }
            }
            Ok(())
        }
        Err(e) => {
            tracing::debug!("skipping malformed pull record: {}", e);
            Ok(())
        }
    }
}

fn rounded_percent(completed: u64, total: u64) -> u8 {
    ((completed as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Numeric dot-separated version comparison; missing segments read as 0.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let pa = parse_version(a);
    let pb = parse_version(b);
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let va = pa.get(i).copied().unwrap_or(0);
        let vb = pb.get(i).copied().unwrap_or(0);
        match va.cmp(&vb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn parse_version(s: &str) -> Vec<u64> {
    s.trim_start_matches('v')
        .split('.')
        .map(|seg| {
            seg.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse::<u64>()
                .unwrap_or(0)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

#[derive(Debug, Deserialize)]
struct PullProgress {
    #[serde(default)]
    #[allow(dead_code)]
    status: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}
