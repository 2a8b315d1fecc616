//! Slurm node state resolution.
//!
//! Depending on the installed Slurm version, node states come either from
//! the slurmrestd REST API (domain socket first, HTTP fallback) or from the
//! `sinfo` command. The fallback order is an explicit strategy list walked
//! by one dispatcher function, so the conditions are auditable and each
//! source is independently testable.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sentinel for nodes Slurm did not answer for. Requested nodes are never
/// silently omitted from the result mapping.
pub const UNKNOWN_STATE: &str = "unknown";

/// Versioned slurmrestd path.
const REST_NODES_PATH: &str = "/slurm/v0.0.38/nodes";

/// Find the directory containing Slurm binaries.
///
/// Resolution order: explicit path from config (validated to exist), then
/// auto-detection via PATH, then `/usr/bin`.
pub fn find_slurm_bin_path(config_path: Option<&Path>) -> PathBuf {
    if let Some(path) = config_path {
        if path.is_dir() {
            return path.to_path_buf();
        }
        eprintln!(
            "Warning: Configured slurm bin_path '{}' is not a valid directory, trying auto-detection",
            path.display()
        );
    }

    if let Ok(sinfo_path) = which::which("sinfo") {
        if let Some(parent) = sinfo_path.parent() {
            return parent.to_path_buf();
        }
    }

    PathBuf::from("/usr/bin")
}

/// Slurm version information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlurmVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SlurmVersion {
    /// Version prefix (major*100 + minor) from which slurmrestd is expected
    /// to be available and preferred over the command path.
    pub const REST_THRESHOLD: u32 = 2022;

    /// Whether the REST API path should be preferred for this version.
    #[must_use]
    pub fn prefers_rest(&self) -> bool {
        self.major * 100 + self.minor >= Self::REST_THRESHOLD
    }
}

impl std::fmt::Display for SlurmVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for SlurmVersion {
    type Err = anyhow::Error;

    /// Parse a Slurm version string.
    ///
    /// Handles formats like "slurm 22.05.9", "slurm-24.05.1", "22.05.9".
    fn from_str(s: &str) -> Result<Self> {
        let version_part = s
            .trim()
            .split(|c: char| c.is_whitespace() || c == '-')
            .find(|part| part.chars().next().is_some_and(|c| c.is_ascii_digit()))
            .with_context(|| format!("invalid Slurm version string: '{}'", s))?;

        let parts: Vec<&str> = version_part.split('.').collect();
        if parts.len() < 2 {
            bail!("invalid Slurm version string: '{}'", s);
        }

        let major = parts[0]
            .parse()
            .with_context(|| format!("invalid Slurm version string: '{}'", s))?;
        let minor = parts[1]
            .parse()
            .with_context(|| format!("invalid Slurm version string: '{}'", s))?;
        let patch = parts.get(2).and_then(|p| p.parse().ok()).unwrap_or(0);

        Ok(SlurmVersion {
            major,
            minor,
            patch,
        })
    }
}

/// Ordered sources to try for node states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlurmSource {
    RestSocket,
    RestHttp,
    Command,
}

/// Resolver for per-node Slurm states.
pub struct SlurmResolver {
    bin_path: PathBuf,
    restd_socket: String,
    rest_url: Option<String>,
    verify_certificate: bool,
    timeout: Duration,
}

impl SlurmResolver {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            bin_path: find_slurm_bin_path(config.slurm.bin_path.as_deref()),
            restd_socket: config.slurm.restd_socket.clone(),
            rest_url: config.slurm_rest_url(),
            verify_certificate: config.api.verify_certificate,
            timeout: config.health.timeout(),
        }
    }

    /// Detect the installed Slurm version by running `slurmd -V`.
    async fn detect_version(&self) -> Result<SlurmVersion> {
        let slurmd = which::which("slurmd").unwrap_or_else(|_| PathBuf::from("/usr/sbin/slurmd"));
        let output = tokio::process::Command::new(&slurmd)
            .arg("-V")
            .output()
            .await
            .with_context(|| format!("failed to execute {}", slurmd.display()))?;
        if !output.status.success() {
            bail!(
                "slurmd -V exited with code {}",
                output.status.code().unwrap_or(-1)
            );
        }
        String::from_utf8_lossy(&output.stdout).parse()
    }

    /// Resolve the state string of every requested node.
    ///
    /// Nodes Slurm does not report keep the [`UNKNOWN_STATE`] sentinel.
    pub async fn resolve_states(&self, nodes: &[String]) -> BTreeMap<String, String> {
        let sources: &[SlurmSource] = match self.detect_version().await {
            Ok(version) if version.prefers_rest() => {
                tracing::debug!(%version, "Slurm prefers REST API");
                &[
                    SlurmSource::RestSocket,
                    SlurmSource::RestHttp,
                    SlurmSource::Command,
                ]
            }
            Ok(version) => {
                tracing::debug!(%version, "Slurm predates slurmrestd, using sinfo");
                &[SlurmSource::Command]
            }
            Err(e) => {
                tracing::debug!(error = %e, "Slurm version detection failed, using sinfo");
                &[SlurmSource::Command]
            }
        };

        let mut raw = BTreeMap::new();
        for source in sources {
            match self.fetch(*source).await {
                Ok(states) => {
                    raw = states;
                    break;
                }
                Err(e) => {
                    tracing::debug!(?source, error = %e, "Slurm source failed, trying next");
                }
            }
        }

        states_for(nodes, &raw)
    }

    async fn fetch(&self, source: SlurmSource) -> Result<BTreeMap<String, Vec<String>>> {
        match source {
            SlurmSource::RestSocket => self.fetch_rest_socket().await,
            SlurmSource::RestHttp => self.fetch_rest_http().await,
            SlurmSource::Command => self.fetch_sinfo().await,
        }
    }

    /// slurmrestd over its local domain socket. The HTTP client in this
    /// crate does not speak AF_UNIX, so this shells out to curl the same way
    /// every other host-local integration here runs a subprocess.
    async fn fetch_rest_socket(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let url = format!("http://localhost{}", REST_NODES_PATH);
        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("curl")
                .args([
                    "--silent",
                    "--fail",
                    "--unix-socket",
                    &self.restd_socket,
                    &url,
                ])
                .output(),
        )
        .await
        .context("timed out querying slurmrestd socket")?
        .context("failed to execute curl")?;

        if !output.status.success() {
            bail!(
                "slurmrestd socket query exited with code {}",
                output.status.code().unwrap_or(-1)
            );
        }
        let body: Value = serde_json::from_slice(&output.stdout)
            .context("slurmrestd socket response is not JSON")?;
        parse_rest_nodes(&body)
    }

    /// slurmrestd over HTTP with static placeholder credentials.
    async fn fetch_rest_http(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let url = self
            .rest_url
            .clone()
            .context("no slurmrestd HTTP URL configured")?;
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!self.verify_certificate)
            .build()
            .context("building slurmrestd HTTP client")?;
        let body: Value = client
            .get(&url)
            .header("X-SLURM-USER-NAME", "USERNAME")
            .header("X-SLURM-USER-TOKEN", "TOKEN")
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .json()
            .await
            .with_context(|| format!("parsing response from {}", url))?;
        parse_rest_nodes(&body)
    }

    /// `sinfo -N -o "%N %6T"`, two whitespace-separated columns per line.
    async fn fetch_sinfo(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let sinfo_path = self.bin_path.join("sinfo");
        let output = tokio::process::Command::new(&sinfo_path)
            .args(["-N", "-o", "%N %6T"])
            .output()
            .await
            .context("failed to execute sinfo")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("sinfo command failed: {}", stderr);
        }
        Ok(parse_sinfo_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `sinfo -N -o "%N %6T"` output, accumulating state tokens per node.
#[must_use]
pub fn parse_sinfo_output(output: &str) -> BTreeMap<String, Vec<String>> {
    let mut states: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(node), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        let tokens = states.entry(node.to_string()).or_default();
        if !tokens.iter().any(|t| t == state) {
            tokens.push(state.to_string());
        }
    }
    states
}

/// Parse a slurmrestd nodes answer. Older versions report `state` as a
/// string, newer ones as an array of flags; both map to the token list.
pub fn parse_rest_nodes(body: &Value) -> Result<BTreeMap<String, Vec<String>>> {
    let nodes = body
        .get("nodes")
        .and_then(Value::as_array)
        .context("slurmrestd response has no nodes array")?;

    let mut states: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for node in nodes {
        let Some(name) = node.get("name").and_then(Value::as_str) else {
            continue;
        };
        let tokens = match node.get("state") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(flags)) => flags
                .iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        states.insert(name.to_string(), tokens);
    }
    Ok(states)
}

/// Derive the per-node status string: tokens joined by `/`, requested nodes
/// missing from the answer kept with the sentinel.
#[must_use]
pub fn states_for(
    nodes: &[String],
    raw: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, String> {
    nodes
        .iter()
        .map(|node| {
            let status = raw
                .get(node)
                .filter(|tokens| !tokens.is_empty())
                .map(|tokens| tokens.join("/"))
                .unwrap_or_else(|| UNKNOWN_STATE.to_string());
            (node.clone(), status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_slurm_status;
    use crate::models::Category;
    use serde_json::json;

    #[test]
    fn test_version_from_str_standard() {
        let version: SlurmVersion = "slurm 22.05.9".parse().unwrap();
        assert_eq!(version.major, 22);
        assert_eq!(version.minor, 5);
        assert_eq!(version.patch, 9);
    }

    #[test]
    fn test_version_from_str_with_hyphen() {
        let version: SlurmVersion = "slurm-24.05.1".parse().unwrap();
        assert_eq!(version.major, 24);
        assert_eq!(version.minor, 5);
    }

    #[test]
    fn test_version_from_str_invalid() {
        assert!("not a version".parse::<SlurmVersion>().is_err());
        assert!("".parse::<SlurmVersion>().is_err());
        assert!("slurm".parse::<SlurmVersion>().is_err());
    }

    #[test]
    fn test_prefers_rest_threshold() {
        let old: SlurmVersion = "20.11.8".parse().unwrap();
        assert!(!old.prefers_rest()); // 2011 < 2022

        let boundary: SlurmVersion = "20.22.0".parse().unwrap();
        assert!(boundary.prefers_rest()); // 2022

        let recent: SlurmVersion = "22.05.9".parse().unwrap();
        assert!(recent.prefers_rest()); // 2205
    }

    #[test]
    fn test_parse_sinfo_output() {
        let raw = parse_sinfo_output("cnode01 IDLE\ncnode02 MIXED*\n");
        assert_eq!(raw["cnode01"], vec!["IDLE"]);
        assert_eq!(raw["cnode02"], vec!["MIXED*"]);
    }

    #[test]
    fn test_parse_sinfo_accumulates_repeated_nodes() {
        // a node listed once per partition carries both state tokens
        let raw = parse_sinfo_output("cnode01 IDLE\ncnode01 DRAIN\ncnode01 IDLE\n");
        assert_eq!(raw["cnode01"], vec!["IDLE", "DRAIN"]);
    }

    #[test]
    fn test_states_for_scenario() {
        let nodes = vec!["cnode01".to_string(), "cnode02".to_string()];
        let raw = parse_sinfo_output("cnode01 IDLE\ncnode02 MIXED*\n");
        let states = states_for(&nodes, &raw);
        assert_eq!(states["cnode01"], "IDLE");
        assert_eq!(states["cnode02"], "MIXED*");
        assert_eq!(classify_slurm_status(&states["cnode01"]), Category::Good);
        assert_eq!(classify_slurm_status(&states["cnode02"]), Category::Error);
    }

    #[test]
    fn test_states_for_missing_node_keeps_sentinel() {
        let nodes = vec!["cnode01".to_string(), "ghost".to_string()];
        let raw = parse_sinfo_output("cnode01 IDLE\n");
        let states = states_for(&nodes, &raw);
        assert_eq!(states["ghost"], UNKNOWN_STATE);
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn test_status_join_is_order_preserving() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "n1".to_string(),
            vec!["MIXED".to_string(), "DRAIN".to_string()],
        );
        let states = states_for(&["n1".to_string()], &raw);
        assert_eq!(states["n1"], "MIXED/DRAIN");
    }

    #[test]
    fn test_parse_rest_nodes_string_state() {
        let body = json!({"nodes": [{"name": "cnode01", "state": "idle"}]});
        let raw = parse_rest_nodes(&body).unwrap();
        assert_eq!(raw["cnode01"], vec!["idle"]);
    }

    #[test]
    fn test_parse_rest_nodes_array_state() {
        let body = json!({"nodes": [{"name": "cnode01", "state": ["IDLE", "DRAIN"]}]});
        let raw = parse_rest_nodes(&body).unwrap();
        assert_eq!(raw["cnode01"], vec!["IDLE", "DRAIN"]);
    }

    #[test]
    fn test_parse_rest_nodes_missing_array_errors() {
        assert!(parse_rest_nodes(&json!({"meta": {}})).is_err());
    }
}
