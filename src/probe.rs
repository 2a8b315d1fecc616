//! Node reachability probing.
//!
//! One probe runs a sequence of increasingly deep checks against a node:
//! DNS resolution, ICMP ping, TCP connect to the SSH port, a trivial remote
//! command, and finally mount-point health. The first failing stage
//! terminates the probe; the record keeps the attempted stage history and
//! the failing stage's diagnostics.

use crate::config::HealthConfig;
use crate::models::HealthRecord;
use futures::{stream, StreamExt};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

const SSH_PORT: u16 = 22;

/// Worker pool size for per-mount checks on a single node.
const MOUNT_POOL: usize = 10;

/// Mount units every node has that say nothing about its filesystems.
const STANDARD_MOUNT_UNITS: &[&str] = &["-.mount", "run-user-0.mount"];

/// Outcome of one subprocess execution.
struct CmdOutput {
    /// Exit code; 255 when the command could not run or timed out.
    status: i32,
    stdout: String,
    timed_out: bool,
}

/// Run a command with a hard timeout, killing it on expiry.
async fn run_cmd(program: &str, args: &[&str], timeout: Duration) -> CmdOutput {
    let child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => CmdOutput {
            status: output.status.code().unwrap_or(255),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            timed_out: false,
        },
        Ok(Err(e)) => {
            tracing::debug!(program, error = %e, "failed to execute command");
            CmdOutput {
                status: 255,
                stdout: String::new(),
                timed_out: false,
            }
        }
        Err(_) => {
            tracing::debug!(program, ?timeout, "command timed out");
            CmdOutput {
                status: 255,
                stdout: String::new(),
                timed_out: true,
            }
        }
    }
}

fn ssh_args(node: &str, timeout: Duration, remote: &str) -> Vec<String> {
    vec![
        "-o".to_string(),
        format!("ConnectTimeout={}", timeout.as_secs().max(1)),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        node.to_string(),
        remote.to_string(),
    ]
}

async fn run_ssh(node: &str, remote: &str, timeout: Duration) -> CmdOutput {
    let args = ssh_args(node, timeout, remote);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run_cmd("ssh", &args, timeout + Duration::from_secs(2)).await
}

/// Probe one node through the full stage sequence.
pub async fn probe(node: &str, health: &HealthConfig) -> HealthRecord {
    let timeout = health.timeout();
    let mut record = HealthRecord::new("health");

    record.history.push("resolve");
    if let Some(details) = check_resolve(node, timeout).await {
        record.details = details;
        record.info = record.history.last().unwrap_or(&"").to_string();
        return record;
    }

    // Reachable by name from here on; anything that fails now is a down node.
    record.status = "DOWN".to_string();

    record.history.push("ping");
    if let Some(details) = check_ping(node, timeout).await {
        record.details = details;
        record.info = record.history.last().unwrap_or(&"").to_string();
        return record;
    }

    record.history.push("ssh port");
    if let Some(details) = check_ssh_port(node, SSH_PORT, timeout).await {
        record.details = details;
        record.info = record.history.last().unwrap_or(&"").to_string();
        return record;
    }

    record.history.push("ssh");
    let ssh = run_ssh(node, "uname", timeout).await;
    if ssh.status != 0 {
        record.info = record.history.last().unwrap_or(&"").to_string();
        return record;
    }
    record.status = "AVAIL".to_string();

    record.history.push("mounts");
    let (ok, details) = check_mounts(node, health).await;
    if !ok {
        record.status = "NO_FS".to_string();
        record.details = details;
        record.info = record.history.last().unwrap_or(&"").to_string();
        return record;
    }

    record.status = "OK".to_string();
    record
}

/// `None` on success, `Some(details)` on failure.
async fn check_resolve(node: &str, timeout: Duration) -> Option<String> {
    let lookup = tokio::net::lookup_host((node, SSH_PORT));
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(mut addrs)) => {
            if addrs.next().is_some() {
                None
            } else {
                Some(format!("{} resolves to no addresses", node))
            }
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("timed out resolving {}", node)),
    }
}

async fn check_ping(node: &str, timeout: Duration) -> Option<String> {
    let wait = timeout.as_secs().max(1).to_string();
    let output = run_cmd(
        "ping",
        &["-c1", &format!("-w{}", wait), node],
        timeout + Duration::from_secs(2),
    )
    .await;
    if output.status == 0 {
        return None;
    }
    Some(last_nonempty_line(&output.stdout).unwrap_or_default())
}

async fn check_ssh_port(node: &str, port: u16, timeout: Duration) -> Option<String> {
    match tokio::time::timeout(timeout, TcpStream::connect((node, port))).await {
        Ok(Ok(_)) => None,
        // any connection error, DNS hiccup included, counts the same
        Ok(Err(_)) | Err(_) => Some(format!("Port {} is closed", port)),
    }
}

/// Verify every expected mount on the node is live.
///
/// Mount list resolution: the operator mapping from config wins if any of
/// its hostlist expressions cover the node, otherwise active mount units are
/// discovered remotely. An empty list is a defined failure: an unknown empty
/// set cannot be verified.
pub async fn check_mounts(node: &str, health: &HealthConfig) -> (bool, String) {
    let timeout = health.timeout();
    let mounts: Vec<String> = match health.mounts_for(node) {
        Some(paths) => paths.to_vec(),
        None => discover_mountpoints(node, timeout).await,
    };
    if mounts.is_empty() {
        return (false, String::new());
    }

    let results: Vec<(String, bool)> = stream::iter(mounts.into_iter().map(|fs| async move {
        let ok = mount_worker(node, &fs, timeout).await;
        (fs, ok)
    }))
    .buffered(MOUNT_POOL)
    .collect()
    .await;

    summarize_mounts(results)
}

/// Fold per-mount results into the overall verdict: any broken mount fails
/// the check and the broken names are comma-joined behind `FAIL:`.
fn summarize_mounts(results: Vec<(String, bool)>) -> (bool, String) {
    let broken: Vec<String> = results
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(fs, _)| fs)
        .collect();

    if broken.is_empty() {
        (true, String::new())
    } else {
        (false, format!("FAIL:{}", broken.join(",")))
    }
}

/// List active mount units on the node and keep the interesting ones.
async fn discover_mountpoints(node: &str, timeout: Duration) -> Vec<String> {
    let output = run_ssh(node, "systemctl --type mount --all --no-legend", timeout).await;
    if output.status != 0 {
        return Vec::new();
    }
    parse_mount_units(&output.stdout)
}

/// Parse `systemctl --type mount --all --no-legend` output into mount paths,
/// dropping the root and the anonymous user-runtime mounts.
fn parse_mount_units(output: &str) -> Vec<String> {
    let mut mounts = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }
        let (unit_name, fs) = (fields[0], fields[4]);
        if fs.starts_with('/') && !STANDARD_MOUNT_UNITS.contains(&unit_name) {
            mounts.push(fs.to_string());
        }
    }
    mounts
}

/// One mount is healthy when it appears in the remote `/proc/mounts` and a
/// remote `stat` on it returns in time with exit 0.
async fn mount_worker(node: &str, fs: &str, timeout: Duration) -> bool {
    let grep = run_ssh(node, &format!("grep -q '{}' /proc/mounts", fs), timeout).await;
    if grep.status != 0 {
        tracing::debug!(node, fs, "not mounted");
        return false;
    }

    let stat = run_ssh(node, &format!("stat -t {}", fs), timeout).await;
    if stat.timed_out {
        tracing::debug!(node, fs, "stat timed out");
        return false;
    }
    if stat.status != 0 {
        tracing::debug!(node, fs, status = stat.status, "stat returned non-zero");
        return false;
    }
    true
}

fn last_nonempty_line(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn quick_health() -> HealthConfig {
        HealthConfig {
            timeout: 2,
            mounts: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_probe_stops_at_resolve_for_invalid_name() {
        // .invalid never resolves (RFC 2606); either NXDOMAIN or the timeout
        // counts as a resolve failure.
        let record = probe("no-such-host.invalid", &quick_health()).await;
        assert_eq!(record.history, vec!["resolve"]);
        assert_eq!(record.status, "UNKN");
        assert_eq!(record.info, "resolve");
        assert_eq!(record.category, Category::Unknown);
    }

    #[tokio::test]
    async fn test_ssh_port_check_open_and_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let timeout = Duration::from_secs(2);

        assert!(check_ssh_port("127.0.0.1", port, timeout).await.is_none());

        drop(listener);
        let details = check_ssh_port("127.0.0.1", port, timeout).await;
        assert_eq!(details, Some(format!("Port {} is closed", port)));
    }

    #[test]
    fn test_parse_mount_units_filters_standard_units() {
        let output = "\
-.mount            loaded active mounted /\n\
home.mount         loaded active mounted /home\n\
run-user-0.mount   loaded active mounted /run/user/0\n\
scratch.mount      loaded active mounted /scratch\n\
dev-hugepages.mount loaded active mounted /dev/hugepages\n";
        assert_eq!(
            parse_mount_units(output),
            vec!["/home", "/scratch", "/dev/hugepages"]
        );
    }

    #[test]
    fn test_parse_mount_units_skips_short_lines() {
        assert!(parse_mount_units("garbage line\n").is_empty());
        assert!(parse_mount_units("").is_empty());
    }

    #[test]
    fn test_last_nonempty_line() {
        assert_eq!(
            last_nonempty_line("a\nb\n\n").as_deref(),
            Some("b")
        );
        assert_eq!(last_nonempty_line("\n\n"), None);
    }

    #[test]
    fn test_summarize_mounts_all_healthy() {
        let results = vec![("/home".to_string(), true), ("/scratch".to_string(), true)];
        assert_eq!(summarize_mounts(results), (true, String::new()));
    }

    #[test]
    fn test_summarize_mounts_broken_mount_fails() {
        let results = vec![("/home".to_string(), true), ("/scratch".to_string(), false)];
        assert_eq!(
            summarize_mounts(results),
            (false, "FAIL:/scratch".to_string())
        );
    }

    #[test]
    fn test_summarize_mounts_joins_all_broken() {
        let results = vec![("/home".to_string(), false), ("/scratch".to_string(), false)];
        assert_eq!(
            summarize_mounts(results),
            (false, "FAIL:/home,/scratch".to_string())
        );
    }

    #[tokio::test]
    async fn test_check_mounts_empty_set_is_failure() {
        // No config mapping and discovery against an unreachable node yields
        // nothing; an empty set must fail, not pass.
        let (ok, details) = check_mounts("no-such-host.invalid", &quick_health()).await;
        assert!(!ok);
        assert!(details.is_empty());
    }
}
