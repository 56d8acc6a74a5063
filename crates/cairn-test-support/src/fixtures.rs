//! Environment probes for integration tests.

use std::path::Path;
use std::process::Command;

/// Returns `true` if a Docker daemon is reachable for integration tests.
#[must_use]
pub fn docker_available() -> bool {
    probe_docker(std::env::var("DOCKER_HOST").ok().as_deref())
}

fn probe_docker(host: Option<&str>) -> bool {
    match host {
        Some(host) => host
            .strip_prefix("unix://")
            .is_none_or(|socket| Path::new(socket).exists()),
        None => {
            Path::new("/var/run/docker.sock").exists()
                || Command::new("docker")
                    .arg("info")
                    .output()
                    .is_ok_and(|output| output.status.success())
        }
    }
}

/// Print a skip notice and report whether the suite should bail out.
#[must_use]
pub fn skip_without_docker(suite: &str) -> bool {
    if docker_available() {
        return false;
    }
    eprintln!("skipping {suite}: docker daemon unavailable");
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_unix_socket_is_unavailable() {
        assert!(!probe_docker(Some("unix:///definitely/missing.sock")));
    }

    #[test]
    fn tcp_hosts_are_trusted() {
        assert!(probe_docker(Some("tcp://127.0.0.1:2375")));
    }

    #[test]
    fn environment_probe_matches_explicit_probe() {
        let host = std::env::var("DOCKER_HOST").ok();
        assert_eq!(docker_available(), probe_docker(host.as_deref()));
    }
}
