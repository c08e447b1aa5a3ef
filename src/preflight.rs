//! Host prerequisites for `up`.
//!
//! Every external tool the VM lifecycle shells out to must be on `PATH`, and
//! the director's address must be configured on a host interface, before
//! anything is downloaded or launched.

use std::ffi::OsStr;
use std::net::{IpAddr, Ipv4Addr};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::debug;

/// Address the director is deployed at, reached through a host alias.
pub const DIRECTOR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 4);

/// An external tool and where to get it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub name: &'static str,
    pub site: Option<&'static str>,
}

impl Dependency {
    fn usage(&self) -> String {
        match self.site {
            Some(site) => format!("{} {site}", self.name),
            None => self.name.to_string(),
        }
    }
}

pub const DEPENDENCIES: &[Dependency] = &[
    Dependency {
        name: "docker",
        site: Some("https://store.docker.com/editions/community/docker-ce-desktop-mac"),
    },
    Dependency {
        name: "bosh",
        site: Some("https://bosh.io/docs/cli-v2"),
    },
    Dependency {
        name: "linuxkit",
        site: Some("https://github.com/linuxkit/linuxkit"),
    },
    Dependency {
        name: "tar",
        site: None,
    },
];

/// First executable file named `name` in the `PATH`-style list `path_var`.
pub fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Dependencies from `deps` not found on `path_var`, in declaration order.
pub fn missing_dependencies<'a>(deps: &'a [Dependency], path_var: &OsStr) -> Vec<&'a Dependency> {
    deps.iter()
        .filter(|dep| match find_in_path(dep.name, path_var) {
            Some(found) => {
                debug!(tool = dep.name, path = %found.display(), "dependency found");
                false
            }
            None => true,
        })
        .collect()
}

/// Fail with one message listing every missing tool and its install hint.
pub fn check_dependencies(deps: &[Dependency], path_var: &OsStr) -> anyhow::Result<()> {
    let missing = missing_dependencies(deps, path_var);
    if missing.is_empty() {
        return Ok(());
    }

    let mut message = String::from("The following dependencies must be installed:");
    for (i, dep) in missing.iter().enumerate() {
        message.push_str(&format!("\n{}: {}", i + 1, dep.usage()));
    }
    bail!(message)
}

/// Every IPv4 and IPv6 address configured on a host interface.
pub fn host_addresses() -> anyhow::Result<Vec<IpAddr>> {
    let interfaces =
        nix::ifaddrs::getifaddrs().context("failed to inspect network interfaces")?;
    Ok(interfaces
        .filter_map(|ifaddr| ifaddr.address)
        .filter_map(|addr| match addr.as_sockaddr_in() {
            Some(v4) => Some(IpAddr::V4(v4.ip())),
            None => addr.as_sockaddr_in6().map(|v6| IpAddr::V6(v6.ip())),
        })
        .collect())
}

/// Fail unless [`DIRECTOR_IP`] is among `host_addrs`, with the command that
/// adds the alias.
pub fn check_director_addr(host_addrs: &[IpAddr]) -> anyhow::Result<()> {
    if host_addrs.contains(&IpAddr::V4(DIRECTOR_IP)) {
        return Ok(());
    }
    debug!(addrs = ?host_addrs, "director address not configured");
    bail!(
        "Your BOSH director will be accessible at {DIRECTOR_IP}. To make sure your requests\n\
         target appropriately you must add the IP to your network interfaces, like so:\n\n\
         $ sudo ifconfig lo0 alias {DIRECTOR_IP}"
    )
}
