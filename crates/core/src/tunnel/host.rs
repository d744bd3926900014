//! Privileged host networking boundary.
//!
//! Every change to interfaces, routes, rules or the firewall goes through
//! [`HostNetwork`]. Commands are argument vectors handed straight to the
//! binary, never to a shell.

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::config::HostBinaries;
use super::error::{is_permission_message, HostError};

/// Tool a host command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    Ip,
    Wg,
    Iptables,
    Ip6tables,
}

impl Program {
    pub fn as_str(&self) -> &'static str {
        match self {
            Program::Ip => "ip",
            Program::Wg => "wg",
            Program::Iptables => "iptables",
            Program::Ip6tables => "ip6tables",
        }
    }
}

/// A single host command.
#[derive(Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: Program,
    pub args: Vec<String>,
    /// Fed to the process on stdin; used for key material.
    pub stdin: Option<String>,
}

impl HostCommand {
    pub fn new<I, S>(program: Program, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, input: String) -> Self {
        self.stdin = Some(input);
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.as_str())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCommand")
            .field("command", &self.to_string())
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Operations on the host network stack.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// Runs a command, mapping failures onto [`HostError`].
    async fn run(&self, command: &HostCommand) -> Result<(), HostError>;

    /// Opens a TCP connection to `target` bound to `interface` and `source`.
    async fn probe(
        &self,
        interface: &str,
        source: IpAddr,
        target: SocketAddr,
        timeout: Duration,
    ) -> Result<(), HostError>;
}

/// [`HostNetwork`] backed by the real `ip`, `wg` and `iptables` binaries.
pub struct CommandHost {
    binaries: HostBinaries,
    command_timeout: Duration,
}

impl CommandHost {
    pub fn new(binaries: HostBinaries, command_timeout: Duration) -> Self {
        Self {
            binaries,
            command_timeout,
        }
    }

    fn binary(&self, program: Program) -> &str {
        match program {
            Program::Ip => &self.binaries.ip,
            Program::Wg => &self.binaries.wg,
            Program::Iptables => &self.binaries.iptables,
            Program::Ip6tables => &self.binaries.ip6tables,
        }
    }

    async fn execute(&self, command: &HostCommand) -> Result<(), HostError> {
        let binary = self.binary(command.program);
        let mut child = Command::new(binary)
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HostError::BinaryNotFound {
                        program: binary.to_string(),
                    }
                } else if e.kind() == std::io::ErrorKind::PermissionDenied {
                    HostError::PermissionDenied {
                        command: command.to_string(),
                        stderr: e.to_string(),
                    }
                } else {
                    HostError::from(e)
                }
            })?;

        if let (Some(input), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            // Closing stdin lets wg read EOF.
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(HostError::from_failure(
            command.to_string(),
            output.status.code(),
            stderr,
        ))
    }
}

#[async_trait]
impl HostNetwork for CommandHost {
    async fn run(&self, command: &HostCommand) -> Result<(), HostError> {
        debug!(command = %command, "Running host command");
        match tokio::time::timeout(self.command_timeout, self.execute(command)).await {
            Ok(result) => result,
            Err(_) => Err(HostError::CommandTimeout {
                command: command.to_string(),
                timeout_secs: self.command_timeout.as_secs(),
            }),
        }
    }

    async fn probe(
        &self,
        interface: &str,
        source: IpAddr,
        target: SocketAddr,
        timeout: Duration,
    ) -> Result<(), HostError> {
        let iface = interface.to_string();
        let attempt = tokio::task::spawn_blocking(move || connect_through(&iface, source, target, timeout))
            .await
            .map_err(|e| HostError::Io(e.to_string()))?;

        attempt.map_err(|e| {
            let reason = e.to_string();
            if e.kind() == std::io::ErrorKind::PermissionDenied || is_permission_message(&reason) {
                HostError::PermissionDenied {
                    command: format!("probe {} via {}", target, interface),
                    stderr: reason,
                }
            } else {
                HostError::ProbeFailed {
                    interface: interface.to_string(),
                    target: target.to_string(),
                    reason,
                }
            }
        })
    }
}

/// Blocking TCP connect pinned to one interface and source address.
fn connect_through(
    interface: &str,
    source: IpAddr,
    target: SocketAddr,
    timeout: Duration,
) -> std::io::Result<()> {
    let socket = Socket::new(Domain::for_address(target), Type::STREAM, Some(Protocol::TCP))?;

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
    socket.bind_device(Some(interface.as_bytes()))?;
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
    let _ = interface;

    if source.is_ipv4() == target.is_ipv4() {
        socket.bind(&SockAddr::from(SocketAddr::new(source, 0)))?;
    }
    socket.connect_timeout(&SockAddr::from(target), timeout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_debug_hide_stdin() {
        let cmd = HostCommand::new(Program::Wg, ["set", "bw0", "private-key", "/dev/stdin"])
            .with_stdin("secret-key-material".to_string());
        assert_eq!(cmd.to_string(), "wg set bw0 private-key /dev/stdin");
        let debug = format!("{:?}", cmd);
        assert!(!debug.contains("secret-key-material"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_missing_binary_maps_to_not_found() {
        let host = CommandHost::new(
            HostBinaries {
                ip: "/nonexistent/ip".to_string(),
                ..HostBinaries::default()
            },
            Duration::from_secs(5),
        );
        let err = host
            .run(&HostCommand::new(Program::Ip, ["link", "show"]))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::BinaryNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_captures_stderr() {
        // `false`-like behaviour through a binary that rejects unknown args.
        let host = CommandHost::new(
            HostBinaries {
                ip: "ls".to_string(),
                ..HostBinaries::default()
            },
            Duration::from_secs(5),
        );
        let err = host
            .run(&HostCommand::new(Program::Ip, ["/definitely/not/here"]))
            .await
            .unwrap_err();
        match err {
            HostError::CommandFailed { stderr, exit_code, .. } => {
                assert!(exit_code.is_some());
                assert!(stderr.contains("No such file or directory"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
