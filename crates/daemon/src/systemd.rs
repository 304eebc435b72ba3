//! Systemd integration for the file-drop daemon.
//!
//! This module provides:
//! - Socket activation (`LISTEN_PID`/`LISTEN_FDS`, descriptors from 3)
//! - sd_notify status notifications
//! - SIGTERM/SIGINT handling for graceful shutdown
//!
//! Every function is a no-op outside systemd.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use filedrop_daemon::systemd::{listen_fds, notify_ready, notify_stopping};
//!
//! let listeners = listen_fds().expect("inherited sockets");
//! notify_ready();
//! // ... serve ...
//! notify_stopping();
//! ```

use std::env;
use std::io;
use std::net::TcpListener;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

/// Environment variable name for the systemd notification socket.
const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

const LISTEN_PID_ENV: &str = "LISTEN_PID";
const LISTEN_FDS_ENV: &str = "LISTEN_FDS";

/// First inherited descriptor.
pub const LISTEN_FDS_START: RawFd = 3;

/// Check if the daemon is running under systemd.
pub fn is_systemd() -> bool {
    env::var(NOTIFY_SOCKET_ENV).is_ok()
}

/// Number of sockets passed by systemd to this process.
///
/// Zero when the variables are unset, malformed, or addressed to another
/// process.
fn inherited_fd_count() -> RawFd {
    let Some(pid) = env::var(LISTEN_PID_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
    else {
        return 0;
    };
    if pid != std::process::id() {
        debug!(listen_pid = pid, "LISTEN_PID names another process");
        return 0;
    }

    env::var(LISTEN_FDS_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<RawFd>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(0)
}

/// Adopts the TCP listeners passed by systemd socket activation.
///
/// Returns an empty list when the process was not socket activated. The
/// listeners are switched to non-blocking mode, ready for
/// `tokio::net::TcpListener::from_std`.
pub fn listen_fds() -> io::Result<Vec<TcpListener>> {
    let count = inherited_fd_count();
    let mut listeners = Vec::with_capacity(count as usize);

    for fd in LISTEN_FDS_START..LISTEN_FDS_START + count {
        // SAFETY: systemd hands these descriptors to this process exclusively;
        // each is wrapped exactly once.
        let listener = unsafe { TcpListener::from_raw_fd(fd) };
        listener.set_nonblocking(true)?;
        debug!(fd, "adopted inherited listener");
        listeners.push(listener);
    }

    Ok(listeners)
}

/// Get the path to the systemd notification socket.
///
/// Returns `None` if not running under systemd or if the socket path is invalid.
fn get_notify_socket_path() -> Option<PathBuf> {
    let socket_path = env::var(NOTIFY_SOCKET_ENV).ok()?;

    if socket_path.starts_with('@') || socket_path.starts_with('/') {
        Some(PathBuf::from(socket_path))
    } else {
        warn!("Invalid NOTIFY_SOCKET path: {}", socket_path);
        None
    }
}

/// Send a notification message to systemd.
///
/// Messages should be in the format "KEY=VALUE\n". Returns `Ok(())` without
/// sending anything when not running under systemd.
fn notify(message: &str) -> io::Result<()> {
    let socket_path = match get_notify_socket_path() {
        Some(path) => path,
        None => {
            debug!("Not running under systemd, skipping notification");
            return Ok(());
        }
    };

    let socket = UnixDatagram::unbound()?;

    // Abstract namespace sockets start with a NUL byte.
    let actual_path = if socket_path.to_string_lossy().starts_with('@') {
        let path_str = socket_path.to_string_lossy();
        PathBuf::from(format!("\0{}", &path_str[1..]))
    } else {
        socket_path
    };

    socket.send_to(message.as_bytes(), &actual_path)?;

    debug!("Sent systemd notification: {}", message.trim());
    Ok(())
}

/// Notify systemd that the server is accepting connections.
pub fn notify_ready() {
    if let Err(e) = notify("READY=1\n") {
        error!("Failed to notify systemd of ready state: {}", e);
    } else {
        info!("Notified systemd: service ready");
    }
}

/// Send a human-readable status line, shown by `systemctl status`.
pub fn notify_status(message: &str) {
    let notification = format!("STATUS={}\n", message);
    if let Err(e) = notify(&notification) {
        error!("Failed to notify systemd of status: {}", e);
    } else {
        debug!("Notified systemd: STATUS={}", message);
    }
}

/// Notify systemd that the server has begun draining.
pub fn notify_stopping() {
    if let Err(e) = notify("STOPPING=1\n") {
        error!("Failed to notify systemd of stopping state: {}", e);
    } else {
        info!("Notified systemd: service stopping");
    }
}

/// Waits for SIGTERM or SIGINT.
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
    }

    Ok(())
}
