use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;
use tokio::net::TcpSocket;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("No available ports in range {start}-{end}")]
    NoPortAvailable { start: u16, end: u16 },

    #[error("Invalid port range {start}-{end}")]
    InvalidRange { start: u16, end: u16 },
}

/// Returns the first port in `start..=end` that can be bound on all interfaces.
///
/// The probe socket is closed before returning, so another process may take the
/// port before the job binds it.
pub fn find_free_port(start: u16, end: u16) -> Result<u16, AllocationError> {
    if start > end {
        return Err(AllocationError::InvalidRange { start, end });
    }

    for port in start..=end {
        if probe(port).is_ok() {
            tracing::debug!("Port {} is free", port);
            return Ok(port);
        }
    }

    tracing::error!("No available ports in range {}-{}", start, end);
    Err(AllocationError::NoPortAvailable { start, end })
}

fn probe(port: u16) -> std::io::Result<()> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
}
