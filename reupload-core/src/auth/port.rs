use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};

use tokio::net::TcpListener;

/// A loopback port the OS reported free at reservation time.
///
/// The probe socket is closed before the callback listener binds again, so another
/// process can claim the port in between. [`ReservedPort::bind`] surfaces that as an
/// `AddrInUse` error; callers retry with a fresh reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedPort {
    addr: SocketAddr,
}

impl ReservedPort {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(self.addr).await
    }
}

pub fn reserve_port(host: &str) -> io::Result<ReservedPort> {
    let probe = StdTcpListener::bind((host, 0))?;
    let addr = probe.local_addr()?;
    drop(probe);
    Ok(ReservedPort { addr })
}
