//! Ephemeral host port reservation
//!
//! A reservation binds one listener per requested container port to host
//! port 0 and keeps it open, so the OS will not hand the chosen port to any
//! other bind until the listener is released. Release happens exactly once,
//! inside the startup gate, right before the runtime binds the same port.

use super::binding::{HostBinding, PortBindingSet, PortRequest, Transport};
use crate::error::{BerthError, Result};
use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, UdpSocket};
use tracing::{debug, warn};

/// A bound socket holding a host port
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl Listener {
    /// Bind to an OS-chosen port on `host_ip`
    pub fn bind(host_ip: IpAddr, transport: Transport) -> io::Result<Self> {
        let addr = SocketAddr::new(host_ip, 0);
        match transport {
            Transport::Tcp => TcpListener::bind(addr).map(Listener::Tcp),
            Transport::Udp => UdpSocket::bind(addr).map(Listener::Udp),
        }
    }

    /// Port the OS assigned to this listener
    pub fn local_port(&self) -> io::Result<u16> {
        let addr = match self {
            Listener::Tcp(l) => l.local_addr()?,
            Listener::Udp(s) => s.local_addr()?,
        };
        Ok(addr.port())
    }
}

/// A container port paired with the host port held for it
#[derive(Debug)]
pub struct ReservedPort {
    request: PortRequest,
    binding: HostBinding,
    listener: Option<Listener>,
}

impl ReservedPort {
    pub fn request(&self) -> PortRequest {
        self.request
    }

    pub fn binding(&self) -> &HostBinding {
        &self.binding
    }

    pub fn host_port(&self) -> u16 {
        self.binding.host_port
    }

    /// Whether the listener is still holding the host port
    pub fn is_held(&self) -> bool {
        self.listener.is_some()
    }

    /// Close the listener. Returns false if it was already closed.
    pub fn release(&mut self) -> bool {
        match self.listener.take() {
            Some(listener) => {
                drop(listener);
                debug!(port = %self.request, host_port = self.binding.host_port, "Released host port");
                true
            }
            None => false,
        }
    }
}

/// A batch of reserved host ports for one container
#[derive(Debug, Default)]
pub struct PortReservation {
    ports: Vec<ReservedPort>,
}

impl PortReservation {
    /// Reserve one free host port per request on `host_ip`
    ///
    /// If any bind fails, every listener already opened for this batch is
    /// closed before the error is returned.
    pub fn reserve(host_ip: &str, requests: &[PortRequest]) -> Result<Self> {
        Self::reserve_with(host_ip, requests, Listener::bind)
    }

    pub(crate) fn reserve_with<F>(host_ip: &str, requests: &[PortRequest], mut bind: F) -> Result<Self>
    where
        F: FnMut(IpAddr, Transport) -> io::Result<Listener>,
    {
        let ip: IpAddr = host_ip
            .parse()
            .map_err(|_| BerthError::InvalidConfig(format!("invalid host IP {:?}", host_ip)))?;

        let mut seen = HashSet::new();
        if let Some(dup) = requests.iter().find(|r| !seen.insert(**r)) {
            return Err(BerthError::InvalidPort(format!(
                "{} requested more than once",
                dup
            )));
        }

        let mut reservation = PortReservation {
            ports: Vec::with_capacity(requests.len()),
        };

        for request in requests {
            let bound = bind(ip, request.transport).and_then(|listener| {
                let port = listener.local_port()?;
                Ok((listener, port))
            });

            match bound {
                Ok((listener, host_port)) => {
                    debug!(port = %request, host_port, "Reserved host port");
                    reservation.ports.push(ReservedPort {
                        request: *request,
                        binding: HostBinding::new(host_ip, host_port),
                        listener: Some(listener),
                    });
                }
                Err(source) => {
                    let released = reservation.release();
                    warn!(
                        port = %request,
                        released,
                        "Port reservation failed, released partial batch: {}",
                        source
                    );
                    return Err(BerthError::Reservation {
                        port: request.to_string(),
                        source,
                    });
                }
            }
        }

        Ok(reservation)
    }

    /// Binding set to declare to the runtime
    pub fn bindings(&self) -> PortBindingSet {
        self.ports
            .iter()
            .map(|p| (p.request, p.binding.clone()))
            .collect()
    }

    pub fn ports(&self) -> &[ReservedPort] {
        &self.ports
    }

    /// Host port reserved for a container port
    pub fn host_port(&self, request: &PortRequest) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.request == *request)
            .map(|p| p.host_port())
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Number of listeners still open
    pub fn held(&self) -> usize {
        self.ports.iter().filter(|p| p.is_held()).count()
    }

    /// Close every open listener. Returns how many were closed.
    pub fn release(&mut self) -> usize {
        self.ports
            .iter_mut()
            .map(ReservedPort::release)
            .filter(|closed| *closed)
            .count()
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_free(port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).is_ok()
    }

    #[test]
    fn test_reserve_distinct_live_ports() {
        let requests = vec![
            PortRequest::tcp(7331),
            PortRequest::tcp(7676),
            PortRequest::tcp(26657),
        ];
        let reservation = PortReservation::reserve("0.0.0.0", &requests).unwrap();

        assert_eq!(reservation.len(), 3);
        assert_eq!(reservation.held(), 3);

        let ports: HashSet<u16> = reservation.ports().iter().map(|p| p.host_port()).collect();
        assert_eq!(ports.len(), 3);
        for port in &ports {
            assert_ne!(*port, 0);
            assert!(!is_free(*port), "port {} should be held", port);
        }
    }

    #[test]
    fn test_reserve_udp() {
        let reservation =
            PortReservation::reserve("127.0.0.1", &[PortRequest::udp(9000)]).unwrap();
        let port = reservation.host_port(&PortRequest::udp(9000)).unwrap();

        assert!(UdpSocket::bind(("127.0.0.1", port)).is_err());
    }

    #[test]
    fn test_bindings_match_reserved_ports() {
        let requests = vec![PortRequest::tcp(1317), PortRequest::tcp(9090)];
        let reservation = PortReservation::reserve("0.0.0.0", &requests).unwrap();
        let bindings = reservation.bindings();

        assert_eq!(bindings.len(), 2);
        for port in reservation.ports() {
            let binding = bindings.get(&port.request()).unwrap();
            assert_eq!(binding.host_port, port.host_port());
            assert_eq!(binding.host_ip, "0.0.0.0");
        }
    }

    #[test]
    fn test_release_frees_ports_exactly_once() {
        let mut reservation =
            PortReservation::reserve("0.0.0.0", &[PortRequest::tcp(8545)]).unwrap();
        let port = reservation.ports()[0].host_port();

        assert_eq!(reservation.release(), 1);
        assert_eq!(reservation.release(), 0);
        assert_eq!(reservation.held(), 0);
        assert!(is_free(port));
    }

    #[test]
    fn test_drop_releases_ports() {
        let port = {
            let reservation =
                PortReservation::reserve("0.0.0.0", &[PortRequest::tcp(8080)]).unwrap();
            reservation.ports()[0].host_port()
        };
        assert!(is_free(port));
    }

    #[test]
    fn test_failed_bind_releases_partial_batch() {
        let requests = vec![
            PortRequest::tcp(1),
            PortRequest::tcp(2),
            PortRequest::tcp(3),
            PortRequest::tcp(4),
        ];
        let mut bound_ports = Vec::new();
        let mut calls = 0;

        let result = PortReservation::reserve_with("0.0.0.0", &requests, |ip, transport| {
            calls += 1;
            if calls == 3 {
                return Err(io::Error::new(io::ErrorKind::AddrInUse, "no ports left"));
            }
            let listener = Listener::bind(ip, transport)?;
            bound_ports.push(listener.local_port()?);
            Ok(listener)
        });

        match result {
            Err(BerthError::Reservation { port, .. }) => assert_eq!(port, "3/tcp"),
            other => panic!("expected reservation error, got {:?}", other),
        }
        assert_eq!(calls, 3);
        assert_eq!(bound_ports.len(), 2);
        for port in bound_ports {
            assert!(is_free(port), "port {} leaked", port);
        }
    }

    #[test]
    fn test_duplicate_requests_rejected() {
        let result = PortReservation::reserve(
            "0.0.0.0",
            &[PortRequest::tcp(80), PortRequest::tcp(80)],
        );
        assert!(matches!(result, Err(BerthError::InvalidPort(_))));
    }

    #[test]
    fn test_invalid_host_ip() {
        let result = PortReservation::reserve("not-an-ip", &[PortRequest::tcp(80)]);
        assert!(matches!(result, Err(BerthError::InvalidConfig(_))));
    }
}
