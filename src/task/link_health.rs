//! Link Health Monitor
//!
//! A cheap reachability check against the broker: resolve the host, complete
//! a TCP handshake, close. No payload is exchanged, so it can run once per
//! second without loading the link.
//!
//! The probe never fails to its caller. A DNS failure, a refused connection
//! or a timeout all collapse into [`HealthStatus::Unreachable`].

use embassy_time::Instant;

use crate::system::clock::Clock;

/// Outcome of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HealthStatus {
    Reachable,
    Unreachable,
}

impl HealthStatus {
    pub fn is_reachable(self) -> bool {
        self == HealthStatus::Reachable
    }
}

/// A probe result and when it was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub at: Instant,
}

/// Connection-oriented reachability check
#[allow(async_fn_in_trait)]
pub trait LinkProbe {
    /// Attempts a bounded handshake with `host:port`
    async fn probe(&mut self, host: &str, port: u16) -> HealthStatus;
}

/// Probes the broker endpoint and remembers the latest result
pub struct LinkHealthMonitor<'a, P> {
    probe: P,
    host: &'a str,
    port: u16,
    latest: Option<HealthCheck>,
}

impl<'a, P: LinkProbe> LinkHealthMonitor<'a, P> {
    pub fn new(probe: P, host: &'a str, port: u16) -> Self {
        Self {
            probe,
            host,
            port,
            latest: None,
        }
    }

    /// Runs one probe and records it, timestamped when it completed
    pub async fn check(&mut self, clock: &impl Clock) -> HealthCheck {
        let status = self.probe.probe(self.host, self.port).await;
        let check = HealthCheck {
            status,
            at: clock.now(),
        };
        self.latest = Some(check);
        check
    }

    /// Most recent result, `None` before the first probe
    pub fn latest(&self) -> Option<HealthCheck> {
        self.latest
    }
}

#[cfg(feature = "firmware")]
pub use tcp::TcpProbe;

#[cfg(feature = "firmware")]
mod tcp {
    use embassy_net::dns::DnsQueryType;
    use embassy_net::tcp::TcpSocket;
    use embassy_net::Stack;
    use embassy_time::{with_timeout, Duration};

    use super::{HealthStatus, LinkProbe};
    use crate::system::error::ProbeFailure;

    /// Socket buffer size; the probe never moves payload
    const PROBE_BUFFER: usize = 64;

    /// TCP handshake probe over the embassy-net stack
    pub struct TcpProbe {
        stack: Stack<'static>,
        timeout: Duration,
        rx: [u8; PROBE_BUFFER],
        tx: [u8; PROBE_BUFFER],
    }

    impl TcpProbe {
        /// `timeout` bounds the whole probe: resolution, handshake and close
        pub fn new(stack: Stack<'static>, timeout: Duration) -> Self {
            Self {
                stack,
                timeout,
                rx: [0; PROBE_BUFFER],
                tx: [0; PROBE_BUFFER],
            }
        }

        async fn handshake(&mut self, host: &str, port: u16) -> Result<(), ProbeFailure> {
            let addrs = self
                .stack
                .dns_query(host, DnsQueryType::A)
                .await
                .map_err(|_| ProbeFailure::Resolve)?;
            let addr = *addrs.first().ok_or(ProbeFailure::Resolve)?;

            let mut socket = TcpSocket::new(self.stack, &mut self.rx, &mut self.tx);
            socket.set_timeout(Some(self.timeout));
            socket
                .connect((addr, port))
                .await
                .map_err(|_| ProbeFailure::Refused)?;
            socket.close();
            let _ = socket.flush().await;
            socket.abort();
            Ok(())
        }
    }

    impl LinkProbe for TcpProbe {
        async fn probe(&mut self, host: &str, port: u16) -> HealthStatus {
            let timeout = self.timeout;
            let outcome = match with_timeout(timeout, self.handshake(host, port)).await {
                Ok(result) => result,
                Err(_) => Err(ProbeFailure::Timeout),
            };
            match outcome {
                Ok(()) => HealthStatus::Reachable,
                Err(failure) => {
                    debug!("probe of {}:{} failed: {}", host, port, failure);
                    HealthStatus::Unreachable
                }
            }
        }
    }
}
