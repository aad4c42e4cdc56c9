use core::fmt;

use log::info;

use crate::publisher::AccessoryServer;

pub trait MemoryProbe {
    /// Free heap in bytes, or `None` where the platform cannot tell.
    fn free_heap_bytes(&self) -> Option<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub free_heap_bytes: Option<u32>,
    pub connected_clients: usize,
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.free_heap_bytes {
            Some(bytes) => write!(f, "Free heap: {bytes}")?,
            None => write!(f, "Free heap: n/a")?,
        }
        write!(f, ", HomeKit clients: {}", self.connected_clients)
    }
}

pub struct DiagnosticReporter<M> {
    probe: M,
}

impl<M: MemoryProbe> DiagnosticReporter<M> {
    pub fn new(probe: M) -> Self {
        Self { probe }
    }

    pub fn report<A: AccessoryServer>(&self, server: &A) -> DiagnosticReport {
        let report = DiagnosticReport {
            free_heap_bytes: self.probe.free_heap_bytes(),
            connected_clients: server.connected_client_count(),
        };
        info!("{report}");
        report
    }
}
