//! Conflict-free port allocation for test sessions.
//!
//! Two deliberately different strategies coexist:
//! - the session allocator computes `base + spacing * ordinal` per
//!   service and fails hard on the first occupied port, keeping session
//!   spacing predictable;
//! - the simulator manager scans sequentially from a start port up to a
//!   bounded retry count (see `scan_port`).

use std::collections::HashMap;

use tokio::net::TcpListener;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::models::{PortConfig, PortTriple};

/// Bind-then-close probe. The probe and the eventual bind are not
/// atomic; the simulator reports its real ports on the command line,
/// so a lost race surfaces as a startup failure rather than silence.
pub async fn probe_port(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).await.is_ok()
}

/// Sequential scan: try `start`, `start+1`, ... up to `max_retries`
/// candidates. Exhausting the range is a deterministic failure.
pub async fn scan_port(service: &str, start: u16, max_retries: u32) -> PipelineResult<u16> {
    for offset in 0..max_retries {
        let candidate = start.saturating_add(offset as u16);
        if probe_port(candidate).await {
            debug!(service = service, port = candidate, "Port scan succeeded");
            return Ok(candidate);
        }
    }
    Err(PipelineError::PortExhausted {
        service: service.to_string(),
        start,
        attempts: max_retries,
    })
}

/// Strict per-session allocator. No fallback scan at this layer.
pub struct PortAllocator {
    config: PortConfig,
    allocations: HashMap<Uuid, (usize, PortTriple)>,
}

impl PortAllocator {
    pub fn new(config: PortConfig) -> Self {
        Self {
            config,
            allocations: HashMap::new(),
        }
    }

    /// Pure port arithmetic for a session ordinal. Exposed separately
    /// so the disjointness invariant is testable without binding.
    pub fn triple_for_ordinal(config: &PortConfig, ordinal: usize) -> PortTriple {
        let offset = config.session_spacing * ordinal as u16;
        PortTriple {
            data_stream: config.data_stream_base + offset,
            api: config.api_base + offset,
            transport: config.transport_base + offset,
        }
    }

    /// Smallest ordinal not owned by a live session.
    fn next_ordinal(&self) -> usize {
        let used: Vec<usize> = self.allocations.values().map(|(ord, _)| *ord).collect();
        (0..).find(|ord| !used.contains(ord)).unwrap_or(0)
    }

    /// Allocate a probed triple for `session_id`. Fails with
    /// `PortUnavailable` on the first occupied port.
    pub async fn allocate(&mut self, session_id: Uuid) -> PipelineResult<PortTriple> {
        let ordinal = self.next_ordinal();
        let triple = Self::triple_for_ordinal(&self.config, ordinal);

        for port in triple.as_array() {
            if !probe_port(port).await {
                return Err(PipelineError::PortUnavailable(port));
            }
        }

        self.allocations.insert(session_id, (ordinal, triple));
        debug!(
            session_id = %session_id,
            ordinal = ordinal,
            data_stream = triple.data_stream,
            api = triple.api,
            transport = triple.transport,
            "Ports allocated"
        );
        Ok(triple)
    }

    /// Release a session's triple so its ordinal can be reused.
    pub fn release(&mut self, session_id: Uuid) {
        if self.allocations.remove(&session_id).is_some() {
            debug!(session_id = %session_id, "Ports released");
        }
    }

    /// Triple currently held by a session, if any.
    pub fn get(&self, session_id: Uuid) -> Option<PortTriple> {
        self.allocations.get(&session_id).map(|(_, t)| *t)
    }

    pub fn active_count(&self) -> usize {
        self.allocations.len()
    }

    /// Snapshot of all live allocations, for persistence.
    pub fn snapshot(&self) -> HashMap<Uuid, PortTriple> {
        self.allocations
            .iter()
            .map(|(id, (_, t))| (*id, *t))
            .collect()
    }

    /// Drop all allocations.
    pub fn clear(&mut self) {
        self.allocations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PortConfig;

    #[test]
    fn test_triples_disjoint_across_ordinals() {
        let config = PortConfig::default();
        for i in 0..8 {
            for j in 0..8 {
                if i == j {
                    continue;
                }
                let a = PortAllocator::triple_for_ordinal(&config, i);
                let b = PortAllocator::triple_for_ordinal(&config, j);
                assert!(a.is_disjoint(b), "ordinals {i} and {j} collide");
            }
        }
    }

    #[test]
    fn test_spacing_arithmetic() {
        let config = PortConfig::default();
        let t = PortAllocator::triple_for_ordinal(&config, 3);
        assert_eq!(t.data_stream, config.data_stream_base + 30);
        assert_eq!(t.api, config.api_base + 30);
        assert_eq!(t.transport, config.transport_base + 30);
    }

    #[tokio::test]
    async fn test_allocate_and_release_reuses_ordinal() {
        let mut allocator = PortAllocator::new(PortConfig::default());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let t0 = allocator.allocate(first).await.unwrap();
        let t1 = allocator.allocate(second).await.unwrap();
        assert!(t0.is_disjoint(t1));

        allocator.release(first);
        let third = Uuid::new_v4();
        let t2 = allocator.allocate(third).await.unwrap();
        // Ordinal 0 was freed, so its triple comes back.
        assert_eq!(t2, t0);
    }

    #[tokio::test]
    async fn test_allocate_fails_on_occupied_port() {
        let config = PortConfig {
            // Use a high, likely-free block for the test.
            data_stream_base: 42110,
            api_base: 42310,
            transport_base: 42510,
            ..PortConfig::default()
        };

        // Occupy the first data-stream port.
        let _listener = TcpListener::bind(("127.0.0.1", 42110)).await.unwrap();

        let mut allocator = PortAllocator::new(config);
        let result = allocator.allocate(Uuid::new_v4()).await;
        assert!(matches!(result, Err(PipelineError::PortUnavailable(42110))));
        assert_eq!(allocator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_scan_port_walks_past_occupied() {
        let _listener = TcpListener::bind(("127.0.0.1", 42710)).await.unwrap();
        let port = scan_port("data-stream", 42710, 5).await.unwrap();
        assert_eq!(port, 42711);
    }

    #[tokio::test]
    async fn test_scan_port_exhaustion_is_deterministic() {
        let l0 = TcpListener::bind(("127.0.0.1", 42810)).await.unwrap();
        let l1 = TcpListener::bind(("127.0.0.1", 42811)).await.unwrap();

        let result = scan_port("api", 42810, 2).await;
        match result {
            Err(PipelineError::PortExhausted {
                service,
                start,
                attempts,
            }) => {
                assert_eq!(service, "api");
                assert_eq!(start, 42810);
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected PortExhausted, got {other:?}"),
        }
        drop((l0, l1));
    }
}
