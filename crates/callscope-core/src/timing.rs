//! Network timing marks and derived durations

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Monotonic timing marks for one outbound call
///
/// Every mark except `start_at` is optional: a call that fails during DNS
/// resolution only ever has a start. Marks are set once and never move.
#[derive(Debug, Clone, Copy)]
pub struct NetworkTimings {
    pub start_at: Instant,
    pub dns_lookup_at: Option<Instant>,
    pub tcp_connection_at: Option<Instant>,
    pub tls_handshake_at: Option<Instant>,
    pub first_byte_at: Option<Instant>,
    pub end_at: Option<Instant>,
}

/// Set a mark once; marks earlier than the start are ignored
fn set_mark(slot: &mut Option<Instant>, start: Instant, at: Instant) -> bool {
    if slot.is_some() || at < start {
        return false;
    }
    *slot = Some(at);
    true
}

/// Milliseconds between two marks, only when both exist and are ordered
fn between(from: Option<Instant>, to: Option<Instant>) -> Option<f64> {
    let (from, to) = (from?, to?);
    to.checked_duration_since(from)
        .map(|elapsed| elapsed.as_micros() as f64 / 1000.0)
}

impl NetworkTimings {
    pub fn start(at: Instant) -> Self {
        Self {
            start_at: at,
            dns_lookup_at: None,
            tcp_connection_at: None,
            tls_handshake_at: None,
            first_byte_at: None,
            end_at: None,
        }
    }

    pub fn mark_dns_lookup(&mut self, at: Instant) -> bool {
        set_mark(&mut self.dns_lookup_at, self.start_at, at)
    }

    pub fn mark_tcp_connection(&mut self, at: Instant) -> bool {
        set_mark(&mut self.tcp_connection_at, self.start_at, at)
    }

    pub fn mark_tls_handshake(&mut self, at: Instant) -> bool {
        set_mark(&mut self.tls_handshake_at, self.start_at, at)
    }

    pub fn mark_first_byte(&mut self, at: Instant) -> bool {
        set_mark(&mut self.first_byte_at, self.start_at, at)
    }

    pub fn mark_end(&mut self, at: Instant) -> bool {
        set_mark(&mut self.end_at, self.start_at, at)
    }

    /// Derive per-phase durations
    ///
    /// A phase whose endpoints are missing (or out of order) is omitted rather
    /// than reported as zero or negative.
    pub fn breakdown(&self) -> TimingBreakdown {
        let connected = match (self.tls_handshake_at, self.tcp_connection_at) {
            (Some(tls), Some(tcp)) => Some(tls.max(tcp)),
            (tls, tcp) => tls.or(tcp),
        };

        TimingBreakdown {
            dns_lookup_ms: between(Some(self.start_at), self.dns_lookup_at),
            tcp_connect_ms: between(self.dns_lookup_at, self.tcp_connection_at),
            tls_handshake_ms: between(self.tcp_connection_at, self.tls_handshake_at),
            ttfb_ms: between(connected, self.first_byte_at),
            content_transfer_ms: between(self.first_byte_at, self.end_at),
            total_ms: between(Some(self.start_at), self.end_at),
        }
    }
}

/// Per-phase durations in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingBreakdown {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_lookup_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_connect_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_handshake_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_transfer_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ms: Option<f64>,
}
