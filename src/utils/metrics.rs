//! Observability and Metrics
//!
//! Atomic counters for the router and the TCP server. One [`Metrics`] is
//! owned by each [`Router`](crate::protocol::dispatcher::Router) and shared
//! with whoever needs to read it through an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Counters for telescope protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Accept failures and refused connections
    pub connection_errors: AtomicU64,
    /// Packets routed
    pub packets_received: AtomicU64,
    /// Packets handed to the transport
    pub packets_sent: AtomicU64,
    /// Payload bytes routed
    pub bytes_received: AtomicU64,
    /// Frame bytes handed to the transport
    pub bytes_sent: AtomicU64,
    /// Packets whose integrity field did not match their payload
    pub checksum_mismatches: AtomicU64,
    /// Frames dropped before routing
    pub framing_errors: AtomicU64,
    /// Requests answered with InvalidPacket
    pub invalid_packets: AtomicU64,
    /// Requests dropped without an answer
    pub silent_drops: AtomicU64,
    /// Controlled commands refused
    pub privilege_denials: AtomicU64,
    /// Backend capabilities that failed or were unbound
    pub backend_failures: AtomicU64,
    /// Services not understood
    pub unknown_services: AtomicU64,
    /// Control handshakes granting station control
    pub handshakes_granted: AtomicU64,
    /// Control handshakes granting master control
    pub handshakes_escalated: AtomicU64,
    /// Control handshakes refused
    pub handshakes_denied: AtomicU64,
    /// Spectra broadcast
    pub spectra_published: AtomicU64,
    /// Frames discarded because a connection's writer queue was full
    pub frames_dropped: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            checksum_mismatches: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            invalid_packets: AtomicU64::new(0),
            silent_drops: AtomicU64::new(0),
            privilege_denials: AtomicU64::new(0),
            backend_failures: AtomicU64::new(0),
            unknown_services: AtomicU64::new(0),
            handshakes_granted: AtomicU64::new(0),
            handshakes_escalated: AtomicU64::new(0),
            handshakes_denied: AtomicU64::new(0),
            spectra_published: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Record a connection error
    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a routed packet and its payload size
    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame handed to the transport
    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn checksum_mismatch(&self) {
        self.checksum_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_packet(&self) {
        self.invalid_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn silent_drop(&self) {
        self.silent_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn privilege_denied(&self) {
        self.privilege_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_failure(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_service(&self) {
        self.unknown_services.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_granted(&self) {
        self.handshakes_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_escalated(&self) {
        self.handshakes_escalated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_denied(&self) {
        self.handshakes_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn spectrum_published(&self) {
        self.spectra_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            checksum_mismatches: self.checksum_mismatches.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            silent_drops: self.silent_drops.load(Ordering::Relaxed),
            privilege_denials: self.privilege_denials.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            unknown_services: self.unknown_services.load(Ordering::Relaxed),
            handshakes_granted: self.handshakes_granted.load(Ordering::Relaxed),
            handshakes_escalated: self.handshakes_escalated.load(Ordering::Relaxed),
            handshakes_denied: self.handshakes_denied.load(Ordering::Relaxed),
            spectra_published: self.spectra_published.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connection_errors = snapshot.connection_errors,
            packets_received = snapshot.packets_received,
            packets_sent = snapshot.packets_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            checksum_mismatches = snapshot.checksum_mismatches,
            framing_errors = snapshot.framing_errors,
            invalid_packets = snapshot.invalid_packets,
            silent_drops = snapshot.silent_drops,
            privilege_denials = snapshot.privilege_denials,
            backend_failures = snapshot.backend_failures,
            unknown_services = snapshot.unknown_services,
            handshakes_granted = snapshot.handshakes_granted,
            handshakes_escalated = snapshot.handshakes_escalated,
            handshakes_denied = snapshot.handshakes_denied,
            spectra_published = snapshot.spectra_published,
            frames_dropped = snapshot.frames_dropped,
            uptime_seconds = snapshot.uptime_seconds,
            "Telescope metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connection_errors: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub checksum_mismatches: u64,
    pub framing_errors: u64,
    pub invalid_packets: u64,
    pub silent_drops: u64,
    pub privilege_denials: u64,
    pub backend_failures: u64,
    pub unknown_services: u64,
    pub handshakes_granted: u64,
    pub handshakes_escalated: u64,
    pub handshakes_denied: u64,
    pub spectra_published: u64,
    pub frames_dropped: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
