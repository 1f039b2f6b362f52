//! Port traits: the hexagonal boundary between the meter core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ MeterService (domain)
//! ```
//!
//! The SEL output is not a port of its own; the service takes any
//! `embedded_hal::digital::OutputPin`.

use crate::error::StorageError;

// ───────────────────────────────────────────────────────────────
// Clock port (driven adapter: monotonic time → domain)
// ───────────────────────────────────────────────────────────────

/// Monotonic microsecond time source.
///
/// Must be the same clock the edge interrupts timestamp with; edge handlers
/// store its low 32 bits.
pub trait Clock {
    fn now_us(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → publishing / logging)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`MeterEvent`](super::events::MeterEvent)s
/// through this port.  Adapters decide where they go (serial log, MQTT,
/// a home-automation API, etc.).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::MeterEvent);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage, used only for the opt-in energy
/// checkpoint.
///
/// Write operations MUST be atomic: no partial writes on power loss.
/// The ESP-IDF NVS API guarantees this natively; the in-memory store
/// achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}
