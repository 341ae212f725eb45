//! Trace identifiers and the immutable context carried across call boundaries.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Serialize, Serializer};

/// 128-bit trace identifier. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let value: u128 = rng.gen();
            if value != 0 {
                return Self(value);
            }
        }
    }

    /// Build from a raw value. Zero is not a valid trace id.
    pub fn from_u128(value: u128) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    /// Parse the 32-char lowercase hex form used on the wire.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 || !is_lower_hex(hex) {
            return None;
        }
        u128::from_str_radix(hex, 16).ok().and_then(Self::from_u128)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit span identifier. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let value: u64 = rng.gen();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 16 || !is_lower_hex(hex) {
            return None;
        }
        u64::from_str_radix(hex, 16).ok().and_then(Self::from_u64)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Identifies the active span of a trace plus the baggage travelling with it.
///
/// Values are never mutated in place: deriving a child or adding baggage
/// returns a new context and leaves the parent valid for sibling branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    sampled: bool,
    baggage: BTreeMap<String, String>,
}

impl TraceContext {
    /// Context of a fresh root span in a new trace.
    pub fn new_root(sampled: bool) -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            sampled,
            baggage: BTreeMap::new(),
        }
    }

    /// Context received from a remote caller.
    pub fn remote(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
            baggage: BTreeMap::new(),
        }
    }

    /// Same trace and baggage, new span id.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            sampled: self.sampled,
            baggage: self.baggage.clone(),
        }
    }

    pub fn with_baggage(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.baggage.insert(key.into(), value.into());
        next
    }

    pub(crate) fn with_baggage_map(mut self, baggage: BTreeMap<String, String>) -> Self {
        self.baggage = baggage;
        self
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn baggage(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    pub fn baggage_entries(&self) -> &BTreeMap<String, String> {
        &self.baggage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_non_zero_and_hex_formatted() {
        let trace = TraceId::random();
        let span = SpanId::random();
        assert_eq!(trace.to_string().len(), 32);
        assert_eq!(span.to_string().len(), 16);
        assert_eq!(TraceId::from_hex(&trace.to_string()), Some(trace));
        assert_eq!(SpanId::from_hex(&span.to_string()), Some(span));
    }

    #[test]
    fn zero_and_uppercase_ids_rejected() {
        assert!(TraceId::from_hex(&"0".repeat(32)).is_none());
        assert!(SpanId::from_hex(&"0".repeat(16)).is_none());
        assert!(TraceId::from_hex("4BF92F3577B34DA6A3CE929D0E0E4736").is_none());
        assert!(SpanId::from_hex("00f067aa0ba902b").is_none());
    }

    #[test]
    fn child_keeps_trace_and_baggage() {
        let root = TraceContext::new_root(true).with_baggage("tenant", "acme");
        let child = root.child();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_ne!(child.span_id(), root.span_id());
        assert_eq!(child.baggage("tenant"), Some("acme"));
    }

    #[test]
    fn baggage_does_not_leak_into_parent() {
        let parent = TraceContext::new_root(true);
        let branch = parent.with_baggage("user", "alice");
        assert_eq!(branch.baggage("user"), Some("alice"));
        assert_eq!(parent.baggage("user"), None);
    }
}
