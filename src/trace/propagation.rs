//! W3C Trace Context and Baggage propagation.
//!
//! # Responsibilities
//! - Write `traceparent` / `baggage` into outbound call metadata
//! - Read them back from inbound RPC metadata or HTTP headers
//!
//! # Design Decisions
//! - Malformed or unsupported headers are ignored; the callee starts a root span
//! - Baggage entries that cannot be encoded safely are dropped, not escaped

use std::collections::{BTreeMap, HashMap};

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::trace::context::{SpanId, TraceContext, TraceId};

pub const TRACEPARENT: &str = "traceparent";
pub const BAGGAGE: &str = "baggage";

const VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

/// Key/value view over call metadata.
pub trait Carrier {
    fn get(&self, key: &str) -> Option<&str>;
    fn set(&mut self, key: &str, value: String);
}

impl Carrier for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}

impl Carrier for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|v| v.to_str().ok())
    }

    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.insert(name, value);
        }
    }
}

/// Write the context into the carrier.
pub fn inject(context: &TraceContext, carrier: &mut impl Carrier) {
    carrier.set(TRACEPARENT, format_traceparent(context));
    if !context.baggage_entries().is_empty() {
        carrier.set(BAGGAGE, format_baggage(context.baggage_entries()));
    }
}

/// Read a remote context from the carrier, if a valid one is present.
pub fn extract(carrier: &impl Carrier) -> Option<TraceContext> {
    let context = parse_traceparent(carrier.get(TRACEPARENT)?)?;
    let baggage = carrier.get(BAGGAGE).map(parse_baggage).unwrap_or_default();
    Some(context.with_baggage_map(baggage))
}

pub fn format_traceparent(context: &TraceContext) -> String {
    let flags = if context.is_sampled() { FLAG_SAMPLED } else { 0 };
    format!(
        "{}-{}-{}-{:02x}",
        VERSION,
        context.trace_id(),
        context.span_id(),
        flags
    )
}

pub fn parse_traceparent(value: &str) -> Option<TraceContext> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = TraceId::from_hex(parts.next()?)?;
    let span_id = SpanId::from_hex(parts.next()?)?;
    let flags = parts.next()?;

    // Only version 00 is understood; "ff" is never a valid version.
    if version != VERSION || parts.next().is_some() || flags.len() != 2 {
        return None;
    }
    let flags = u8::from_str_radix(flags, 16).ok()?;

    Some(TraceContext::remote(
        trace_id,
        span_id,
        flags & FLAG_SAMPLED != 0,
    ))
}

pub fn format_baggage(entries: &BTreeMap<String, String>) -> String {
    entries
        .iter()
        .filter(|(k, v)| is_token(k) && is_baggage_value(v))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_baggage(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .filter_map(|member| {
            // Properties after ';' are not carried.
            let member = member.split(';').next()?.trim();
            let (key, value) = member.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            (is_token(key) && is_baggage_value(value))
                .then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

fn is_baggage_value(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_graphic() && b != b',' && b != b';' && b != b'"' && b != b'\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn parses_reference_traceparent() {
        let ctx = parse_traceparent(SAMPLE).unwrap();
        assert_eq!(ctx.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id().to_string(), "00f067aa0ba902b7");
        assert!(ctx.is_sampled());
        assert_eq!(format_traceparent(&ctx), SAMPLE);
    }

    #[test]
    fn rejects_malformed_traceparent() {
        assert!(parse_traceparent("").is_none());
        assert!(parse_traceparent("01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01").is_none());
        assert!(parse_traceparent("00-00000000000000000000000000000000-00f067aa0ba902b7-01").is_none());
        assert!(parse_traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7").is_none());
        assert!(parse_traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-xx").is_none());
    }

    #[test]
    fn unsampled_flag() {
        let ctx = parse_traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00").unwrap();
        assert!(!ctx.is_sampled());
    }

    #[test]
    fn baggage_parsing_skips_bad_members() {
        let parsed = parse_baggage("user=alice, tenant = acme;prop=1,broken,=x,sp ace=y");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["user"], "alice");
        assert_eq!(parsed["tenant"], "acme");
    }

    #[test]
    fn metadata_carrier_round_trip() {
        let ctx = TraceContext::new_root(true)
            .with_baggage("user", "alice")
            .with_baggage("region", "eu");
        let mut metadata: HashMap<String, String> = HashMap::new();
        inject(&ctx, &mut metadata);

        let extracted = extract(&metadata).unwrap();
        assert_eq!(extracted, ctx);
    }

    #[test]
    fn header_carrier_extracts() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT, HeaderValue::from_static(SAMPLE));
        headers.insert(BAGGAGE, HeaderValue::from_static("user=bob"));

        let ctx = extract(&headers).unwrap();
        assert_eq!(ctx.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.baggage("user"), Some("bob"));
    }

    #[test]
    fn missing_header_yields_none() {
        let headers = HeaderMap::new();
        assert!(extract(&headers).is_none());
    }
}
