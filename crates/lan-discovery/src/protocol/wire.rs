//! Datagram formats for the probe/response exchange.
//!
//! ```text
//! probe:      DISCOVER_REQUEST
//! broadcast:  DISCOVER_RESPONSE;<ip>;<port>
//! multicast:  DISCOVER_RESPONSE_JSON;{"schema":"tcp","ip":"<ip>","port":<port>}
//! ```
//!
//! Payloads are UTF-8 and compared after trimming surrounding whitespace.
//! Anything that does not match exactly is a non-match, never an error.

use crate::endpoint::Endpoint;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Probe token sent by clients.
pub const DISCOVER_REQUEST: &str = "DISCOVER_REQUEST";

/// Prefix of a broadcast response.
pub const BROADCAST_RESPONSE_PREFIX: &str = "DISCOVER_RESPONSE;";

/// Prefix of a multicast response.
pub const MULTICAST_RESPONSE_PREFIX: &str = "DISCOVER_RESPONSE_JSON;";

/// Largest datagram either side expects to receive.
pub const MAX_DATAGRAM: usize = 1024;

/// An endpoint advertised in a probe response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Where the service can be reached.
    pub endpoint: Endpoint,
    /// Protocol tag, present only in the multicast format.
    pub schema: Option<String>,
}

/// The structured record carried by multicast responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Protocol the endpoint speaks, e.g. `tcp`.
    pub schema: String,
    /// Advertised address.
    pub ip: IpAddr,
    /// Advertised port.
    pub port: u16,
}

/// Response encoding used by a probe transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFormat {
    /// `DISCOVER_RESPONSE;ip;port`
    Delimited,
    /// `DISCOVER_RESPONSE_JSON;{schema, ip, port}` with the given schema.
    Json {
        /// Schema placed in outgoing responses.
        schema: String,
    },
}

impl WireFormat {
    /// Encode a response advertising `endpoint`.
    #[must_use]
    pub fn encode_response(&self, endpoint: &Endpoint) -> String {
        match self {
            WireFormat::Delimited => format!(
                "{}{};{}",
                BROADCAST_RESPONSE_PREFIX, endpoint.ip, endpoint.port
            ),
            WireFormat::Json { schema } => {
                let record = ServiceRecord {
                    schema: schema.clone(),
                    ip: endpoint.ip,
                    port: endpoint.port,
                };
                // Serializing a plain record cannot fail.
                let json = serde_json::to_string(&record).unwrap_or_default();
                format!("{}{}", MULTICAST_RESPONSE_PREFIX, json)
            }
        }
    }

    /// Parse a response datagram, returning `None` for anything malformed.
    #[must_use]
    pub fn parse_response(&self, datagram: &[u8]) -> Option<Advertisement> {
        match self {
            WireFormat::Delimited => parse_delimited(datagram).map(|endpoint| Advertisement {
                endpoint,
                schema: None,
            }),
            WireFormat::Json { .. } => parse_json(datagram).map(|record| Advertisement {
                endpoint: Endpoint::new(record.ip, record.port),
                schema: Some(record.schema),
            }),
        }
    }
}

fn text(datagram: &[u8]) -> Option<&str> {
    std::str::from_utf8(datagram).ok().map(str::trim)
}

/// Whether `datagram` is exactly the probe token.
#[must_use]
pub fn is_probe(datagram: &[u8]) -> bool {
    text(datagram) == Some(DISCOVER_REQUEST)
}

/// Parse `DISCOVER_RESPONSE;ip;port`.
#[must_use]
pub fn parse_delimited(datagram: &[u8]) -> Option<Endpoint> {
    let payload = text(datagram)?.strip_prefix(BROADCAST_RESPONSE_PREFIX)?;
    let mut parts = payload.split(';');
    let ip = parts.next()?.trim().parse::<IpAddr>().ok()?;
    let port = parts.next()?.trim().parse::<u16>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let endpoint = Endpoint::new(ip, port);
    endpoint.is_valid().then_some(endpoint)
}

/// Parse `DISCOVER_RESPONSE_JSON;{...}`. All three fields are required.
#[must_use]
pub fn parse_json(datagram: &[u8]) -> Option<ServiceRecord> {
    let payload = text(datagram)?.strip_prefix(MULTICAST_RESPONSE_PREFIX)?;
    let record: ServiceRecord = serde_json::from_str(payload).ok()?;
    Endpoint::new(record.ip, record.port)
        .is_valid()
        .then_some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_probe_token() {
        assert!(is_probe(b"DISCOVER_REQUEST"));
        assert!(is_probe(b"DISCOVER_REQUEST\r\n"));
        assert!(!is_probe(b"DISCOVER_REQUESTS"));
        assert!(!is_probe(b"discover_request"));
        assert!(!is_probe(&[0xff, 0xfe]));
    }

    #[test]
    fn test_parse_broadcast_response() {
        let endpoint = parse_delimited(b"DISCOVER_RESPONSE;192.168.1.10;16000").unwrap();
        assert_eq!(endpoint, Endpoint::new(Ipv4Addr::new(192, 168, 1, 10), 16000));
    }

    #[test]
    fn test_parse_broadcast_rejects_malformed() {
        assert!(parse_delimited(b"DISCOVER_RESPONSE;192.168.1.10").is_none());
        assert!(parse_delimited(b"DISCOVER_RESPONSE;192.168.1.10;16000;x").is_none());
        assert!(parse_delimited(b"DISCOVER_RESPONSE;not-an-ip;16000").is_none());
        assert!(parse_delimited(b"DISCOVER_RESPONSE;192.168.1.10;99999").is_none());
        assert!(parse_delimited(b"DISCOVER_RESPONSE;192.168.1.10;0").is_none());
        assert!(parse_delimited(b"HELLO;192.168.1.10;16000").is_none());
        assert!(parse_delimited(b"DISCOVER_REQUEST").is_none());
    }

    #[test]
    fn test_parse_multicast_response() {
        let record =
            parse_json(br#"DISCOVER_RESPONSE_JSON;{"schema":"tcp","ip":"10.1.2.3","port":16000}"#)
                .unwrap();
        assert_eq!(record.schema, "tcp");
        assert_eq!(record.ip, IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(record.port, 16000);
    }

    #[test]
    fn test_parse_multicast_missing_schema() {
        assert!(parse_json(br#"DISCOVER_RESPONSE_JSON;{"ip":"10.1.2.3","port":16000}"#).is_none());
        assert!(parse_json(br#"DISCOVER_RESPONSE_JSON;{"schema":"tcp","ip":"10.1.2.3"}"#).is_none());
        assert!(parse_json(b"DISCOVER_RESPONSE_JSON;{not json").is_none());
        // The broadcast format is not accepted by the multicast parser.
        assert!(parse_json(b"DISCOVER_RESPONSE;10.1.2.3;16000").is_none());
    }

    #[test]
    fn test_formats_parse_their_own_encoding() {
        let endpoint = Endpoint::new(Ipv4Addr::new(172, 16, 0, 9), 16000);

        let delimited = WireFormat::Delimited;
        let encoded = delimited.encode_response(&endpoint);
        assert_eq!(encoded, "DISCOVER_RESPONSE;172.16.0.9;16000");
        let parsed = delimited.parse_response(encoded.as_bytes()).unwrap();
        assert_eq!(parsed.endpoint, endpoint);
        assert!(parsed.schema.is_none());

        let json = WireFormat::Json {
            schema: "tcp".to_string(),
        };
        let encoded = json.encode_response(&endpoint);
        assert!(encoded.starts_with(MULTICAST_RESPONSE_PREFIX));
        let parsed = json.parse_response(encoded.as_bytes()).unwrap();
        assert_eq!(parsed.endpoint, endpoint);
        assert_eq!(parsed.schema.as_deref(), Some("tcp"));

        // Each format rejects the other's responses.
        assert!(delimited.parse_response(encoded.as_bytes()).is_none());
    }
}
