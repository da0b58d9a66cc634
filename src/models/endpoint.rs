use serde::{Deserialize, Serialize};

/// Latency value meaning "unknown or unreachable"
pub const LATENCY_UNKNOWN: i64 = -1;

/// Endpoint protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProtocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
}

impl EndpointProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointProtocol::Vless => "vless",
            EndpointProtocol::Vmess => "vmess",
            EndpointProtocol::Trojan => "trojan",
            EndpointProtocol::Shadowsocks => "shadowsocks",
        }
    }

    /// Match a descriptor line by its URI scheme prefix
    pub fn from_uri(line: &str) -> Option<Self> {
        if line.starts_with("vless://") {
            Some(EndpointProtocol::Vless)
        } else if line.starts_with("vmess://") {
            Some(EndpointProtocol::Vmess)
        } else if line.starts_with("trojan://") {
            Some(EndpointProtocol::Trojan)
        } else if line.starts_with("ss://") {
            Some(EndpointProtocol::Shadowsocks)
        } else {
            None
        }
    }

    /// Whether the outbound synthesizer can turn this protocol into an Xray outbound
    pub fn is_synthesizable(&self) -> bool {
        matches!(self, EndpointProtocol::Vless)
    }
}

impl std::fmt::Display for EndpointProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One proxy endpoint from the subscription feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: usize,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: EndpointProtocol,
    pub active: bool,
    pub latency_ms: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_uri: String,
}

impl Endpoint {
    /// Create an endpoint with no descriptor, unknown latency and a zero id
    pub fn new(name: &str, address: &str, port: u16, protocol: EndpointProtocol) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            address: address.to_string(),
            port,
            protocol,
            active: false,
            latency_ms: LATENCY_UNKNOWN,
            raw_uri: String::new(),
        }
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn socket_addr(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_protocol_from_uri() {
        assert_eq!(
            EndpointProtocol::from_uri("vless://id@host:443"),
            Some(EndpointProtocol::Vless)
        );
        assert_eq!(
            EndpointProtocol::from_uri("vmess://eyJhZGQiOiJ4In0="),
            Some(EndpointProtocol::Vmess)
        );
        assert_eq!(
            EndpointProtocol::from_uri("trojan://pw@host:443"),
            Some(EndpointProtocol::Trojan)
        );
        assert_eq!(
            EndpointProtocol::from_uri("ss://YWVzOnB3@host:8388"),
            Some(EndpointProtocol::Shadowsocks)
        );
        assert_eq!(EndpointProtocol::from_uri("hysteria2://host:443"), None);
        assert_eq!(EndpointProtocol::from_uri("VLESS://id@host:443"), None);
    }

    #[test]
    fn test_only_vless_is_synthesizable() {
        assert!(EndpointProtocol::Vless.is_synthesizable());
        assert!(!EndpointProtocol::Vmess.is_synthesizable());
        assert!(!EndpointProtocol::Trojan.is_synthesizable());
        assert!(!EndpointProtocol::Shadowsocks.is_synthesizable());
        assert_eq!(EndpointProtocol::Shadowsocks.to_string(), "shadowsocks");
    }

    #[test]
    fn test_endpoint_serializes_latency_and_omits_empty_raw_uri() {
        let endpoint = Endpoint::new("Frankfurt", "1.2.3.4", 443, EndpointProtocol::Vless);
        let json = serde_json::to_value(&endpoint).unwrap();

        assert_eq!(json["latency_ms"], -1);
        assert_eq!(json["protocol"], "vless");
        assert!(json.get("raw_uri").is_none());
    }

    #[test]
    fn test_socket_addr_brackets_ipv6() {
        let v4 = Endpoint::new("a", "1.2.3.4", 443, EndpointProtocol::Trojan);
        assert_eq!(v4.socket_addr(), "1.2.3.4:443");

        let v6 = Endpoint::new("b", "2001:db8::1", 8443, EndpointProtocol::Trojan);
        assert_eq!(v6.socket_addr(), "[2001:db8::1]:8443");
    }
}
