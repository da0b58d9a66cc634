//! Subscription feed parsing
//!
//! Decodes a feed blob and turns each `vless://`, `vmess://`, `trojan://` and
//! `ss://` line into an [`Endpoint`]. Lines with unknown schemes or broken
//! structure are skipped; only a feed with no usable line at all is an error.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{PanelError, Result};
use crate::models::{Endpoint, EndpointProtocol};

/// Port assumed when a descriptor carries none
pub const DEFAULT_PORT: u16 = 443;

/// Parse a whole subscription feed into endpoints with positional ids
pub fn parse_subscription(content: &str) -> Result<Vec<Endpoint>> {
    let decoded = decode_feed(content);
    let mut endpoints: Vec<Endpoint> = Vec::new();

    for line in decoded.trim().lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(mut endpoint) = parse_descriptor(line) else {
            continue;
        };

        endpoint.id = endpoints.len();
        endpoint.raw_uri = line.to_string();
        endpoints.push(endpoint);
    }

    if endpoints.is_empty() {
        return Err(PanelError::NoEndpoints);
    }

    Ok(endpoints)
}

/// Parse a single descriptor line; `None` for unknown schemes and malformed lines
pub fn parse_descriptor(line: &str) -> Option<Endpoint> {
    let protocol = EndpointProtocol::from_uri(line)?;

    let parsed = match protocol {
        EndpointProtocol::Vless | EndpointProtocol::Trojan => parse_authority_uri(line, protocol),
        EndpointProtocol::Vmess => parse_vmess(line),
        EndpointProtocol::Shadowsocks => parse_shadowsocks(line),
    };

    match parsed {
        Ok(endpoint) => Some(endpoint),
        Err(e) => {
            debug!("Skipping {} descriptor: {}", protocol, e);
            None
        }
    }
}

/// Decode the feed blob: standard, URL-safe, then unpadded base64, else plain text
pub fn decode_feed(content: &str) -> String {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();

    let decoded = STANDARD
        .decode(&compact)
        .or_else(|_| URL_SAFE.decode(&compact))
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());

    decoded.unwrap_or_else(|| content.to_string())
}

/// `vless://id@host:port?params#name` and `trojan://password@host:port?params#name`
fn parse_authority_uri(line: &str, protocol: EndpointProtocol) -> Result<Endpoint> {
    let url = Url::parse(line).map_err(|e| PanelError::Config(e.to_string()))?;

    let host = url
        .host_str()
        .map(strip_brackets)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| PanelError::Config("missing host".into()))?;

    let port = url.port().filter(|&p| p != 0).unwrap_or(DEFAULT_PORT);
    let name = url.fragment().map(percent_decode).unwrap_or_default();

    Ok(build_endpoint(name, host, port, protocol))
}

/// `vmess://base64(json)`
fn parse_vmess(line: &str) -> Result<Endpoint> {
    let encoded = line.trim_start_matches("vmess://");
    let decoded = STANDARD
        .decode(encoded)
        .or_else(|_| STANDARD_NO_PAD.decode(encoded))
        .map_err(|e| PanelError::Config(format!("vmess base64: {}", e)))?;

    let config: Value = serde_json::from_slice(&decoded)
        .map_err(|e| PanelError::Config(format!("vmess json: {}", e)))?;

    let address = config.get("add").and_then(Value::as_str).unwrap_or_default();
    if address.is_empty() {
        return Err(PanelError::Config("vmess: missing address".into()));
    }

    let port = match config.get("port") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    };
    let port = u16::try_from(port)
        .map_err(|_| PanelError::Config(format!("vmess: port {} out of range", port)))?;
    let port = if port == 0 { DEFAULT_PORT } else { port };

    let name = config
        .get("ps")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(build_endpoint(name, address, port, EndpointProtocol::Vmess))
}

/// `ss://base64(method:password)@host:port#name` or `ss://base64(method:password@host:port)#name`
fn parse_shadowsocks(line: &str) -> Result<Endpoint> {
    let mut raw = line.trim_start_matches("ss://");

    let mut name = String::new();
    if let Some((rest, fragment)) = raw.rsplit_once('#') {
        name = percent_decode(fragment);
        raw = rest;
    }

    let host_port = match raw.rsplit_once('@') {
        Some((_credentials, host_port)) => host_port.to_string(),
        None => {
            let decoded = URL_SAFE
                .decode(raw)
                .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
                .or_else(|_| STANDARD.decode(raw))
                .map_err(|_| PanelError::Config("ss: undecodable payload".into()))?;
            let decoded = String::from_utf8_lossy(&decoded).into_owned();
            decoded
                .rsplit_once('@')
                .map(|(_, host_port)| host_port.to_string())
                .unwrap_or_default()
        }
    };

    // SIP002 links may carry `/?plugin=...` after the port
    let host_port = host_port
        .split(|c| c == '/' || c == '?')
        .next()
        .unwrap_or_default();

    let (host, port) = split_host_port(host_port)
        .ok_or_else(|| PanelError::Config("ss: missing address".into()))?;
    let port = if port == 0 { DEFAULT_PORT } else { port };

    Ok(build_endpoint(name, &host, port, EndpointProtocol::Shadowsocks))
}

fn build_endpoint(name: String, host: &str, port: u16, protocol: EndpointProtocol) -> Endpoint {
    let name = if name.is_empty() { host.to_string() } else { name };
    Endpoint::new(&name, host, port, protocol)
}

/// Split `host:port` or `[v6]:port`; an unparsable port yields `0`
fn split_host_port(host_port: &str) -> Option<(String, u16)> {
    let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        (host, after.strip_prefix(':')?)
    } else {
        let (host, port) = host_port.rsplit_once(':')?;
        if host.contains(':') {
            return None;
        }
        (host, port)
    };

    if host.is_empty() {
        return None;
    }

    Some((host.to_string(), port.parse().unwrap_or(0)))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn percent_decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vmess_line(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    #[test]
    fn test_parse_vless_reality_line() {
        let feed = "vless://uuid@1.2.3.4:443?security=reality&type=tcp&sni=example.com#MyServer\n";
        let endpoints = parse_subscription(feed).unwrap();

        assert_eq!(endpoints.len(), 1);
        let e = &endpoints[0];
        assert_eq!(e.id, 0);
        assert_eq!(e.name, "MyServer");
        assert_eq!(e.address, "1.2.3.4");
        assert_eq!(e.port, 443);
        assert_eq!(e.protocol, EndpointProtocol::Vless);
        assert_eq!(e.latency_ms, -1);
        assert!(!e.active);
        assert_eq!(e.raw_uri, feed.trim());
    }

    #[test]
    fn test_mixed_feed_preserves_order_and_dense_ids() {
        let ss_inline = format!(
            "ss://{}@5.6.7.8:8388#SS%20One",
            URL_SAFE.encode("aes-256-gcm:secret")
        );
        let ss_blob = format!(
            "ss://{}#SS-Two",
            URL_SAFE_NO_PAD.encode("chacha20-ietf-poly1305:pw@9.9.9.9:8389")
        );
        let feed = [
            "vless://id-1@a.example:8443?type=ws#Alpha".to_string(),
            "hysteria2://ignored@h.example:443".to_string(),
            vmess_line(r#"{"add":"b.example","port":"2053","ps":"Bravo","id":"x"}"#),
            "trojan://pw@c.example:443#Charlie".to_string(),
            ss_inline,
            "not a uri at all".to_string(),
            ss_blob,
        ]
        .join("\n");

        let encoded = STANDARD.encode(&feed);
        let endpoints = parse_subscription(&encoded).unwrap();

        let ids: Vec<usize> = endpoints.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        let names: Vec<&str> = endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Bravo", "Charlie", "SS One", "SS-Two"]);

        let protocols: Vec<EndpointProtocol> = endpoints.iter().map(|e| e.protocol).collect();
        assert_eq!(
            protocols,
            vec![
                EndpointProtocol::Vless,
                EndpointProtocol::Vmess,
                EndpointProtocol::Trojan,
                EndpointProtocol::Shadowsocks,
                EndpointProtocol::Shadowsocks,
            ]
        );

        assert_eq!(endpoints[1].port, 2053);
        assert_eq!(endpoints[3].address, "5.6.7.8");
        assert_eq!(endpoints[4].address, "9.9.9.9");
        assert_eq!(endpoints[4].port, 8389);
    }

    #[test]
    fn test_all_unrecognized_feed_is_an_error() {
        let feed = "hysteria2://a@b:1\ntuic://c@d:2\n";
        assert!(matches!(
            parse_subscription(feed),
            Err(PanelError::NoEndpoints)
        ));
        assert!(matches!(parse_subscription(""), Err(PanelError::NoEndpoints)));
    }

    #[test]
    fn test_feed_decoding_variants() {
        let plain = "trojan://pw@c.example:443#C";
        assert_eq!(decode_feed(plain), plain);
        assert_eq!(decode_feed(&STANDARD.encode(plain)), plain);
        assert_eq!(decode_feed(&STANDARD_NO_PAD.encode("trojan://p@h:1#x")), "trojan://p@h:1#x");

        // Line-wrapped base64 still decodes
        let encoded = STANDARD.encode("vless://u@h.example:443#Wrapped\n");
        let (a, b) = encoded.split_at(10);
        assert!(decode_feed(&format!("{}\n{}", a, b)).contains("#Wrapped"));
    }

    #[test]
    fn test_vmess_defaults_and_failures() {
        let e = parse_descriptor(&vmess_line(r#"{"add":"v.example","port":0}"#)).unwrap();
        assert_eq!(e.port, 443);
        assert_eq!(e.name, "v.example");

        let e = parse_descriptor(&vmess_line(r#"{"add":"v.example","port":8080,"ps":"V"}"#)).unwrap();
        assert_eq!(e.port, 8080);
        assert_eq!(e.name, "V");

        assert!(parse_descriptor(&vmess_line(r#"{"port":443}"#)).is_none());
        assert!(parse_descriptor(&vmess_line("not json")).is_none());
        assert!(parse_descriptor("vmess://%%%not-base64").is_none());
    }

    #[test]
    fn test_vless_defaults_name_and_port() {
        let e = parse_descriptor("vless://uuid@edge.example?security=tls").unwrap();
        assert_eq!(e.name, "edge.example");
        assert_eq!(e.port, 443);

        let e = parse_descriptor("vless://uuid@[2001:db8::1]:8443#%F0%9F%87%A9%F0%9F%87%AA%20DE").unwrap();
        assert_eq!(e.address, "2001:db8::1");
        assert_eq!(e.port, 8443);
        assert_eq!(e.name, "🇩🇪 DE");
    }

    #[test]
    fn test_shadowsocks_failures_are_skipped() {
        assert!(parse_descriptor("ss://!!!!#bad").is_none());
        let no_host = format!("ss://{}", URL_SAFE.encode("aes-128-gcm:pw"));
        assert!(parse_descriptor(&no_host).is_none());
    }

    #[test]
    fn test_shadowsocks_sip002_plugin_suffix() {
        let line = format!(
            "ss://{}@7.7.7.7:8388/?plugin=obfs-local#Obfs",
            URL_SAFE.encode("aes-128-gcm:pw")
        );
        let e = parse_descriptor(&line).unwrap();
        assert_eq!(e.address, "7.7.7.7");
        assert_eq!(e.port, 8388);
        assert_eq!(e.name, "Obfs");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("h:80"), Some(("h".to_string(), 80)));
        assert_eq!(split_host_port("[::1]:80"), Some(("::1".to_string(), 80)));
        assert_eq!(split_host_port("h:abc"), Some(("h".to_string(), 0)));
        assert_eq!(split_host_port("nohost"), None);
        assert_eq!(split_host_port(":80"), None);
        assert_eq!(split_host_port("a:b:80"), None);
    }
}
