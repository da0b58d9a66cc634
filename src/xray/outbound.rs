//! Xray outbound synthesis
//!
//! Rebuilds the proxy outbound of `04_outbounds.json` from a `vless://`
//! descriptor. The document is typed only where the synthesizer reads or
//! writes; everything else rides along in flattened maps so unknown fields
//! survive the rewrite.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{PanelError, Result};
use crate::models::Endpoint;

/// Tag used when the document has no proxy outbound to take one from
pub const DEFAULT_PROXY_TAG: &str = "vless-reality";

const DIRECT_PROTOCOL: &str = "freedom";
const BLOCK_PROTOCOL: &str = "blackhole";
const DIRECT_TAG: &str = "direct";
const BLOCK_TAG: &str = "block";

/// The outbounds document as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundsDocument {
    pub outbounds: Vec<Outbound>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// One entry of `outbounds`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(default)]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(
        rename = "streamSettings",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_settings: Option<StreamSettings>,
    #[serde(default)]
    pub tag: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Outbound {
    /// Anything that is not the direct/block plumbing counts as the proxy outbound
    pub fn is_proxy(&self) -> bool {
        self.protocol != DIRECT_PROTOCOL
            && self.protocol != BLOCK_PROTOCOL
            && self.tag != DIRECT_TAG
            && self.tag != BLOCK_TAG
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealitySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<GrpcSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xhttp_settings: Option<XhttpSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_settings: Option<HttpSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spider_x: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_mode: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `xhttpSettings`; the `extra` descriptor parameter is merged into `extra` here
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XhttpSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `settings` block of a vless outbound
#[derive(Debug, Clone, Serialize)]
struct VnextSettings {
    vnext: Vec<VnextServer>,
}

#[derive(Debug, Clone, Serialize)]
struct VnextServer {
    address: String,
    port: u16,
    users: Vec<VnextUser>,
}

#[derive(Debug, Clone, Serialize)]
struct VnextUser {
    id: String,
    encryption: &'static str,
    level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow: Option<String>,
}

/// Everything a `vless://` descriptor says about the connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VlessParams {
    pub uuid: String,
    pub address: String,
    pub port: u16,
    /// `reality`, `tls` or `none`/empty
    pub security: String,
    /// `tcp`, `ws`, `grpc`, `xhttp` or `h2`; empty means `tcp`
    pub network: String,
    pub sni: String,
    pub fingerprint: String,
    pub public_key: String,
    pub short_id: String,
    pub spider_x: String,
    pub host: String,
    pub path: String,
    pub mode: String,
    pub flow: String,
    pub alpn: String,
    /// Declared user encryption; vless outbounds always write `none`
    pub encryption: String,
    /// Raw JSON object with advanced xhttp settings
    pub extra: String,
}

impl VlessParams {
    /// Parse a full `vless://` descriptor
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| PanelError::Config(e.to_string()))?;
        if url.scheme() != "vless" {
            return Err(PanelError::Config(format!(
                "not a vless descriptor (scheme {})",
                url.scheme()
            )));
        }

        let mut query: HashMap<String, String> = HashMap::new();
        for (key, value) in url.query_pairs() {
            query
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        let get = |key: &str| query.get(key).cloned().unwrap_or_default();

        let address = url.host_str().unwrap_or_default();
        let address = address
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(address);

        Ok(Self {
            uuid: urlencoding::decode(url.username())
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| url.username().to_string()),
            address: address.to_string(),
            port: url.port().unwrap_or(443),
            security: get("security"),
            network: get("type"),
            sni: get("sni"),
            fingerprint: get("fp"),
            public_key: get("pbk"),
            short_id: get("sid"),
            spider_x: get("spx"),
            host: get("host"),
            path: get("path"),
            mode: get("mode"),
            flow: get("flow"),
            alpn: get("alpn"),
            encryption: get("encryption"),
            extra: get("extra"),
        })
    }

    pub fn network_or_default(&self) -> &str {
        if self.network.is_empty() {
            "tcp"
        } else {
            &self.network
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Build the complete vless outbound for `params` under `tag`
pub fn build_outbound(params: &VlessParams, tag: &str) -> Result<Outbound> {
    let settings = VnextSettings {
        vnext: vec![VnextServer {
            address: params.address.clone(),
            port: params.port,
            users: vec![VnextUser {
                id: params.uuid.clone(),
                encryption: "none",
                level: 0,
                flow: non_empty(&params.flow),
            }],
        }],
    };

    let network = params.network_or_default().to_string();
    let mut stream = StreamSettings {
        network: Some(network.clone()),
        security: match params.security.as_str() {
            "" | "none" => None,
            other => Some(other.to_string()),
        },
        ..Default::default()
    };

    match params.security.as_str() {
        "reality" => {
            stream.reality_settings = Some(RealitySettings {
                server_name: non_empty(&params.sni),
                fingerprint: non_empty(&params.fingerprint),
                public_key: non_empty(&params.public_key),
                short_id: non_empty(&params.short_id),
                spider_x: non_empty(&params.spider_x),
                extra: Map::new(),
            });
        }
        "tls" => {
            stream.tls_settings = Some(TlsSettings {
                server_name: non_empty(&params.sni),
                fingerprint: non_empty(&params.fingerprint),
                alpn: non_empty(&params.alpn)
                    .map(|alpn| alpn.split(',').map(str::to_string).collect()),
                extra: Map::new(),
            });
        }
        _ => {}
    }

    match network.as_str() {
        "ws" => {
            stream.ws_settings = Some(WsSettings {
                path: non_empty(&params.path),
                headers: non_empty(&params.host)
                    .map(|host| BTreeMap::from([("Host".to_string(), host)])),
                extra: Map::new(),
            });
        }
        "grpc" => {
            stream.grpc_settings = Some(GrpcSettings {
                service_name: non_empty(&params.path),
                multi_mode: non_empty(&params.mode).map(|mode| mode == "multi"),
                extra: Map::new(),
            });
        }
        "xhttp" => {
            let mut xhttp = XhttpSettings {
                host: non_empty(&params.host).or_else(|| non_empty(&params.sni)),
                path: non_empty(&params.path),
                mode: non_empty(&params.mode),
                extra: Map::new(),
            };
            merge_xhttp_extra(&mut xhttp, &params.extra);
            stream.xhttp_settings = Some(xhttp);
        }
        "h2" => {
            stream.http_settings = Some(HttpSettings {
                path: non_empty(&params.path),
                host: non_empty(&params.host).map(|host| vec![host]),
                extra: Map::new(),
            });
        }
        _ => {}
    }

    Ok(Outbound {
        protocol: "vless".to_string(),
        settings: Some(serde_json::to_value(settings)?),
        stream_settings: Some(stream),
        tag: tag.to_string(),
        extra: Map::new(),
    })
}

/// Merge the `extra` JSON object key by key; keys that collide with a modelled field replace it
fn merge_xhttp_extra(xhttp: &mut XhttpSettings, extra: &str) {
    if extra.is_empty() {
        return;
    }

    let parsed: Map<String, Value> = match serde_json::from_str(extra) {
        Ok(map) => map,
        Err(e) => {
            debug!("Ignoring malformed xhttp extra: {}", e);
            return;
        }
    };

    for (key, value) in parsed {
        match (key.as_str(), value) {
            ("host", Value::String(s)) => xhttp.host = Some(s),
            ("path", Value::String(s)) => xhttp.path = Some(s),
            ("mode", Value::String(s)) => xhttp.mode = Some(s),
            (_, value) => {
                xhttp.extra.insert(key, value);
            }
        }
    }
}

/// Put `params` into the document, reusing the existing proxy outbound's tag and slot
pub fn apply_outbound(doc: &mut OutboundsDocument, params: &VlessParams) -> Result<String> {
    let existing = doc.outbounds.iter().position(Outbound::is_proxy);

    let tag = existing
        .map(|idx| doc.outbounds[idx].tag.clone())
        .filter(|tag| !tag.is_empty())
        .unwrap_or_else(|| DEFAULT_PROXY_TAG.to_string());

    let outbound = build_outbound(params, &tag)?;
    match existing {
        Some(idx) => doc.outbounds[idx] = outbound,
        None => doc.outbounds.insert(0, outbound),
    }

    // Routing lives in 05_routing.json
    doc.rest.remove("routing");
    Ok(tag)
}

pub fn read_document(path: &Path) -> Result<OutboundsDocument> {
    let raw = fs::read(path)
        .map_err(|e| PanelError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| PanelError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

fn write_document(path: &Path, doc: &OutboundsDocument) -> Result<()> {
    let json = serde_json::to_vec_pretty(doc)?;
    fs::write(path, json)?;
    Ok(())
}

/// Rewrite the proxy outbound in `path` for `endpoint`; the file is left alone on any error
#[instrument(skip(endpoint), fields(endpoint = %endpoint.name))]
pub fn write_outbound(path: &Path, endpoint: &Endpoint) -> Result<String> {
    if endpoint.raw_uri.is_empty() {
        return Err(PanelError::Config(
            "raw descriptor empty — refresh subscription".into(),
        ));
    }

    let params = VlessParams::parse(&endpoint.raw_uri)
        .map_err(|e| PanelError::Config(format!("descriptor parse failed: {}", e)))?;

    let mut doc = read_document(path)?;
    let tag = apply_outbound(&mut doc, &params)?;
    write_document(path, &doc)?;

    info!(
        "Outbound '{}' now points at {}:{} ({}/{})",
        tag,
        params.address,
        params.port,
        params.network_or_default(),
        if params.security.is_empty() { "none" } else { &params.security }
    );
    Ok(tag)
}

/// Address, port and user id the proxy outbound currently points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundTarget {
    pub tag: String,
    pub address: String,
    pub port: u16,
    pub user_id: String,
}

/// Read back the proxy outbound target from `path`
pub fn current_outbound(path: &Path) -> Result<OutboundTarget> {
    let doc = read_document(path)?;

    for outbound in doc.outbounds.iter().filter(|o| o.is_proxy()) {
        let Some(entry) = outbound
            .settings
            .as_ref()
            .and_then(|s| s.get("vnext"))
            .and_then(|v| v.get(0))
        else {
            continue;
        };

        let user_id = entry
            .get("users")
            .and_then(|u| u.get(0))
            .and_then(|u| u.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        return Ok(OutboundTarget {
            tag: outbound.tag.clone(),
            address: entry
                .get("address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            port: entry
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(0),
            user_id: user_id.to_string(),
        });
    }

    Err(PanelError::NotFound("proxy outbound not found".into()))
}
