//! Typed mirror of the xray JSON configuration.
//!
//! Only the parts the manager edits or projects are typed. Everything else
//! rides along in `extra` maps so a load/save cycle never drops fields the
//! supervised process depends on.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ManagerError;

/// The complete configuration for the supervised process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationDocument {
    #[serde(default)]
    pub log: LogSettings,

    #[serde(default)]
    pub inbounds: Vec<InboundDefinition>,

    /// Opaque pass-through.
    #[serde(default)]
    pub outbounds: Vec<Value>,

    /// Opaque pass-through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<Value>,

    /// dns, policy, stats and anything else the process understands.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loglevel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One listening endpoint.
///
/// Inbounds of protocols the manager does not issue clients for (api
/// `dokodemo-door`, socks, shadowsocks, ...) keep their `settings` untouched
/// in `settings.extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawInbound")]
pub struct InboundDefinition {
    pub port: u16,

    pub protocol: InboundProtocol,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    #[serde(default)]
    pub settings: InboundSettings,

    #[serde(
        rename = "streamSettings",
        default,
        skip_serializing_if = "StreamSettings::is_unset"
    )]
    pub stream_settings: StreamSettings,

    /// sniffing, allocate, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire form of an inbound before its settings are typed.
#[derive(Deserialize)]
struct RawInbound {
    port: u16,
    protocol: InboundProtocol,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    listen: Option<String>,
    #[serde(default)]
    settings: Map<String, Value>,
    #[serde(rename = "streamSettings", default)]
    stream_settings: StreamSettings,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RawInbound> for InboundDefinition {
    type Error = serde_json::Error;

    fn try_from(raw: RawInbound) -> Result<Self, Self::Error> {
        let settings = if raw.protocol.has_clients() {
            serde_json::from_value(Value::Object(raw.settings))?
        } else {
            InboundSettings {
                clients: Vec::new(),
                extra: raw.settings,
            }
        };
        Ok(Self {
            port: raw.port,
            protocol: raw.protocol,
            tag: raw.tag,
            listen: raw.listen,
            settings,
            stream_settings: raw.stream_settings,
            extra: raw.extra,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InboundProtocol {
    Vless,
    Vmess,
    Trojan,
    /// Passed through untouched.
    Other(String),
}

impl InboundProtocol {
    pub fn as_str(&self) -> &str {
        match self {
            InboundProtocol::Vless => "vless",
            InboundProtocol::Vmess => "vmess",
            InboundProtocol::Trojan => "trojan",
            InboundProtocol::Other(name) => name,
        }
    }

    /// Whether `settings.clients` holds UUID identities.
    pub fn has_clients(&self) -> bool {
        !matches!(self, InboundProtocol::Other(_))
    }
}

impl From<String> for InboundProtocol {
    fn from(name: String) -> Self {
        match name.as_str() {
            "vless" => InboundProtocol::Vless,
            "vmess" => InboundProtocol::Vmess,
            "trojan" => InboundProtocol::Trojan,
            _ => InboundProtocol::Other(name),
        }
    }
}

impl From<InboundProtocol> for String {
    fn from(protocol: InboundProtocol) -> Self {
        match protocol {
            InboundProtocol::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for InboundProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    /// Insertion order is display order. Omitted when empty so unmanaged
    /// inbounds keep their own `clients` shape in `extra`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<ClientEntry>,

    /// decryption, fallbacks, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One user profile. Never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub id: Uuid,

    /// Human label; unique within its inbound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,

    /// Trojan authenticates by password; mirrors `id` for those inbounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientEntry {
    pub fn new(id: Uuid, email: Option<String>) -> Self {
        Self {
            id,
            email,
            flow: None,
            password: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    #[serde(default)]
    pub network: Network,

    #[serde(default)]
    pub security: Security,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xhttp_settings: Option<XhttpSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<GrpcSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealitySettings>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamSettings {
    /// True for an inbound that had no `streamSettings` at all.
    pub fn is_unset(&self) -> bool {
        *self == StreamSettings::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Network {
    /// Also spelled `raw`.
    #[default]
    Tcp,
    Ws,
    Xhttp,
    Grpc,
    Quic,
    /// kcp, httpupgrade, splithttp, ...; passed through untouched.
    Other(String),
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Tcp => "tcp",
            Network::Ws => "ws",
            Network::Xhttp => "xhttp",
            Network::Grpc => "grpc",
            Network::Quic => "quic",
            Network::Other(name) => name,
        }
    }
}

impl From<String> for Network {
    fn from(name: String) -> Self {
        match name.as_str() {
            "tcp" | "raw" => Network::Tcp,
            "ws" => Network::Ws,
            "xhttp" => Network::Xhttp,
            "grpc" => Network::Grpc,
            "quic" => Network::Quic,
            _ => Network::Other(name),
        }
    }
}

impl From<Network> for String {
    fn from(network: Network) -> Self {
        match network {
            Network::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    #[default]
    None,
    Tls,
    Reality,
}

impl Security {
    pub fn as_str(&self) -> &'static str {
        match self {
            Security::None => "none",
            Security::Tls => "tls",
            Security::Reality => "reality",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XhttpSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// certificates, alpn, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    /// Camouflage destination, `host:port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default)]
    pub short_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Closed set of transport-security variants an inbound can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    Plain,
    Tls,
    Reality,
}

/// User-facing protocol tag reported with each profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    VlessWs,
    VlessXhttp,
    VlessReality,
    VmessWs,
    TrojanXtls,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolType::VlessWs => "vless_ws",
            ProtocolType::VlessXhttp => "vless_xhttp",
            ProtocolType::VlessReality => "vless_reality",
            ProtocolType::VmessWs => "vmess_ws",
            ProtocolType::TrojanXtls => "trojan_xtls",
        };
        f.write_str(name)
    }
}

impl InboundDefinition {
    pub fn variant(&self) -> ProtocolVariant {
        match self.stream_settings.security {
            Security::None => ProtocolVariant::Plain,
            Security::Tls => ProtocolVariant::Tls,
            Security::Reality => ProtocolVariant::Reality,
        }
    }

    /// Whether the manager can issue clients and links for this inbound.
    pub fn is_managed(&self) -> bool {
        self.protocol.has_clients() && !matches!(self.stream_settings.network, Network::Other(_))
    }

    /// `None` for inbounds the manager does not manage.
    pub fn protocol_type(&self) -> Option<ProtocolType> {
        if !self.is_managed() {
            return None;
        }
        let tag = match self.protocol {
            InboundProtocol::Vless => match (self.variant(), &self.stream_settings.network) {
                (ProtocolVariant::Reality, _) => ProtocolType::VlessReality,
                (_, Network::Xhttp) => ProtocolType::VlessXhttp,
                _ => ProtocolType::VlessWs,
            },
            InboundProtocol::Vmess => ProtocolType::VmessWs,
            InboundProtocol::Trojan => ProtocolType::TrojanXtls,
            InboundProtocol::Other(_) => return None,
        };
        Some(tag)
    }

    pub fn client(&self, id: &Uuid) -> Option<&ClientEntry> {
        self.settings.clients.iter().find(|c| &c.id == id)
    }

    /// Label used in logs and errors.
    pub fn display_name(&self) -> String {
        match &self.tag {
            Some(tag) => format!("inbound '{}' (port {})", tag, self.port),
            None => format!("inbound on port {}", self.port),
        }
    }
}

impl ConfigurationDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialized form written to disk: two-space indent, trailing newline.
    pub fn to_pretty_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn inbound(&self, port: u16) -> Option<&InboundDefinition> {
        self.inbounds.iter().find(|i| i.port == port)
    }

    pub fn inbound_mut(&mut self, port: u16) -> Option<&mut InboundDefinition> {
        self.inbounds.iter_mut().find(|i| i.port == port)
    }

    /// Locate a client and the inbound that owns it.
    pub fn find_client(&self, id: &Uuid) -> Option<(&InboundDefinition, &ClientEntry)> {
        self.inbounds
            .iter()
            .find_map(|inbound| inbound.client(id).map(|client| (inbound, client)))
    }

    /// Clients the manager issues profiles for.
    pub fn client_count(&self) -> usize {
        self.inbounds
            .iter()
            .filter(|i| i.is_managed())
            .map(|i| i.settings.clients.len())
            .sum()
    }

    /// Structural invariants that must hold for every committed document.
    pub fn check_invariants(&self) -> Result<(), ManagerError> {
        if self.inbounds.is_empty() {
            return Err(ManagerError::InvalidEdit(
                "document must keep at least one inbound".to_string(),
            ));
        }

        let mut ports = HashSet::new();
        let mut identities = HashSet::new();
        for inbound in &self.inbounds {
            if inbound.port == 0 {
                return Err(ManagerError::InvalidEdit(format!(
                    "{} has port 0; ports must be in 1-65535",
                    inbound.display_name()
                )));
            }
            if !ports.insert(inbound.port) {
                return Err(ManagerError::Conflict(format!(
                    "port {} is used by more than one inbound",
                    inbound.port
                )));
            }

            let mut labels = HashSet::new();
            for client in &inbound.settings.clients {
                if !identities.insert(client.id) {
                    return Err(ManagerError::Conflict(format!(
                        "client identity {} appears more than once",
                        client.id
                    )));
                }
                if let Some(label) = &client.email {
                    if !labels.insert(label.as_str()) {
                        return Err(ManagerError::Conflict(format!(
                            "label '{}' already exists on {}",
                            label,
                            inbound.display_name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
