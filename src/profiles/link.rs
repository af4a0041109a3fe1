//! Connection strings for client apps.
//!
//! `vless://` and `trojan://` follow the de-facto share-link format
//! (parameters in the query, label in the fragment). `vmess://` is the
//! base64 JSON form. Output depends only on the inputs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use url::form_urlencoded;

use crate::document::{ClientEntry, InboundDefinition, InboundProtocol, Network, Security};

/// Fallback fragment for clients without a label.
const UNLABELLED: &str = "user";

/// Server-side facts that are not in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub server_address: String,
    /// REALITY public key; omitted from links when unknown.
    pub public_key: Option<String>,
    pub fingerprint: String,
}

/// `None` for inbounds the manager does not manage.
pub fn link_for(
    inbound: &InboundDefinition,
    client: &ClientEntry,
    settings: &LinkSettings,
) -> Option<String> {
    if !inbound.is_managed() {
        return None;
    }
    let link = match inbound.protocol {
        InboundProtocol::Vless => uri_link("vless", &client.id.to_string(), inbound, client, settings),
        InboundProtocol::Trojan => {
            let id = client.id.to_string();
            let password = client.password.as_deref().unwrap_or(&id);
            uri_link("trojan", password, inbound, client, settings)
        }
        InboundProtocol::Vmess => vmess_link(inbound, client, settings),
        InboundProtocol::Other(_) => return None,
    };
    Some(link)
}

/// Host as it appears in an authority: IPv6 literals are bracketed.
pub fn authority_host(address: &str) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{}]", address)
    } else {
        address.to_string()
    }
}

/// Server name clients should present, if the inbound has one.
pub fn sni(inbound: &InboundDefinition) -> Option<&str> {
    let stream = &inbound.stream_settings;
    match stream.security {
        Security::Reality => stream
            .reality_settings
            .as_ref()
            .and_then(|r| r.server_names.first())
            .map(String::as_str),
        Security::Tls => stream.tls_settings.as_ref().and_then(|t| t.server_name.as_deref()),
        Security::None => None,
    }
}

pub fn short_id(inbound: &InboundDefinition) -> Option<&str> {
    inbound
        .stream_settings
        .reality_settings
        .as_ref()
        .and_then(|r| r.short_ids.first())
        .map(String::as_str)
}

/// (path, host) of the transport, where it has them.
fn transport_path_host(inbound: &InboundDefinition) -> (Option<&str>, Option<&str>) {
    let stream = &inbound.stream_settings;
    match &stream.network {
        Network::Ws => match &stream.ws_settings {
            Some(ws) => (
                ws.path.as_deref(),
                ws.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("host"))
                    .map(|(_, v)| v.as_str()),
            ),
            None => (None, None),
        },
        Network::Xhttp => match &stream.xhttp_settings {
            Some(x) => (x.path.as_deref(), x.host.as_deref()),
            None => (None, None),
        },
        _ => (None, None),
    }
}

fn uri_link(
    scheme: &str,
    user: &str,
    inbound: &InboundDefinition,
    client: &ClientEntry,
    settings: &LinkSettings,
) -> String {
    let stream = &inbound.stream_settings;
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("type", stream.network.as_str());
    if inbound.protocol == InboundProtocol::Vless {
        query.append_pair("encryption", "none");
    }
    query.append_pair("security", stream.security.as_str());

    let (path, host) = transport_path_host(inbound);
    if let Some(path) = path {
        query.append_pair("path", path);
    }
    if let Some(host) = host {
        query.append_pair("host", host);
    }
    if let Some(mode) = stream.xhttp_settings.as_ref().and_then(|x| x.mode.as_deref()) {
        if stream.network == Network::Xhttp {
            query.append_pair("mode", mode);
        }
    }
    if stream.network == Network::Grpc {
        if let Some(name) = stream.grpc_settings.as_ref().and_then(|g| g.service_name.as_deref()) {
            query.append_pair("serviceName", name);
        }
    }

    if stream.security != Security::None {
        if let Some(sni) = sni(inbound) {
            query.append_pair("sni", sni);
        }
        query.append_pair("fp", &settings.fingerprint);
    }
    if stream.security == Security::Reality {
        if let Some(key) = &settings.public_key {
            query.append_pair("pbk", key);
        }
        if let Some(sid) = short_id(inbound) {
            query.append_pair("sid", sid);
        }
    }
    if let Some(flow) = &client.flow {
        query.append_pair("flow", flow);
    }

    format!(
        "{}://{}@{}:{}?{}#{}",
        scheme,
        encode_component(user),
        authority_host(&settings.server_address),
        inbound.port,
        query.finish(),
        encode_component(client.email.as_deref().unwrap_or(UNLABELLED)),
    )
}

fn vmess_link(inbound: &InboundDefinition, client: &ClientEntry, settings: &LinkSettings) -> String {
    let stream = &inbound.stream_settings;
    let (path, host) = transport_path_host(inbound);
    let tls = if stream.security == Security::Tls { "tls" } else { "" };

    let body = json!({
        "v": "2",
        "ps": client.email.as_deref().unwrap_or(UNLABELLED),
        "add": settings.server_address,
        "port": inbound.port.to_string(),
        "id": client.id.to_string(),
        "aid": "0",
        "scy": "auto",
        "net": stream.network.as_str(),
        "type": "none",
        "host": host.unwrap_or(""),
        "path": path.unwrap_or(""),
        "tls": tls,
        "sni": sni(inbound).unwrap_or(""),
    });
    format!("vmess://{}", STANDARD.encode(body.to_string()))
}

/// Percent-encode for the userinfo or fragment (spaces as `%20`).
fn encode_component(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::fixtures;
    use crate::document::ConfigurationDocument;
    use serde_json::Value;

    fn settings() -> LinkSettings {
        LinkSettings {
            server_address: "203.0.113.7".to_string(),
            public_key: Some("pUbKeY".to_string()),
            fingerprint: "chrome".to_string(),
        }
    }

    fn reality() -> ConfigurationDocument {
        ConfigurationDocument::from_slice(fixtures::REALITY.as_bytes()).unwrap()
    }

    #[test]
    fn test_reality_link() {
        let doc = reality();
        let inbound = &doc.inbounds[0];
        let link = link_for(inbound, &inbound.settings.clients[0], &settings()).unwrap();
        assert_eq!(
            link,
            "vless://0f8e6b8c-3c1b-4d4e-9a43-3a8f3b9f1a11@203.0.113.7:443\
             ?type=tcp&encryption=none&security=reality&sni=www.microsoft.com&fp=chrome\
             &pbk=pUbKeY&sid=6ba85179e30d4fc2&flow=xtls-rprx-vision#bob"
        );
    }

    #[test]
    fn test_ws_link_and_ipv6() {
        let mut doc = reality();
        let inbound = &mut doc.inbounds[0];
        inbound.stream_settings.security = Security::None;
        inbound.stream_settings.network = Network::Ws;
        inbound.stream_settings.ws_settings = Some(crate::document::model::WsSettings {
            path: Some("/ray".to_string()),
            ..Default::default()
        });
        inbound.settings.clients[0].flow = None;
        inbound.settings.clients[0].email = Some("bob smith".to_string());

        let settings = LinkSettings {
            server_address: "2001:db8::1".to_string(),
            ..settings()
        };
        let link = link_for(&doc.inbounds[0], &doc.inbounds[0].settings.clients[0], &settings).unwrap();
        assert!(link.starts_with("vless://0f8e6b8c-3c1b-4d4e-9a43-3a8f3b9f1a11@[2001:db8::1]:443?"));
        assert!(link.contains("type=ws&encryption=none&security=none&path=%2Fray"));
        assert!(!link.contains("fp="));
        assert!(link.ends_with("#bob%20smith"));
    }

    #[test]
    fn test_trojan_uses_password() {
        let mut doc = reality();
        let inbound = &mut doc.inbounds[0];
        inbound.protocol = InboundProtocol::Trojan;
        inbound.stream_settings.security = Security::Tls;
        inbound.stream_settings.reality_settings = None;
        inbound.settings.clients[0].password = Some("s3cret".to_string());

        let link = link_for(&doc.inbounds[0], &doc.inbounds[0].settings.clients[0], &settings()).unwrap();
        assert!(link.starts_with("trojan://s3cret@203.0.113.7:443?type=tcp&security=tls"));
        assert!(!link.contains("encryption"));
        assert!(!link.contains("pbk"));
    }

    #[test]
    fn test_vmess_is_base64_json() {
        let mut doc = reality();
        let inbound = &mut doc.inbounds[0];
        inbound.protocol = InboundProtocol::Vmess;
        inbound.stream_settings.security = Security::None;
        inbound.stream_settings.network = Network::Ws;

        let link = link_for(&doc.inbounds[0], &doc.inbounds[0].settings.clients[0], &settings()).unwrap();
        let encoded = link.strip_prefix("vmess://").unwrap();
        let body: Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(body["ps"], "bob");
        assert_eq!(body["port"], "443");
        assert_eq!(body["net"], "ws");
        assert_eq!(body["tls"], "");
        assert_eq!(body["id"], "0f8e6b8c-3c1b-4d4e-9a43-3a8f3b9f1a11");
    }

    #[test]
    fn test_link_is_deterministic() {
        let doc = reality();
        let inbound = &doc.inbounds[0];
        let a = link_for(inbound, &inbound.settings.clients[0], &settings());
        let b = link_for(inbound, &inbound.settings.clients[0], &settings());
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_link_for_unmanaged_transport() {
        let doc = ConfigurationDocument::from_slice(fixtures::MIXED.as_bytes()).unwrap();
        let upgrade = &doc.inbounds[2];
        assert!(link_for(upgrade, &upgrade.settings.clients[0], &settings()).is_none());
    }
}
