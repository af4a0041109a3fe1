//! Structural edits against a [`ConfigurationDocument`].
//!
//! An edit maps the current document to a candidate and must have no side
//! effects: identities are generated by the caller before the edit is built,
//! so applying the same edit to the same document always yields the same
//! candidate.

use uuid::Uuid;

use crate::document::model::{
    ClientEntry, ConfigurationDocument, GrpcSettings, InboundDefinition, InboundProtocol, Network,
    ProtocolVariant, WsSettings, XhttpSettings,
};
use crate::error::ManagerError;

/// A pure document transformation.
pub trait Edit: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    fn apply(&self, current: &ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError>;
}

impl<F> Edit for F
where
    F: Fn(&ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError> + Send + Sync,
{
    fn describe(&self) -> String {
        "custom edit".to_string()
    }

    fn apply(&self, current: &ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError> {
        self(current)
    }
}

pub const MIN_LABEL_LEN: usize = 3;
pub const MAX_LABEL_LEN: usize = 100;

/// Trim and lower-case a user label, enforcing its length bounds.
pub fn sanitize_label(raw: &str) -> Result<String, ManagerError> {
    let label = raw.trim().to_lowercase();
    let len = label.chars().count();
    if !(MIN_LABEL_LEN..=MAX_LABEL_LEN).contains(&len) {
        return Err(ManagerError::InvalidEdit(format!(
            "label must be {}-{} characters, got {}",
            MIN_LABEL_LEN, MAX_LABEL_LEN, len
        )));
    }
    Ok(label)
}

/// Append a new client to an inbound (the first one when no port is given).
#[derive(Debug, Clone)]
pub struct AddClient {
    pub id: Uuid,
    pub label: String,
    pub port: Option<u16>,
    /// Flow attached on VLESS+REALITY inbounds.
    pub reality_flow: String,
}

impl Edit for AddClient {
    fn describe(&self) -> String {
        format!("add client {} ({})", self.id, self.label)
    }

    fn apply(&self, current: &ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError> {
        let mut doc = current.clone();

        if doc.find_client(&self.id).is_some() {
            return Err(ManagerError::Conflict(format!(
                "client identity {} already exists",
                self.id
            )));
        }

        let inbound = match self.port {
            Some(port) => {
                let inbound = doc
                    .inbound_mut(port)
                    .ok_or_else(|| ManagerError::NotFound(format!("inbound on port {}", port)))?;
                if !inbound.is_managed() {
                    return Err(unmanaged(inbound));
                }
                inbound
            }
            None => doc
                .inbounds
                .iter_mut()
                .find(|i| i.is_managed())
                .ok_or_else(|| {
                    ManagerError::InvalidEdit("document has no inbound that accepts clients".into())
                })?,
        };

        let taken = inbound
            .settings
            .clients
            .iter()
            .any(|c| c.email.as_deref() == Some(self.label.as_str()));
        if taken {
            return Err(ManagerError::Conflict(format!(
                "label '{}' already exists on {}",
                self.label,
                inbound.display_name()
            )));
        }

        let mut client = ClientEntry::new(self.id, Some(self.label.clone()));
        if inbound.protocol == InboundProtocol::Vless
            && inbound.variant() == ProtocolVariant::Reality
        {
            client.flow = Some(self.reality_flow.clone());
        }
        if inbound.protocol == InboundProtocol::Trojan {
            client.password = Some(self.id.to_string());
        }
        inbound.settings.clients.push(client);

        Ok(doc)
    }
}

/// Remove a client by identity, wherever it lives.
#[derive(Debug, Clone)]
pub struct RemoveClient {
    pub id: Uuid,
}

impl Edit for RemoveClient {
    fn describe(&self) -> String {
        format!("remove client {}", self.id)
    }

    fn apply(&self, current: &ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError> {
        let mut doc = current.clone();
        let owner = doc
            .inbounds
            .iter_mut()
            .find(|i| i.client(&self.id).is_some())
            .ok_or_else(|| ManagerError::NotFound(format!("profile {}", self.id)))?;
        owner.settings.clients.retain(|c| c.id != self.id);
        Ok(doc)
    }
}

/// Fields of an inbound's transport/security settings that may be changed.
/// `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct TransportPatch {
    /// ws / xhttp path.
    pub path: Option<String>,
    /// ws Host header or xhttp host.
    pub host: Option<String>,
    /// gRPC service name.
    pub service_name: Option<String>,
    /// TLS server name.
    pub server_name: Option<String>,
    /// REALITY camouflage destination.
    pub dest: Option<String>,
    /// REALITY accepted server names.
    pub server_names: Option<Vec<String>>,
    /// REALITY short ids.
    pub short_ids: Option<Vec<String>>,
}

impl TransportPatch {
    pub fn is_empty(&self) -> bool {
        self.path.is_none()
            && self.host.is_none()
            && self.service_name.is_none()
            && self.server_name.is_none()
            && self.dest.is_none()
            && self.server_names.is_none()
            && self.short_ids.is_none()
    }
}

/// Change transport settings of the inbound listening on `port`.
#[derive(Debug, Clone)]
pub struct SetTransport {
    pub port: u16,
    pub patch: TransportPatch,
}

impl Edit for SetTransport {
    fn describe(&self) -> String {
        format!("change transport on port {}", self.port)
    }

    fn apply(&self, current: &ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError> {
        if self.patch.is_empty() {
            return Err(ManagerError::InvalidEdit("transport patch changes nothing".into()));
        }
        let mut doc = current.clone();
        let inbound = doc
            .inbound_mut(self.port)
            .ok_or_else(|| ManagerError::NotFound(format!("inbound on port {}", self.port)))?;
        if !inbound.is_managed() {
            return Err(unmanaged(inbound));
        }
        patch_inbound(inbound, &self.patch)?;
        Ok(doc)
    }
}

fn unmanaged(inbound: &InboundDefinition) -> ManagerError {
    ManagerError::InvalidEdit(format!(
        "{} ({} over {}) is not managed",
        inbound.display_name(),
        inbound.protocol,
        inbound.stream_settings.network.as_str()
    ))
}

fn patch_inbound(inbound: &mut InboundDefinition, patch: &TransportPatch) -> Result<(), ManagerError> {
    let name = inbound.display_name();
    let stream = &mut inbound.stream_settings;
    let mismatch = |field: &str, why: &str| {
        ManagerError::InvalidEdit(format!("{} cannot set {}: {}", name, field, why))
    };

    if patch.path.is_some() || patch.host.is_some() {
        match &stream.network {
            Network::Ws => {
                let ws = stream.ws_settings.get_or_insert_with(WsSettings::default);
                if let Some(path) = &patch.path {
                    ws.path = Some(path.clone());
                }
                if let Some(host) = &patch.host {
                    ws.headers.insert("Host".to_string(), host.clone());
                }
            }
            Network::Xhttp => {
                let xhttp = stream.xhttp_settings.get_or_insert_with(XhttpSettings::default);
                if let Some(path) = &patch.path {
                    xhttp.path = Some(path.clone());
                }
                if let Some(host) = &patch.host {
                    xhttp.host = Some(host.clone());
                }
            }
            other => return Err(mismatch("path/host", &format!("network is {}", other.as_str()))),
        }
    }

    if let Some(service_name) = &patch.service_name {
        if stream.network != Network::Grpc {
            return Err(mismatch("service name", "network is not grpc"));
        }
        stream
            .grpc_settings
            .get_or_insert_with(GrpcSettings::default)
            .service_name = Some(service_name.clone());
    }

    if let Some(server_name) = &patch.server_name {
        let tls = stream
            .tls_settings
            .as_mut()
            .ok_or_else(|| mismatch("server name", "inbound has no TLS settings"))?;
        tls.server_name = Some(server_name.clone());
    }

    if patch.dest.is_some() || patch.server_names.is_some() || patch.short_ids.is_some() {
        let reality = stream
            .reality_settings
            .as_mut()
            .ok_or_else(|| mismatch("camouflage settings", "inbound is not REALITY"))?;
        if let Some(dest) = &patch.dest {
            reality.dest = Some(dest.clone());
        }
        if let Some(names) = &patch.server_names {
            if names.is_empty() {
                return Err(mismatch("server names", "list must not be empty"));
            }
            reality.server_names = names.clone();
        }
        if let Some(ids) = &patch.short_ids {
            reality.short_ids = ids.clone();
        }
    }

    Ok(())
}

/// Add a whole inbound.
#[derive(Debug, Clone)]
pub struct AddInbound(pub InboundDefinition);

impl Edit for AddInbound {
    fn describe(&self) -> String {
        format!("add {}", self.0.display_name())
    }

    fn apply(&self, current: &ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError> {
        if current.inbound(self.0.port).is_some() {
            return Err(ManagerError::Conflict(format!(
                "port {} is already in use",
                self.0.port
            )));
        }
        let mut doc = current.clone();
        doc.inbounds.push(self.0.clone());
        Ok(doc)
    }
}

/// Remove an inbound. Refused when it is the last one.
#[derive(Debug, Clone)]
pub struct RemoveInbound {
    pub port: u16,
}

impl Edit for RemoveInbound {
    fn describe(&self) -> String {
        format!("remove inbound on port {}", self.port)
    }

    fn apply(&self, current: &ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError> {
        if current.inbound(self.port).is_none() {
            return Err(ManagerError::NotFound(format!("inbound on port {}", self.port)));
        }
        if current.inbounds.len() == 1 {
            return Err(ManagerError::InvalidEdit(
                "cannot remove the last inbound".to_string(),
            ));
        }
        let mut doc = current.clone();
        doc.inbounds.retain(|i| i.port != self.port);
        Ok(doc)
    }
}

/// Swap in an entire document. Used by restore.
#[derive(Debug, Clone)]
pub struct ReplaceDocument(pub ConfigurationDocument);

impl Edit for ReplaceDocument {
    fn describe(&self) -> String {
        format!("replace document ({} inbounds)", self.0.inbounds.len())
    }

    fn apply(&self, _current: &ConfigurationDocument) -> Result<ConfigurationDocument, ManagerError> {
        Ok(self.0.clone())
    }
}
