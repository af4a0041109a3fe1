//! User-facing profiles, projected from the committed document.
//!
//! There is no profile store. Every call reads the reconciler's committed
//! document and projects it, so a view can never disagree with what was
//! last confirmed live.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::document::{
    ClientEntry, ConfigurationDocument, InboundDefinition, Network, ProtocolType, Security,
};
use crate::error::{ManagerError, ManagerResult};
use crate::profiles::link::{self, LinkSettings};
use crate::reconcile::Reconciler;

/// Everything a client app needs to connect with one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileView {
    pub id: Uuid,
    pub label: Option<String>,
    pub protocol: ProtocolType,
    pub transport: Network,
    pub security: Security,
    pub connection_link: String,
    pub port: u16,
    pub server_address: String,
    pub flow: Option<String>,
    pub sni: Option<String>,
    pub public_key: Option<String>,
    pub short_id: Option<String>,
    pub fingerprint: Option<String>,
}

impl ProfileView {
    /// `None` when the inbound is not one the manager issues links for.
    pub fn project(
        inbound: &InboundDefinition,
        client: &ClientEntry,
        links: &LinkSettings,
    ) -> Option<Self> {
        let security = inbound.stream_settings.security;
        Some(Self {
            id: client.id,
            label: client.email.clone(),
            protocol: inbound.protocol_type()?,
            transport: inbound.stream_settings.network.clone(),
            security,
            connection_link: link::link_for(inbound, client, links)?,
            port: inbound.port,
            server_address: links.server_address.clone(),
            flow: client.flow.clone(),
            sni: link::sni(inbound).map(str::to_string),
            public_key: match security {
                Security::Reality => links.public_key.clone(),
                _ => None,
            },
            short_id: link::short_id(inbound).map(str::to_string),
            fingerprint: match security {
                Security::None => None,
                _ => Some(links.fingerprint.clone()),
            },
        })
    }
}

/// Every profile in `document`, inbound order then insertion order.
/// Clients of unmanaged inbounds are left out.
pub fn project_all(document: &ConfigurationDocument, links: &LinkSettings) -> Vec<ProfileView> {
    document
        .inbounds
        .iter()
        .flat_map(|inbound| {
            inbound
                .settings
                .clients
                .iter()
                .filter_map(move |client| ProfileView::project(inbound, client, links))
        })
        .collect()
}

/// One profile in `document`.
pub fn project_one(
    document: &ConfigurationDocument,
    id: &Uuid,
    links: &LinkSettings,
) -> ManagerResult<ProfileView> {
    document
        .find_client(id)
        .and_then(|(inbound, client)| ProfileView::project(inbound, client, links))
        .ok_or_else(|| ManagerError::NotFound(format!("profile {}", id)))
}

pub struct ProfileRegistry {
    reconciler: Arc<Reconciler>,
    links: LinkSettings,
}

impl ProfileRegistry {
    pub fn new(reconciler: Arc<Reconciler>, links: LinkSettings) -> Self {
        Self { reconciler, links }
    }

    pub fn links(&self) -> &LinkSettings {
        &self.links
    }

    pub fn list(&self) -> Vec<ProfileView> {
        project_all(&self.reconciler.document(), &self.links)
    }

    pub fn get(&self, id: &Uuid) -> ManagerResult<ProfileView> {
        project_one(&self.reconciler.document(), id, &self.links)
    }

    pub fn link_for(&self, id: &Uuid) -> ManagerResult<String> {
        self.get(id).map(|view| view.connection_link)
    }
}
