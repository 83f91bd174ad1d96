//! Application registrations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use twinreg_core::{fold_case, Error, Result};

use super::{require, Registration, RegistrationState};
use crate::ids::derive_id;
use crate::reconcile::{map_eq, opt_eq, overwrite, set_eq, set_eq_ignore_case, uri_eq};

/// Role of a discovered application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    #[default]
    Server,
    Client,
    ClientAndServer,
    DiscoveryServer,
}

impl ApplicationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::ClientAndServer => "client_and_server",
            Self::DiscoveryServer => "discovery_server",
        }
    }
}

/// A server or client application found by a discoverer.
///
/// Identity is discoverer + application uri (case-insensitive) + type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRegistration {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,

    #[serde(default)]
    pub discoverer_id: Option<String>,
    pub application_uri: String,
    #[serde(default)]
    pub application_type: ApplicationType,

    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub localized_names: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub product_uri: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    /// Unordered.
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    /// Unordered.
    #[serde(default)]
    pub discovery_urls: Option<Vec<String>>,
    /// Unordered.
    #[serde(default)]
    pub host_addresses: Option<Vec<String>>,

    #[serde(default)]
    pub state: RegistrationState,
}

impl ApplicationRegistration {
    pub fn new(application_uri: impl Into<String>, application_type: ApplicationType) -> Self {
        Self {
            application_uri: application_uri.into(),
            application_type,
            ..Default::default()
        }
    }

    pub fn with_discoverer(mut self, discoverer_id: impl Into<String>) -> Self {
        self.discoverer_id = Some(discoverer_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    pub fn with_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = Some(capabilities.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_discovery_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discovery_urls = Some(urls.into_iter().map(Into::into).collect());
        self
    }
}

impl Registration for ApplicationRegistration {
    const COLLECTION: &'static str = "applications";
    const INDEXED_FIELDS: &'static [&'static str] = &[
        "discoverer_id",
        "site_id",
        "application_uri",
        "application_type",
        "application_name",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn derive_id(&self) -> String {
        derive_id(
            "app",
            &[
                self.discoverer_id.as_deref().unwrap_or_default(),
                &fold_case(&self.application_uri),
                self.application_type.as_str(),
            ],
        )
    }

    fn generation_id(&self) -> Option<&str> {
        self.generation_id.as_deref()
    }

    fn set_generation_id(&mut self, generation: Option<String>) {
        self.generation_id = generation;
    }

    fn state(&self) -> &RegistrationState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RegistrationState {
        &mut self.state
    }

    fn validate(&self) -> Result<()> {
        require("application_uri", &self.application_uri)?;
        if let Some(discoverer) = &self.discoverer_id {
            require("discoverer_id", discoverer)?;
        }
        if self
            .discovery_urls
            .iter()
            .flatten()
            .any(|url| url.trim().is_empty())
        {
            return Err(Error::invalid_argument("discovery_urls contains an empty url"));
        }
        Ok(())
    }

    fn is_logically_same(&self, other: &Self) -> bool {
        self.discoverer_id == other.discoverer_id
            && self.application_type == other.application_type
            && uri_eq(&self.application_uri, &other.application_uri)
    }

    fn is_structurally_same(&self, other: &Self) -> bool {
        self.is_logically_same(other)
            && self.application_name == other.application_name
            && self.locale == other.locale
            && self.site_id == other.site_id
            && opt_eq(&self.product_uri, &other.product_uri, |a, b| uri_eq(a, b))
            && opt_eq(&self.localized_names, &other.localized_names, |a, b| map_eq(a, b))
            && opt_eq(&self.capabilities, &other.capabilities, |a, b| {
                set_eq_ignore_case(a, b)
            })
            && opt_eq(&self.discovery_urls, &other.discovery_urls, |a, b| set_eq(a, b))
            && opt_eq(&self.host_addresses, &other.host_addresses, |a, b| set_eq(a, b))
    }

    fn apply_patch(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= overwrite(&mut self.application_name, &incoming.application_name);
        changed |= overwrite(&mut self.locale, &incoming.locale);
        changed |= overwrite(&mut self.localized_names, &incoming.localized_names);
        changed |= overwrite(&mut self.product_uri, &incoming.product_uri);
        changed |= overwrite(&mut self.site_id, &incoming.site_id);
        changed |= overwrite(&mut self.capabilities, &incoming.capabilities);
        changed |= overwrite(&mut self.discovery_urls, &incoming.discovery_urls);
        changed |= overwrite(&mut self.host_addresses, &incoming.host_addresses);
        changed
    }
}
