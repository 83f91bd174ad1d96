//! Endpoint registrations.

use serde::{Deserialize, Serialize};
use twinreg_core::{fold_case, Result};

use super::{require, Registration, RegistrationState};
use crate::ids::derive_id;
use crate::reconcile::{opt_eq, overwrite, set_eq_ignore_case, uri_eq};

/// Message security mode of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    #[default]
    None,
    Sign,
    SignAndEncrypt,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sign => "sign",
            Self::SignAndEncrypt => "sign_and_encrypt",
        }
    }
}

/// Whether an operator has enabled the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    #[default]
    Deactivated,
    Activated,
}

/// A reachable endpoint of a registered application.
///
/// Identity is application id + url (case-insensitive) + security mode and
/// policy. Activation is operator state and is never changed by a patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointRegistration {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,

    pub application_id: String,
    pub endpoint_url: String,
    #[serde(default)]
    pub security_mode: SecurityMode,
    #[serde(default)]
    pub security_policy: Option<String>,

    #[serde(default)]
    pub discoverer_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    /// Unordered.
    #[serde(default)]
    pub alternative_urls: Option<Vec<String>>,
    #[serde(default)]
    pub server_thumbprint: Option<String>,

    #[serde(default)]
    pub activation_state: ActivationState,
    #[serde(default)]
    pub state: RegistrationState,
}

impl EndpointRegistration {
    pub fn new(application_id: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            endpoint_url: endpoint_url.into(),
            ..Default::default()
        }
    }

    pub fn with_security(mut self, mode: SecurityMode, policy: impl Into<String>) -> Self {
        self.security_mode = mode;
        self.security_policy = Some(policy.into());
        self
    }

    pub fn with_discoverer(mut self, discoverer_id: impl Into<String>) -> Self {
        self.discoverer_id = Some(discoverer_id.into());
        self
    }

    pub fn with_alternative_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternative_urls = Some(urls.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_activated(&self) -> bool {
        self.activation_state == ActivationState::Activated
    }

    /// Returns false if already activated.
    pub fn activate(&mut self) -> bool {
        if self.is_activated() {
            return false;
        }
        self.activation_state = ActivationState::Activated;
        true
    }

    /// Returns false if already deactivated.
    pub fn deactivate(&mut self) -> bool {
        if !self.is_activated() {
            return false;
        }
        self.activation_state = ActivationState::Deactivated;
        true
    }
}

impl Registration for EndpointRegistration {
    const COLLECTION: &'static str = "endpoints";
    const INDEXED_FIELDS: &'static [&'static str] = &[
        "application_id",
        "discoverer_id",
        "site_id",
        "endpoint_url",
        "security_mode",
        "activation_state",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn derive_id(&self) -> String {
        derive_id(
            "ep",
            &[
                &self.application_id,
                &fold_case(&self.endpoint_url),
                self.security_mode.as_str(),
                self.security_policy.as_deref().unwrap_or_default(),
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
        require("application_id", &self.application_id)?;
        require("endpoint_url", &self.endpoint_url)
    }

    fn is_logically_same(&self, other: &Self) -> bool {
        self.application_id == other.application_id
            && self.security_mode == other.security_mode
            && self.security_policy == other.security_policy
            && uri_eq(&self.endpoint_url, &other.endpoint_url)
    }

    fn is_structurally_same(&self, other: &Self) -> bool {
        self.is_logically_same(other)
            && self.discoverer_id == other.discoverer_id
            && self.site_id == other.site_id
            && self.server_thumbprint == other.server_thumbprint
            && opt_eq(&self.alternative_urls, &other.alternative_urls, |a, b| {
                set_eq_ignore_case(a, b)
            })
    }

    fn apply_patch(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= overwrite(&mut self.discoverer_id, &incoming.discoverer_id);
        changed |= overwrite(&mut self.site_id, &incoming.site_id);
        changed |= overwrite(&mut self.server_thumbprint, &incoming.server_thumbprint);
        changed |= overwrite(&mut self.alternative_urls, &incoming.alternative_urls);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::patch;

    #[test]
    fn test_id_depends_on_security() {
        let plain = EndpointRegistration::new("app-1", "opc.tcp://a:4840");
        let signed = plain
            .clone()
            .with_security(SecurityMode::Sign, "Basic256Sha256");
        assert_ne!(plain.derive_id(), signed.derive_id());
        assert_eq!(
            plain.derive_id(),
            EndpointRegistration::new("app-1", "OPC.TCP://A:4840").derive_id()
        );
    }

    #[test]
    fn test_activation_toggles() {
        let mut ep = EndpointRegistration::new("app-1", "opc.tcp://a:4840");
        assert!(!ep.deactivate());
        assert!(ep.activate());
        assert!(!ep.activate());
        assert!(ep.is_activated());
        assert!(ep.deactivate());
    }

    #[test]
    fn test_patch_preserves_activation() {
        let mut existing = EndpointRegistration::new("app-1", "opc.tcp://a:4840");
        existing.activate();
        let incoming = EndpointRegistration::new("app-1", "opc.tcp://a:4840")
            .with_alternative_urls(["opc.tcp://10.0.0.2:4840"]);

        let (patched, changed) = patch(&existing, &incoming);
        assert!(changed);
        assert!(patched.is_activated());
        assert_eq!(patched.alternative_urls.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_validate() {
        assert!(EndpointRegistration::new("", "opc.tcp://a").validate().is_err());
        assert!(EndpointRegistration::new("app", "").validate().is_err());
        assert!(EndpointRegistration::new("app", "opc.tcp://a").validate().is_ok());
    }
}
