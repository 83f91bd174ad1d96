//! Supervisor registrations (device twins).
//!
//! A supervisor carries two property maps: `desired`, written by operators,
//! and `reported`, written by the device. The consolidated view merges them
//! with reported values taking precedence.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use twinreg_core::Result;

use super::{require, PropertyMap, Registration, RegistrationState};
use crate::ids::derive_id;
use crate::reconcile::{apply_properties, consolidate, map_eq, overwrite};

/// Property that decides whether a supervisor is in sync.
pub const LOG_LEVEL: &str = "log_level";

/// An edge supervisor module registered as a device twin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupervisorRegistration {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,

    pub device_id: String,
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub connected: Option<bool>,

    #[serde(default)]
    pub desired: PropertyMap,
    #[serde(default)]
    pub reported: PropertyMap,

    #[serde(default)]
    pub state: RegistrationState,
}

impl SupervisorRegistration {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    pub fn with_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }

    pub fn with_desired(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.desired.insert(key.into(), value.into());
        self
    }

    pub fn with_reported(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.reported.insert(key.into(), value.into());
        self
    }

    /// Desired and reported properties merged, reported wins.
    pub fn consolidated(&self) -> PropertyMap {
        consolidate(&self.desired, &self.reported)
    }

    /// Effective log level.
    pub fn log_level(&self) -> Option<Value> {
        self.consolidated().remove(LOG_LEVEL)
    }

    /// Whether the device has applied the desired log level.
    ///
    /// Only the log level counts; other properties change during discovery
    /// and are not compared.
    pub fn is_in_sync(&self) -> bool {
        match self.desired.get(LOG_LEVEL).filter(|v| !v.is_null()) {
            None => true,
            Some(desired) => self.consolidated().get(LOG_LEVEL) == Some(desired),
        }
    }

    /// Merge updates into the reported map. Null values remove keys.
    pub fn apply_reported(&mut self, updates: &PropertyMap) -> bool {
        apply_properties(&mut self.reported, updates)
    }

    /// Merge updates into the desired map. Null values remove keys.
    pub fn apply_desired(&mut self, updates: &PropertyMap) -> bool {
        apply_properties(&mut self.desired, updates)
    }
}

impl Registration for SupervisorRegistration {
    const COLLECTION: &'static str = "supervisors";
    const INDEXED_FIELDS: &'static [&'static str] =
        &["device_id", "module_id", "site_id", "connected"];

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn derive_id(&self) -> String {
        derive_id(
            "sup",
            &[&self.device_id, self.module_id.as_deref().unwrap_or_default()],
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
        require("device_id", &self.device_id)?;
        if let Some(module) = &self.module_id {
            require("module_id", module)?;
        }
        Ok(())
    }

    fn is_logically_same(&self, other: &Self) -> bool {
        self.device_id == other.device_id && self.module_id == other.module_id
    }

    fn is_structurally_same(&self, other: &Self) -> bool {
        self.is_logically_same(other)
            && self.site_id == other.site_id
            && self.connected == other.connected
            && map_eq(&self.desired, &other.desired)
            && map_eq(&self.reported, &other.reported)
    }

    /// Incoming properties are merged key by key; nulls are not specified.
    fn apply_patch(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= overwrite(&mut self.site_id, &incoming.site_id);
        changed |= overwrite(&mut self.connected, &incoming.connected);
        changed |= merge_specified(&mut self.desired, &incoming.desired);
        changed |= merge_specified(&mut self.reported, &incoming.reported);
        changed
    }
}

fn merge_specified(target: &mut PropertyMap, incoming: &PropertyMap) -> bool {
    let mut changed = false;
    for (key, value) in incoming.iter().filter(|(_, v)| !v.is_null()) {
        if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
