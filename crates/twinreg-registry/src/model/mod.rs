//! Registration models.
//!
//! Every registered entity carries a stable id, the generation it was read
//! at and a [`RegistrationState`] describing whether discovery currently
//! sees it. The [`Registration`] trait is what the generic repository and
//! service need to know about an entity type.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use twinreg_core::{OperationContext, Result};

pub mod application;
pub mod endpoint;
pub mod supervisor;

pub use application::{ApplicationRegistration, ApplicationType};
pub use endpoint::{ActivationState, EndpointRegistration, SecurityMode};
pub use supervisor::SupervisorRegistration;

/// Free-form property bag (twin desired/reported properties).
pub type PropertyMap = BTreeMap<String, Value>;

/// Discovery-driven presence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Unknown,
    Found,
    Lost,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Found => "found",
            Self::Lost => "lost",
        }
    }
}

/// Lifecycle bookkeeping shared by all registrations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationState {
    pub visibility: Visibility,
    /// Time (ms) the entity was first missed by a scan; set only while lost.
    pub not_seen_since: Option<i64>,
    pub created: Option<OperationContext>,
    pub updated: Option<OperationContext>,
}

impl RegistrationState {
    /// Transition to `Found`. Returns false if already found.
    pub fn mark_found(&mut self) -> bool {
        if self.visibility == Visibility::Found {
            return false;
        }
        self.visibility = Visibility::Found;
        self.not_seen_since = None;
        true
    }

    /// Transition to `Lost` at the context time. Returns false if already lost.
    pub fn mark_lost(&mut self, context: &OperationContext) -> bool {
        if self.visibility == Visibility::Lost {
            return false;
        }
        self.visibility = Visibility::Lost;
        self.not_seen_since = Some(context.time);
        true
    }

    /// Whether the entity has been lost since before `threshold` (ms).
    pub fn is_stale(&self, threshold: i64) -> bool {
        self.visibility == Visibility::Lost
            && self.not_seen_since.is_some_and(|since| since < threshold)
    }

    pub fn touch(&mut self, context: &OperationContext) {
        self.updated = Some(context.clone());
    }
}

/// Document paths every registration type can be filtered on.
pub const STATE_FIELDS: &[&str] = &["state.visibility", "state.not_seen_since"];

/// An entity managed by the registry.
///
/// `id` and `generation_id` are owned by the store: the repository assigns
/// both after every read and write. Implementations keep identity fields
/// (those that feed [`derive_id`](Registration::derive_id)) out of
/// [`apply_patch`](Registration::apply_patch).
pub trait Registration:
    Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Store collection, also used as the envelope entity type.
    const COLLECTION: &'static str;

    /// Document paths that queries may filter on, besides [`STATE_FIELDS`].
    const INDEXED_FIELDS: &'static [&'static str];

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);

    /// Deterministic id computed from the identity fields.
    fn derive_id(&self) -> String;

    fn generation_id(&self) -> Option<&str>;
    fn set_generation_id(&mut self, generation: Option<String>);

    fn state(&self) -> &RegistrationState;
    fn state_mut(&mut self) -> &mut RegistrationState;

    /// Reject malformed requests with `InvalidArgument`.
    fn validate(&self) -> Result<()>;

    /// Whether both records describe the same real-world entity.
    fn is_logically_same(&self, other: &Self) -> bool;

    /// Whether all descriptive fields are equal (ignores id, generation, state).
    fn is_structurally_same(&self, other: &Self) -> bool;

    /// Overwrite every field specified in `incoming`. Returns whether
    /// anything changed.
    fn apply_patch(&mut self, incoming: &Self) -> bool;

    /// Whether `path` may be used in a query filter.
    fn is_indexed(path: &str) -> bool {
        STATE_FIELDS
            .iter()
            .chain(Self::INDEXED_FIELDS)
            .any(|field| *field == path)
    }
}

/// Fail with `InvalidArgument` when a required text field is blank.
pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(twinreg_core::Error::invalid_argument(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_transitions() {
        let ctx = OperationContext::new().at(1_000);
        let mut state = RegistrationState::default();
        assert_eq!(state.visibility, Visibility::Unknown);

        assert!(state.mark_found());
        assert!(!state.mark_found());

        assert!(state.mark_lost(&ctx));
        assert_eq!(state.not_seen_since, Some(1_000));
        assert!(!state.mark_lost(&OperationContext::new().at(5_000)));
        assert_eq!(state.not_seen_since, Some(1_000));

        assert!(state.is_stale(2_000));
        assert!(!state.is_stale(1_000));

        assert!(state.mark_found());
        assert_eq!(state.not_seen_since, None);
        assert!(!state.is_stale(i64::MAX));
    }

    #[test]
    fn test_visibility_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Visibility::Lost).unwrap(),
            serde_json::json!("lost")
        );
        assert_eq!(Visibility::Found.as_str(), "found");
    }
}
