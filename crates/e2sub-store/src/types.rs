// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity model: termination endpoints, subscriptions and subscription tasks.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Termination endpoint identifier. By convention equal to the backing pod name.
    EndpointId
);

string_id!(
    /// Subscription identifier.
    SubscriptionId
);

string_id!(
    /// Subscription task identifier, `"{subscription}:{endpoint}"`.
    TaskId
);

impl TaskId {
    /// Deterministic task ID for a (subscription, endpoint) pairing.
    pub fn for_assignment(subscription: &SubscriptionId, endpoint: &EndpointId) -> Self {
        Self(format!("{}:{}", subscription, endpoint))
    }
}

/// Monotonic version stamped by the store on every successful write.
///
/// Zero means "never written"; updates carrying a zero revision are rejected.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// Wrap a raw version.
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// The raw version.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this revision was never stamped.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An entity that can live in a versioned [`Store`](crate::Store).
pub trait StoreObject:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Identifier type.
    type Id: AsRef<str> + Clone + fmt::Display + fmt::Debug + Send + Sync + 'static;

    /// Human readable kind, used in errors and logs.
    const KIND: &'static str;

    /// The object's identifier.
    fn id(&self) -> &Self::Id;

    /// The revision last stamped by the store.
    fn revision(&self) -> Revision;

    /// Overwrite the revision. Only the store calls this.
    fn set_revision(&mut self, revision: Revision);
}

/// A registered processing target for subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationEndpoint {
    /// Unique ID, matching the backing pod name.
    pub id: EndpointId,
    /// Store revision.
    #[serde(default)]
    pub revision: Revision,
    /// Endpoint IP address.
    pub ip: String,
    /// Endpoint port.
    pub port: u16,
}

impl TerminationEndpoint {
    /// Create an unsaved endpoint.
    pub fn new(id: impl Into<EndpointId>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            revision: Revision::default(),
            ip: ip.into(),
            port,
        }
    }
}

impl StoreObject for TerminationEndpoint {
    type Id = EndpointId;
    const KIND: &'static str = "TerminationEndpoint";

    fn id(&self) -> &EndpointId {
        &self.id
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// The subscription should be served by an endpoint.
    #[default]
    Active,
    /// Removal requested; the record stays until all of its tasks are gone.
    PendingDelete,
}

/// Subscription lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionLifecycle {
    /// Current status.
    pub status: SubscriptionStatus,
}

/// Service model a subscription targets. Opaque to the controllers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceModel {
    /// Service model name.
    pub id: String,
    /// Service model version.
    pub version: String,
}

/// Subscription request details. Opaque to the controllers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDetails {
    /// Targeted service model.
    #[serde(default)]
    pub service_model: ServiceModel,
    /// Encoded event trigger and actions.
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// A desired stream request registered by an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique ID.
    pub id: SubscriptionId,
    /// Store revision.
    #[serde(default)]
    pub revision: Revision,
    /// Owning application.
    pub app_id: String,
    /// Target E2 node.
    pub e2_node_id: String,
    /// Request details.
    #[serde(default)]
    pub details: SubscriptionDetails,
    /// Lifecycle state.
    #[serde(default)]
    pub lifecycle: SubscriptionLifecycle,
}

impl Subscription {
    /// Create an unsaved, active subscription.
    pub fn new(
        id: impl Into<SubscriptionId>,
        app_id: impl Into<String>,
        e2_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            app_id: app_id.into(),
            e2_node_id: e2_node_id.into(),
            ..Default::default()
        }
    }

    /// Whether removal has been requested.
    pub fn is_pending_delete(&self) -> bool {
        self.lifecycle.status == SubscriptionStatus::PendingDelete
    }
}

impl StoreObject for Subscription {
    type Id = SubscriptionId;
    const KIND: &'static str = "Subscription";

    fn id(&self) -> &SubscriptionId {
        &self.id
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

/// Requested phase of a subscription task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    /// The endpoint should serve the subscription.
    #[default]
    Open,
    /// The endpoint should tear the subscription down.
    Close,
}

/// Progress of the current phase, reported by the endpoint-side agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// The agent has not finished the phase.
    #[default]
    Pending,
    /// The agent finished the phase.
    Complete,
}

/// Subscription task lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLifecycle {
    /// Requested phase.
    pub phase: TaskPhase,
    /// Phase progress.
    pub status: TaskStatus,
}

impl TaskLifecycle {
    /// Close requested and confirmed by the agent.
    pub fn is_closed(&self) -> bool {
        self.phase == TaskPhase::Close && self.status == TaskStatus::Complete
    }
}

/// Assignment of a subscription to a termination endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTask {
    /// `"{subscription_id}:{endpoint_id}"`.
    pub id: TaskId,
    /// Store revision.
    #[serde(default)]
    pub revision: Revision,
    /// Owning subscription. Immutable.
    pub subscription_id: SubscriptionId,
    /// Assigned endpoint. Immutable.
    pub endpoint_id: EndpointId,
    /// Lifecycle state.
    #[serde(default)]
    pub lifecycle: TaskLifecycle,
}

impl SubscriptionTask {
    /// Create an unsaved, open task pairing `subscription` with `endpoint`.
    pub fn assign(subscription: &SubscriptionId, endpoint: &EndpointId) -> Self {
        Self {
            id: TaskId::for_assignment(subscription, endpoint),
            revision: Revision::default(),
            subscription_id: subscription.clone(),
            endpoint_id: endpoint.clone(),
            lifecycle: TaskLifecycle::default(),
        }
    }
}

impl StoreObject for SubscriptionTask {
    type Id = TaskId;
    const KIND: &'static str = "SubscriptionTask";

    fn id(&self) -> &TaskId {
        &self.id
    }

    fn revision(&self) -> Revision {
        self.revision
    }

    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

/// Kind of change observed on a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Replay of a record that existed when the watch started.
    None,
    /// The record was created.
    Created,
    /// The record was updated.
    Updated,
    /// The record was removed.
    Removed,
}

/// A change to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<T> {
    /// What happened.
    pub kind: EventType,
    /// The record after the change (or as it was when removed).
    pub object: T,
}
