//! `WoT` operation vocabulary.
//!
//! Every message carries one [`Operation`]. Dispatch on operations is an
//! exhaustive `match` over this enum rather than name-based lookup, so an
//! operation the hub does not know decodes to [`Operation::Unknown`] and is
//! rejected explicitly by whoever receives it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An operation from the `WoT` vocabulary, plus the hub's notification ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Invoke an action on a Thing.
    InvokeAction,
    /// Query the progress of a running action.
    QueryAction,
    /// Cancel a running action.
    CancelAction,
    /// Read a single property.
    ReadProperty,
    /// Read all properties of a Thing.
    ReadAllProperties,
    /// Read a selection of properties.
    ReadMultipleProperties,
    /// Write a single property.
    WriteProperty,
    /// Write several properties at once.
    WriteMultipleProperties,
    /// Observe changes of a property.
    ObserveProperty,
    /// Observe changes of all properties of a Thing.
    ObserveAllProperties,
    /// Stop observing a property.
    UnobserveProperty,
    /// Stop observing all properties of a Thing.
    UnobserveAllProperties,
    /// Subscribe to an event.
    SubscribeEvent,
    /// Subscribe to all events of a Thing.
    SubscribeAllEvents,
    /// Remove an event subscription.
    UnsubscribeEvent,
    /// Remove all event subscriptions of a Thing.
    UnsubscribeAllEvents,
    /// Notification: an event was emitted.
    Event,
    /// Notification: a property value changed.
    UpdateProperty,
    /// Notification: a Thing Description changed.
    UpdateTd,
    /// Read a Thing Description.
    ReadTd,
    /// Connectivity check.
    Ping,
    /// Any operation name the hub does not recognise.
    #[serde(other)]
    Unknown,
}

impl Operation {
    /// Every known operation, in vocabulary order.
    pub const ALL: [Operation; 21] = [
        Self::InvokeAction,
        Self::QueryAction,
        Self::CancelAction,
        Self::ReadProperty,
        Self::ReadAllProperties,
        Self::ReadMultipleProperties,
        Self::WriteProperty,
        Self::WriteMultipleProperties,
        Self::ObserveProperty,
        Self::ObserveAllProperties,
        Self::UnobserveProperty,
        Self::UnobserveAllProperties,
        Self::SubscribeEvent,
        Self::SubscribeAllEvents,
        Self::UnsubscribeEvent,
        Self::UnsubscribeAllEvents,
        Self::Event,
        Self::UpdateProperty,
        Self::UpdateTd,
        Self::ReadTd,
        Self::Ping,
    ];

    /// Wire name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvokeAction => "invokeaction",
            Self::QueryAction => "queryaction",
            Self::CancelAction => "cancelaction",
            Self::ReadProperty => "readproperty",
            Self::ReadAllProperties => "readallproperties",
            Self::ReadMultipleProperties => "readmultipleproperties",
            Self::WriteProperty => "writeproperty",
            Self::WriteMultipleProperties => "writemultipleproperties",
            Self::ObserveProperty => "observeproperty",
            Self::ObserveAllProperties => "observeallproperties",
            Self::UnobserveProperty => "unobserveproperty",
            Self::UnobserveAllProperties => "unobserveallproperties",
            Self::SubscribeEvent => "subscribeevent",
            Self::SubscribeAllEvents => "subscribeallevents",
            Self::UnsubscribeEvent => "unsubscribeevent",
            Self::UnsubscribeAllEvents => "unsubscribeallevents",
            Self::Event => "event",
            Self::UpdateProperty => "updateproperty",
            Self::UpdateTd => "updatetd",
            Self::ReadTd => "readtd",
            Self::Ping => "ping",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this operation mutates a connection's subscription state.
    pub fn is_subscription_control(self) -> bool {
        matches!(
            self,
            Self::ObserveProperty
                | Self::ObserveAllProperties
                | Self::UnobserveProperty
                | Self::UnobserveAllProperties
                | Self::SubscribeEvent
                | Self::SubscribeAllEvents
                | Self::UnsubscribeEvent
                | Self::UnsubscribeAllEvents
        )
    }

    /// Whether this operation is carried by a notification.
    pub fn is_notification(self) -> bool {
        matches!(self, Self::Event | Self::UpdateProperty | Self::UpdateTd)
    }

    /// Whether this operation addresses a whole Thing rather than one affordance.
    pub fn is_thing_level(self) -> bool {
        matches!(
            self,
            Self::ReadAllProperties
                | Self::ReadMultipleProperties
                | Self::WriteMultipleProperties
                | Self::ObserveAllProperties
                | Self::UnobserveAllProperties
                | Self::SubscribeAllEvents
                | Self::UnsubscribeAllEvents
                | Self::ReadTd
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation '{s}'"))
    }
}
