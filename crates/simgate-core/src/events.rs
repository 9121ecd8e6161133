use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of event categories a connection may subscribe to.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventCategory {
    ScenarioEvents,
    CatalogEvents,
    SimulationEvents,
}

impl EventCategory {
    pub const ALL: [EventCategory; 3] = [
        EventCategory::ScenarioEvents,
        EventCategory::CatalogEvents,
        EventCategory::SimulationEvents,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScenarioEvents => "ScenarioEvents",
            Self::CatalogEvents => "CatalogEvents",
            Self::SimulationEvents => "SimulationEvents",
        }
    }

    /// Documented event names publishable under this category. This is
    /// catalog data for clients and operators; publishers are not checked
    /// against it.
    pub fn events(&self) -> &'static [&'static str] {
        match self {
            Self::ScenarioEvents => &[catalog::SCENARIO_ADDED, catalog::SCENARIO_DELETED],
            Self::CatalogEvents => &[
                catalog::SENSOR_PRESET_ADDED,
                catalog::SENSOR_PRESET_REMOVED,
                catalog::SENSOR_PRESET_UPDATED,
            ],
            Self::SimulationEvents => &[catalog::SIM_RUN_STATUS_CHANGED, catalog::SIM_RUN_CREATED],
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a wire string names no known category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl FromStr for EventCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ScenarioEvents" => Ok(Self::ScenarioEvents),
            "CatalogEvents" => Ok(Self::CatalogEvents),
            "SimulationEvents" => Ok(Self::SimulationEvents),
            other => Err(UnknownCategory(other.to_owned())),
        }
    }
}

/// Documented event names, grouped by category.
pub mod catalog {
    // ScenarioEvents
    pub const SCENARIO_ADDED: &str = "ScenarioAdded";
    pub const SCENARIO_DELETED: &str = "ScenarioDeleted";

    // CatalogEvents
    pub const SENSOR_PRESET_ADDED: &str = "SensorPresetAdded";
    pub const SENSOR_PRESET_REMOVED: &str = "SensorPresetRemoved";
    pub const SENSOR_PRESET_UPDATED: &str = "SensorPresetUpdated";

    // SimulationEvents
    pub const SIM_RUN_STATUS_CHANGED: &str = "SimRunStatusChanged";
    pub const SIM_RUN_CREATED: &str = "SimRunCreated";
}

/// An event handed to the gateway by a publisher. The category scopes
/// delivery; `event` is the name clients see on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub category: EventCategory,
    pub event: String,
    pub data: serde_json::Value,
}

impl GatewayEvent {
    pub fn new(category: EventCategory, event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            category,
            event: event.into(),
            data,
        }
    }

    /// Shorthand for events named after their category.
    pub fn of_category(category: EventCategory, data: serde_json::Value) -> Self {
        Self::new(category, category.as_str(), data)
    }

    pub fn to_wire(&self) -> WireEvent<'_> {
        WireEvent {
            event: &self.event,
            data: &self.data,
        }
    }
}

/// Outbound wire shape delivered to subscribed connections.
#[derive(Debug, Serialize)]
pub struct WireEvent<'a> {
    #[serde(rename = "Event")]
    pub event: &'a str,
    #[serde(rename = "Data")]
    pub data: &'a serde_json::Value,
}

/// Inbound subscription request wire shape. Both fields are required;
/// anything else fails the shape check.
#[derive(Clone, Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "EventsType")]
    pub events_type: String,
    #[serde(rename = "Subscribe")]
    pub subscribe: bool,
}
