use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default status assigned to a bus location without one.
pub const DEFAULT_BUS_STATUS: &str = "active";

/// Source tag stamped on synthesized realtime updates.
pub const REALTIME_SOURCE: &str = "upstream";

/// Position report for a single vehicle.
///
/// Only `bus_id`, `route_id`, `latitude` and `longitude` are required;
/// the remaining fields are defaulted during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusLocation {
    pub bus_id: String,
    pub route_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Speed in km/h (default: 0)
    pub speed: f64,
    /// Heading in degrees (default: 0)
    pub heading: f64,
    /// Operational status (default: "active")
    pub status: String,
    /// Last report time as sent by the upstream (default: now, RFC 3339)
    pub last_updated: String,
}

/// Route metadata, optionally with its stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub route_id: String,
    pub route_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stops: Option<Vec<StopInfo>>,
    pub is_active: bool,
}

/// Stop metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopInfo {
    pub stop_id: String,
    pub stop_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Route ids serving this stop
    pub routes: Vec<String>,
}

/// Kind of realtime snapshot, derived from the query filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeKind {
    /// Vehicle positions for one route
    BusLocations,
    /// Expected arrivals at one stop
    StopArrivals,
    /// Unfiltered network-wide snapshot
    NetworkSnapshot,
}

impl RealtimeKind {
    /// Pick the snapshot kind from the optional filters. A stop filter wins.
    pub fn from_filters(route_id: Option<&str>, stop_id: Option<&str>) -> Self {
        match (route_id, stop_id) {
            (_, Some(_)) => Self::StopArrivals,
            (Some(_), None) => Self::BusLocations,
            (None, None) => Self::NetworkSnapshot,
        }
    }
}

/// Single synthesized realtime envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeUpdate {
    #[serde(rename = "type")]
    pub kind: RealtimeKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl RealtimeUpdate {
    pub fn new(kind: RealtimeKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            source: REALTIME_SOURCE.to_string(),
        }
    }
}

/// Upstream payload that may be a single record or a list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_realtime_kind_from_filters() {
        assert_eq!(
            RealtimeKind::from_filters(Some("1A"), None),
            RealtimeKind::BusLocations
        );
        assert_eq!(
            RealtimeKind::from_filters(Some("1A"), Some("S1")),
            RealtimeKind::StopArrivals
        );
        assert_eq!(
            RealtimeKind::from_filters(None, None),
            RealtimeKind::NetworkSnapshot
        );
    }

    #[test]
    fn test_realtime_update_serialization() {
        let update = RealtimeUpdate::new(RealtimeKind::StopArrivals, json!({"eta": 3}));
        let value = serde_json::to_value(&update).unwrap();

        assert_eq!(value["type"], "stop_arrivals");
        assert_eq!(value["source"], "upstream");
        assert_eq!(value["data"]["eta"], 3);
    }

    #[test]
    fn test_one_or_many_serializes_untagged() {
        let stop = StopInfo {
            stop_id: "S1".into(),
            stop_name: "Central".into(),
            latitude: 13.08,
            longitude: 80.27,
            routes: vec![],
        };

        let one = serde_json::to_value(OneOrMany::One(stop.clone())).unwrap();
        assert_eq!(one["stopId"], "S1");

        let many = serde_json::to_value(OneOrMany::Many(vec![stop])).unwrap();
        assert!(many.is_array());
    }

    #[test]
    fn test_route_info_skips_missing_stops() {
        let route = RouteInfo {
            route_id: "1A".into(),
            route_name: "Broadway".into(),
            origin: None,
            destination: None,
            stops: None,
            is_active: true,
        };
        let value = serde_json::to_value(&route).unwrap();
        assert!(value.get("stops").is_none());
        assert_eq!(value["isActive"], true);
    }
}
