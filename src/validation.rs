//! Schema checks for transit entities and query inputs.
//!
//! Entity validators take untyped JSON and return `Some(entity)` when the
//! required fields are present with the right types, filling optional fields
//! with defaults. They never error: an invalid record is simply absent.
//! The `normalize_*` functions apply them to upstream payloads that may be a
//! single object or an array.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::models::{BusLocation, DEFAULT_BUS_STATUS, OneOrMany, RouteInfo, StopInfo};
use crate::upstream::UpstreamError;

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for identifiers passed as query parameters.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Validate an identifier query parameter (`routeId`, `busId`, `stopId`).
///
/// Rules:
/// - Must be between 1 and 64 characters
/// - Only ASCII alphanumerics, `-`, `_` and `.`
pub fn validate_identifier(value: &str, field: &str) -> AppResult<()> {
    if value.is_empty() {
        return Err(AppError::InvalidData(format!("{field} cannot be empty")));
    }

    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(AppError::InvalidData(format!(
            "{field} cannot exceed {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }

    if let Some((i, c)) = value
        .chars()
        .enumerate()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(AppError::InvalidData(format!(
            "{field} contains invalid character '{c}' at position {i}"
        )));
    }

    Ok(())
}

/// Parse a boolean query flag. Accepts `true`/`false`/`1`/`0`.
pub fn parse_flag(value: Option<&str>, field: &str) -> AppResult<bool> {
    match value.map(str::trim) {
        None | Some("") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(AppError::InvalidData(format!(
            "{field} must be true or false, got '{other}'"
        ))),
    }
}

// =============================================================================
// Field Helpers
// =============================================================================

/// Required identifier: a non-empty string, or a number rendered as a string.
fn id_field(obj: &Map<String, Value>, name: &str) -> Option<String> {
    match obj.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(obj: &Map<String, Value>, name: &str) -> Option<String> {
    obj.get(name).and_then(Value::as_str).map(str::to_string)
}

/// Required coordinate. Must be a JSON number and finite.
fn number_field(obj: &Map<String, Value>, name: &str) -> Option<f64> {
    obj.get(name)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
}

fn string_list(obj: &Map<String, Value>, name: &str) -> Vec<String> {
    obj.get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Entity Validators
// =============================================================================

/// Validate a bus location record.
///
/// Requires `busId`, `routeId` and numeric `latitude`/`longitude`. Defaults
/// `speed` and `heading` to 0, `status` to `"active"` and `lastUpdated` to now.
pub fn validate_bus_location(value: &Value) -> Option<BusLocation> {
    let obj = value.as_object()?;

    Some(BusLocation {
        bus_id: id_field(obj, "busId")?,
        route_id: id_field(obj, "routeId")?,
        latitude: number_field(obj, "latitude")?,
        longitude: number_field(obj, "longitude")?,
        speed: number_field(obj, "speed").unwrap_or(0.0),
        heading: number_field(obj, "heading").unwrap_or(0.0),
        status: text_field(obj, "status")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BUS_STATUS.to_string()),
        last_updated: text_field(obj, "lastUpdated").unwrap_or_else(|| Utc::now().to_rfc3339()),
    })
}

/// Validate a stop record. Requires `stopId`, `stopName` and coordinates.
pub fn validate_stop_info(value: &Value) -> Option<StopInfo> {
    let obj = value.as_object()?;

    Some(StopInfo {
        stop_id: id_field(obj, "stopId")?,
        stop_name: text_field(obj, "stopName")?,
        latitude: number_field(obj, "latitude")?,
        longitude: number_field(obj, "longitude")?,
        routes: string_list(obj, "routes"),
    })
}

/// Validate a route record. Requires `routeId` and `routeName`.
///
/// Embedded stops are validated individually; invalid stops are dropped.
pub fn validate_route_info(value: &Value) -> Option<RouteInfo> {
    let obj = value.as_object()?;

    let stops = obj
        .get("stops")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(validate_stop_info).collect());

    Some(RouteInfo {
        route_id: id_field(obj, "routeId")?,
        route_name: text_field(obj, "routeName")?,
        origin: text_field(obj, "origin"),
        destination: text_field(obj, "destination"),
        stops,
        is_active: obj.get("isActive").and_then(Value::as_bool).unwrap_or(true),
    })
}

// =============================================================================
// Upstream Payload Normalization
// =============================================================================

fn normalize<T>(
    payload: &Value,
    entity: &str,
    validate: fn(&Value) -> Option<T>,
) -> Result<OneOrMany<T>, UpstreamError> {
    match payload {
        Value::Array(items) => Ok(OneOrMany::Many(items.iter().filter_map(validate).collect())),
        Value::Object(_) => validate(payload).map(OneOrMany::One).ok_or_else(|| {
            UpstreamError::InvalidPayload(format!("{entity} record failed validation"))
        }),
        _ => Err(UpstreamError::InvalidPayload(format!(
            "expected {entity} object or array"
        ))),
    }
}

/// Normalize an upstream bus location payload. The result is always a list.
pub fn normalize_bus_locations(payload: &Value) -> Result<Vec<BusLocation>, UpstreamError> {
    Ok(match normalize(payload, "bus location", validate_bus_location)? {
        OneOrMany::One(location) => vec![location],
        OneOrMany::Many(locations) => locations,
    })
}

/// Normalize an upstream route payload, keeping its array-or-singleton shape.
pub fn normalize_route_info(payload: &Value) -> Result<OneOrMany<RouteInfo>, UpstreamError> {
    normalize(payload, "route", validate_route_info)
}

/// Normalize an upstream stop payload, keeping its array-or-singleton shape.
pub fn normalize_stop_info(payload: &Value) -> Result<OneOrMany<StopInfo>, UpstreamError> {
    normalize(payload, "stop", validate_stop_info)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // Bus Location
    // =========================================================================

    #[test]
    fn test_bus_location_defaults() {
        let location = validate_bus_location(&json!({
            "busId": "MTC001",
            "routeId": "1A",
            "latitude": 13.08,
            "longitude": 80.27
        }))
        .unwrap();

        assert_eq!(location.speed, 0.0);
        assert_eq!(location.heading, 0.0);
        assert_eq!(location.status, "active");
        assert!(!location.last_updated.is_empty());
    }

    #[test]
    fn test_bus_location_keeps_optional_fields() {
        let location = validate_bus_location(&json!({
            "busId": "MTC001",
            "routeId": "1A",
            "latitude": 13.08,
            "longitude": 80.27,
            "speed": 32.5,
            "heading": 270,
            "status": "delayed",
            "lastUpdated": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(location.speed, 32.5);
        assert_eq!(location.heading, 270.0);
        assert_eq!(location.status, "delayed");
        assert_eq!(location.last_updated, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_bus_location_missing_required_fields() {
        let base = json!({
            "busId": "MTC001",
            "routeId": "1A",
            "latitude": 13.08,
            "longitude": 80.27
        });

        for field in ["busId", "routeId", "latitude", "longitude"] {
            let mut value = base.clone();
            value.as_object_mut().unwrap().remove(field);
            assert!(
                validate_bus_location(&value).is_none(),
                "missing {field} should be rejected"
            );
        }
    }

    #[test]
    fn test_bus_location_rejects_string_coordinates() {
        let value = json!({
            "busId": "MTC001",
            "routeId": "1A",
            "latitude": "13.08",
            "longitude": 80.27
        });
        assert!(validate_bus_location(&value).is_none());
    }

    #[test]
    fn test_bus_location_rejects_empty_ids_and_non_objects() {
        let value = json!({"busId": "", "routeId": "1A", "latitude": 1.0, "longitude": 2.0});
        assert!(validate_bus_location(&value).is_none());
        assert!(validate_bus_location(&json!([1, 2])).is_none());
        assert!(validate_bus_location(&Value::Null).is_none());
    }

    #[test]
    fn test_bus_location_accepts_numeric_ids() {
        let value = json!({"busId": 17, "routeId": 5, "latitude": 1.0, "longitude": 2.0});
        let location = validate_bus_location(&value).unwrap();
        assert_eq!(location.bus_id, "17");
        assert_eq!(location.route_id, "5");
    }

    // =========================================================================
    // Routes and Stops
    // =========================================================================

    #[test]
    fn test_route_info_filters_invalid_stops() {
        let route = validate_route_info(&json!({
            "routeId": "1A",
            "routeName": "Broadway - Tambaram",
            "stops": [
                {"stopId": "S1", "stopName": "Broadway", "latitude": 13.08, "longitude": 80.28},
                {"stopId": "S2", "stopName": "Broken"}
            ]
        }))
        .unwrap();

        let stops = route.stops.unwrap();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].stop_id, "S1");
        assert!(route.is_active);
    }

    #[test]
    fn test_route_info_requires_name() {
        assert!(validate_route_info(&json!({"routeId": "1A"})).is_none());
    }

    #[test]
    fn test_stop_info_routes_default_empty() {
        let stop = validate_stop_info(&json!({
            "stopId": "S1",
            "stopName": "Central",
            "latitude": 13.08,
            "longitude": 80.27
        }))
        .unwrap();
        assert!(stop.routes.is_empty());
    }

    // =========================================================================
    // Normalization
    // =========================================================================

    #[test]
    fn test_normalize_bus_locations_drops_invalid_entries() {
        let payload = json!([
            {"busId": "MTC001", "routeId": "1A", "latitude": 13.08, "longitude": 80.27},
            {"busId": "MTC002"}
        ]);
        let locations = normalize_bus_locations(&payload).unwrap();
        assert_eq!(locations.len(), 1);
    }

    #[test]
    fn test_normalize_bus_locations_wraps_single_object() {
        let payload = json!({"busId": "MTC001", "routeId": "1A", "latitude": 13.08, "longitude": 80.27});
        assert_eq!(normalize_bus_locations(&payload).unwrap().len(), 1);
    }

    #[test]
    fn test_normalize_rejects_invalid_single_object() {
        let err = normalize_route_info(&json!({"routeId": "1A"})).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidPayload(_)));
    }

    #[test]
    fn test_normalize_rejects_scalars() {
        assert!(normalize_stop_info(&json!("nope")).is_err());
    }

    #[test]
    fn test_normalize_keeps_shape() {
        let single = normalize_stop_info(&json!({
            "stopId": "S1", "stopName": "Central", "latitude": 1.0, "longitude": 2.0
        }))
        .unwrap();
        assert!(matches!(single, OneOrMany::One(_)));

        let many = normalize_stop_info(&json!([])).unwrap();
        assert!(matches!(many, OneOrMany::Many(ref v) if v.is_empty()));
    }

    // =========================================================================
    // Query Inputs
    // =========================================================================

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("1A", "routeId").is_ok());
        assert!(validate_identifier("MTC-001_x.y", "busId").is_ok());
        assert!(validate_identifier("", "routeId").is_err());
        assert!(validate_identifier("a b", "routeId").is_err());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1), "routeId").is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(!parse_flag(None, "includeStops").unwrap());
        assert!(parse_flag(Some("true"), "includeStops").unwrap());
        assert!(parse_flag(Some("1"), "includeStops").unwrap());
        assert!(!parse_flag(Some("false"), "includeStops").unwrap());
        let err = parse_flag(Some("yes"), "includeStops").unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
    }
}
