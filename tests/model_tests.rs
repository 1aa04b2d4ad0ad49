//! Unit tests for domain models and validation.
//!
//! Run with: `cargo test --test model_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;

mod transit_tests {
    use super::*;
    use transit_gateway::models::{
        BusLocation, DEFAULT_BUS_STATUS, OneOrMany, RealtimeKind, RealtimeUpdate, RouteInfo,
        StopInfo,
    };

    fn stop(id: &str) -> StopInfo {
        StopInfo {
            stop_id: id.to_string(),
            stop_name: format!("Stop {id}"),
            latitude: 13.0,
            longitude: 80.2,
            routes: vec!["21G".to_string()],
        }
    }

    #[test]
    fn test_bus_location_wire_names() {
        let location = BusLocation {
            bus_id: "MTC001".to_string(),
            route_id: "1A".to_string(),
            latitude: 13.08,
            longitude: 80.27,
            speed: 0.0,
            heading: 90.0,
            status: DEFAULT_BUS_STATUS.to_string(),
            last_updated: "2026-01-01T00:00:00Z".to_string(),
        };

        let value = serde_json::to_value(&location).unwrap();
        assert_eq!(value["busId"], "MTC001");
        assert_eq!(value["routeId"], "1A");
        assert_eq!(value["lastUpdated"], "2026-01-01T00:00:00Z");
        assert!(value.get("bus_id").is_none());
    }

    #[test]
    fn test_route_info_omits_stops_when_absent() {
        let route = RouteInfo {
            route_id: "21G".to_string(),
            route_name: "Broadway - Tambaram".to_string(),
            origin: None,
            destination: None,
            stops: None,
            is_active: true,
        };

        let value = serde_json::to_value(&route).unwrap();
        assert!(value.get("stops").is_none());
        assert!(value.get("origin").is_none());
        assert_eq!(value["isActive"], true);
    }

    #[test]
    fn test_one_or_many_serializes_untagged() {
        let one = serde_json::to_value(OneOrMany::One(stop("S1"))).unwrap();
        assert_eq!(one["stopId"], "S1");

        let many = serde_json::to_value(OneOrMany::Many(vec![stop("S1"), stop("S2")])).unwrap();
        assert_eq!(many.as_array().unwrap().len(), 2);
        assert_eq!(many[1]["stopId"], "S2");
    }

    #[test]
    fn test_realtime_kind_selection() {
        assert_eq!(
            RealtimeKind::from_filters(Some("1A"), Some("S1")),
            RealtimeKind::StopArrivals
        );
        assert_eq!(
            RealtimeKind::from_filters(Some("1A"), None),
            RealtimeKind::BusLocations
        );
        assert_eq!(
            RealtimeKind::from_filters(None, None),
            RealtimeKind::NetworkSnapshot
        );
    }

    #[test]
    fn test_realtime_update_shape() {
        let update = RealtimeUpdate::new(RealtimeKind::BusLocations, json!([{"busId": "MTC001"}]));
        let value = serde_json::to_value(&update).unwrap();

        assert_eq!(value["type"], "bus_locations");
        assert_eq!(value["source"], "upstream");
        assert_eq!(value["data"][0]["busId"], "MTC001");
        assert!(value.get("kind").is_none());
    }
}

mod identity_tests {
    use chrono::{Duration, Utc};
    use transit_gateway::middleware::policy::RateLimitConfig;
    use transit_gateway::models::{ApiKey, Role, User};

    fn key_expiring(offset: Option<Duration>) -> ApiKey {
        let created_at = Utc::now();
        ApiKey {
            key: "mtc_test".to_string(),
            user_id: "rider-1".to_string(),
            permissions: vec![],
            rate_limit: RateLimitConfig::default(),
            created_at,
            expires_at: offset.map(|offset| created_at + offset),
            last_used: None,
        }
    }

    #[test]
    fn test_key_without_expiry_never_expires() {
        let key = key_expiring(None);
        assert!(!key.is_expired_at(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn test_key_expires_strictly_after_deadline() {
        let key = key_expiring(Some(Duration::minutes(5)));
        let deadline = key.expires_at.unwrap();

        assert!(!key.is_expired_at(deadline));
        assert!(key.is_expired_at(deadline + Duration::milliseconds(1)));
    }

    #[test]
    fn test_user_builder_and_wire_format() {
        let user = User::new("dispatcher", vec!["write".to_string()])
            .with_role(Role::Admin)
            .with_email("ops@example.com");

        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["id"], "dispatcher");
        assert_eq!(value["role"], "admin");
        assert_eq!(value["email"], "ops@example.com");
        assert!(value["lastActive"].is_string());
    }
}

mod validation_tests {
    use super::*;
    use transit_gateway::AppError;
    use transit_gateway::models::OneOrMany;
    use transit_gateway::upstream::UpstreamError;
    use transit_gateway::validation::{
        MAX_IDENTIFIER_LENGTH, normalize_bus_locations, normalize_route_info, normalize_stop_info,
        parse_flag, validate_bus_location, validate_identifier, validate_route_info,
    };

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("21G", "routeId").is_ok());
        assert!(validate_identifier("MTC-001_a.b", "busId").is_ok());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH), "busId").is_ok());

        for bad in ["", "a b", "1A;drop", "ü", "a".repeat(MAX_IDENTIFIER_LENGTH + 1).as_str()] {
            let err = validate_identifier(bad, "routeId").unwrap_err();
            assert!(matches!(err, AppError::InvalidData(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_flag_parsing() {
        assert!(!parse_flag(None, "includeStops").unwrap());
        assert!(parse_flag(Some("true"), "includeStops").unwrap());
        assert!(parse_flag(Some("1"), "includeStops").unwrap());
        assert!(!parse_flag(Some("0"), "includeStops").unwrap());
        assert!(parse_flag(Some("yes"), "includeStops").is_err());
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let location = validate_bus_location(&json!({
            "busId": 101,
            "routeId": "1A",
            "latitude": 13,
            "longitude": 80
        }))
        .unwrap();

        assert_eq!(location.bus_id, "101");
        assert_eq!(location.latitude, 13.0);
    }

    #[test]
    fn test_string_coordinates_are_rejected() {
        assert!(
            validate_bus_location(&json!({
                "busId": "MTC001",
                "routeId": "1A",
                "latitude": "13.08",
                "longitude": 80.27
            }))
            .is_none()
        );
    }

    #[test]
    fn test_route_without_name_is_rejected() {
        assert!(validate_route_info(&json!({"routeId": "21G"})).is_none());
    }

    #[test]
    fn test_bus_location_singleton_becomes_list() {
        let locations = normalize_bus_locations(&json!({
            "busId": "MTC001", "routeId": "1A", "latitude": 13.0, "longitude": 80.0
        }))
        .unwrap();
        assert_eq!(locations.len(), 1);
    }

    #[test]
    fn test_route_array_keeps_valid_entries() {
        let routes = normalize_route_info(&json!([
            {"routeId": "21G", "routeName": "Broadway - Tambaram"},
            {"routeId": "5C"}
        ]))
        .unwrap();

        match routes {
            OneOrMany::Many(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].route_id, "21G");
            }
            OneOrMany::One(_) => panic!("array payload must stay an array"),
        }
    }

    #[test]
    fn test_invalid_singleton_is_payload_error() {
        let err = normalize_stop_info(&json!({"stopId": "S1"})).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidPayload(_)));

        let err = normalize_stop_info(&json!("S1")).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidPayload(_)));
    }
}
