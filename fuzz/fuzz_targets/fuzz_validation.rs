//! Fuzz testing for request and payload validation.
//!
//! Identifier and flag checks see raw query strings from clients; entity
//! validators see whatever JSON the upstream returns. Neither may panic.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use transit_gateway::validation::{
    normalize_bus_locations, normalize_route_info, normalize_stop_info, parse_flag,
    validate_bus_location, validate_identifier, validate_route_info, validate_stop_info,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = validate_identifier(s, "routeId");
        let _ = parse_flag(Some(s), "includeStops");
    }

    if let Ok(value) = serde_json::from_slice::<Value>(data) {
        if let Some(location) = validate_bus_location(&value) {
            assert!(!location.bus_id.is_empty());
        }
        let _ = validate_stop_info(&value);
        let _ = validate_route_info(&value);

        let _ = normalize_bus_locations(&value);
        let _ = normalize_route_info(&value);
        let _ = normalize_stop_info(&value);
    }
});
