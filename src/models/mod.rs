mod api;
mod identity;
mod transit;

pub use api::{ErrorEnvelope, HealthResponse, SuccessEnvelope};
pub use identity::{ApiKey, Role, User};
pub use transit::{
    BusLocation, DEFAULT_BUS_STATUS, OneOrMany, REALTIME_SOURCE, RealtimeKind, RealtimeUpdate,
    RouteInfo, StopInfo,
};
