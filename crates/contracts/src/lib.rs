use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod canonical;
pub mod record;

pub use record::{EventRecord, RecordError};

/// Resource types served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Sessions,
    Drivers,
    Positions,
    Laps,
    CarData,
    Locations,
    Intervals,
    TeamRadio,
}

/// How long a resource stays fresh once cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Static,
    Live,
    CarData,
    Radio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub static_ttl: Duration,
    pub live_ttl: Duration,
    pub car_data_ttl: Duration,
    pub radio_ttl: Duration,
}

impl TtlPolicy {
    pub fn ttl_for(&self, resource: ResourceKind) -> Duration {
        match resource.ttl_class() {
            TtlClass::Static => self.static_ttl,
            TtlClass::Live => self.live_ttl,
            TtlClass::CarData => self.car_data_ttl,
            TtlClass::Radio => self.radio_ttl,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            static_ttl: Duration::from_secs(300),
            live_ttl: Duration::from_secs(10),
            car_data_ttl: Duration::from_secs(5),
            radio_ttl: Duration::from_secs(120),
        }
    }
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Sessions,
        ResourceKind::Drivers,
        ResourceKind::Positions,
        ResourceKind::Laps,
        ResourceKind::CarData,
        ResourceKind::Locations,
        ResourceKind::Intervals,
        ResourceKind::TeamRadio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Sessions => "sessions",
            ResourceKind::Drivers => "drivers",
            ResourceKind::Positions => "positions",
            ResourceKind::Laps => "laps",
            ResourceKind::CarData => "car_data",
            ResourceKind::Locations => "locations",
            ResourceKind::Intervals => "intervals",
            ResourceKind::TeamRadio => "team_radio",
        }
    }

    /// Path segment of the upstream feed that backs this resource.
    pub fn upstream_path(self) -> &'static str {
        match self {
            ResourceKind::Sessions => "sessions",
            ResourceKind::Drivers => "drivers",
            ResourceKind::Positions => "position",
            ResourceKind::Laps => "laps",
            ResourceKind::CarData => "car_data",
            ResourceKind::Locations => "location",
            ResourceKind::Intervals => "intervals",
            ResourceKind::TeamRadio => "team_radio",
        }
    }

    pub fn ttl_class(self) -> TtlClass {
        match self {
            ResourceKind::Sessions | ResourceKind::Drivers => TtlClass::Static,
            ResourceKind::Positions
            | ResourceKind::Laps
            | ResourceKind::Locations
            | ResourceKind::Intervals => TtlClass::Live,
            ResourceKind::CarData => TtlClass::CarData,
            ResourceKind::TeamRadio => TtlClass::Radio,
        }
    }

    pub fn accepts_driver_filter(self) -> bool {
        matches!(
            self,
            ResourceKind::Laps | ResourceKind::CarData | ResourceKind::TeamRadio
        )
    }

    pub fn requires_driver_filter(self) -> bool {
        matches!(self, ResourceKind::CarData)
    }

    pub fn is_session_scoped(self) -> bool {
        !matches!(self, ResourceKind::Sessions)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    MissingDriverNumber,
    InvalidDriverNumber,
    InvalidSessionKey,
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::MissingDriverNumber => write!(f, "driver_number is required"),
            QueryError::InvalidDriverNumber => {
                write!(f, "driver_number must be a non-negative integer")
            }
            QueryError::InvalidSessionKey => {
                write!(f, "session_key must be \"latest\" or a non-negative integer")
            }
        }
    }
}

impl std::error::Error for QueryError {}

/// A normalized request for one resource. Doubles as the cache signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceQuery {
    pub resource: ResourceKind,
    pub session_key: String,
    pub driver_number: Option<u32>,
}

impl ResourceQuery {
    pub fn new(resource: ResourceKind, session_key: impl Into<String>) -> Self {
        Self {
            resource,
            session_key: session_key.into(),
            driver_number: None,
        }
    }

    pub fn with_driver(mut self, driver_number: u32) -> Self {
        self.driver_number = Some(driver_number);
        self
    }

    /// Builds a query from raw request parameters.
    ///
    /// Blank values count as absent. A driver filter on a resource that does not take
    /// one is ignored so it cannot split the cache.
    pub fn from_params(
        resource: ResourceKind,
        session_key: Option<&str>,
        driver_number: Option<&str>,
        default_session_key: &str,
    ) -> Result<Self, QueryError> {
        let session_key = match session_key.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => canonical::normalize_session_key(raw)?,
            None => canonical::normalize_session_key(default_session_key)?,
        };

        let driver_number = match driver_number.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) if resource.accepts_driver_filter() => Some(
                raw.parse::<u32>()
                    .map_err(|_| QueryError::InvalidDriverNumber)?,
            ),
            _ => None,
        };

        if resource.requires_driver_filter() && driver_number.is_none() {
            return Err(QueryError::MissingDriverNumber);
        }

        Ok(Self {
            resource,
            session_key,
            driver_number,
        })
    }

    /// Query parameters in canonical order.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(2);
        if let Some(driver_number) = self.driver_number {
            params.push(("driver_number", driver_number.to_string()));
        }
        if self.resource.is_session_scoped() {
            params.push(("session_key", self.session_key.clone()));
        }
        params
    }

    pub fn signature(&self) -> String {
        canonical::signature(self.resource.as_str(), &self.params())
    }
}

/// Meeting descriptor as published by the upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub meeting_key: u64,
    #[serde(default)]
    pub meeting_name: String,
    #[serde(default)]
    pub country_name: String,
    #[serde(default)]
    pub circuit_short_name: String,
    #[serde(default)]
    pub date_start: String,
}

/// Session record as published by the upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSession {
    pub session_key: u64,
    pub meeting_key: u64,
    #[serde(default)]
    pub session_name: String,
    #[serde(default)]
    pub session_type: String,
    #[serde(default)]
    pub date_start: String,
}

/// Session joined with its meeting, as served on `/api/sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_key: u64,
    pub meeting_key: u64,
    pub meeting_name: String,
    pub country_name: String,
    pub circuit_short_name: String,
    pub session_name: String,
    pub session_type: String,
    pub date_start: String,
}

impl SessionDescriptor {
    pub fn join(session: UpstreamSession, meeting: &Meeting) -> Self {
        Self {
            session_key: session.session_key,
            meeting_key: session.meeting_key,
            meeting_name: meeting.meeting_name.clone(),
            country_name: meeting.country_name.clone(),
            circuit_short_name: meeting.circuit_short_name.clone(),
            session_name: session.session_name,
            session_type: session.session_type,
            date_start: session.date_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_independent_of_parameter_spelling() {
        let a = ResourceQuery::from_params(ResourceKind::Laps, Some(" 9158 "), Some("01"), "latest")
            .expect("query should parse");
        let b = ResourceQuery::from_params(ResourceKind::Laps, Some("9158"), Some("1"), "latest")
            .expect("query should parse");

        assert_eq!(a, b);
        assert_eq!(a.signature(), "laps?driver_number=1&session_key=9158");
    }

    #[test]
    fn car_data_requires_driver_number() {
        let err = ResourceQuery::from_params(ResourceKind::CarData, Some("9158"), None, "latest")
            .expect_err("car_data without driver must fail");
        assert_eq!(err, QueryError::MissingDriverNumber);

        let err =
            ResourceQuery::from_params(ResourceKind::CarData, Some("9158"), Some("  "), "latest")
                .expect_err("blank driver must count as missing");
        assert_eq!(err, QueryError::MissingDriverNumber);
    }

    #[test]
    fn non_numeric_driver_number_is_rejected() {
        let err = ResourceQuery::from_params(ResourceKind::Laps, None, Some("max"), "latest")
            .expect_err("driver must be numeric");
        assert_eq!(err, QueryError::InvalidDriverNumber);
    }

    #[test]
    fn driver_filter_is_dropped_for_resources_without_one() {
        let query =
            ResourceQuery::from_params(ResourceKind::Positions, Some("9158"), Some("44"), "latest")
                .expect("query should parse");
        assert_eq!(query.driver_number, None);
        assert_eq!(query.signature(), "positions?session_key=9158");
    }

    #[test]
    fn missing_session_key_uses_default() {
        let query = ResourceQuery::from_params(ResourceKind::Intervals, None, None, "latest")
            .expect("query should parse");
        assert_eq!(query.session_key, "latest");
        assert_eq!(
            ResourceQuery::new(ResourceKind::Sessions, "latest").signature(),
            "sessions"
        );
    }

    #[test]
    fn ttl_policy_maps_resources_to_classes() {
        let policy = TtlPolicy::default();
        assert_eq!(
            policy.ttl_for(ResourceKind::Drivers),
            Duration::from_secs(300)
        );
        assert_eq!(
            policy.ttl_for(ResourceKind::Locations),
            Duration::from_secs(10)
        );
        assert_eq!(policy.ttl_for(ResourceKind::CarData), Duration::from_secs(5));
        assert_eq!(
            policy.ttl_for(ResourceKind::TeamRadio),
            Duration::from_secs(120)
        );
    }
}
