//! Joins feed records against the static team and roster reference.

use std::collections::HashMap;

use pitwall_contracts::EventRecord;
use serde_json::{Map, Value};

use crate::reduce::{LatestState, RANK_FIELD};

pub const UNKNOWN_TEAM: &str = "Unknown Team";
pub const NEUTRAL_COLOUR: &str = "CCCCCC";
pub const UNKNOWN_COUNTRY: &str = "XXX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverReference {
    pub team: &'static str,
    pub first_name: &'static str,
    pub last_name: &'static str,
    pub country_code: &'static str,
}

const fn driver(
    team: &'static str,
    first_name: &'static str,
    last_name: &'static str,
    country_code: &'static str,
) -> DriverReference {
    DriverReference {
        team,
        first_name,
        last_name,
        country_code,
    }
}

const DRIVER_ROSTER: [(u32, DriverReference); 21] = [
    (1, driver("Red Bull Racing", "Max", "Verstappen", "NLD")),
    (11, driver("Red Bull Racing", "Sergio", "Perez", "MEX")),
    (16, driver("Ferrari", "Charles", "Leclerc", "MON")),
    (55, driver("Ferrari", "Carlos", "Sainz", "ESP")),
    (44, driver("Mercedes", "Lewis", "Hamilton", "GBR")),
    (63, driver("Mercedes", "George", "Russell", "GBR")),
    (14, driver("Aston Martin", "Fernando", "Alonso", "ESP")),
    (18, driver("Aston Martin", "Lance", "Stroll", "CAN")),
    (10, driver("Alpine", "Pierre", "Gasly", "FRA")),
    (31, driver("Alpine", "Esteban", "Ocon", "FRA")),
    (4, driver("McLaren", "Lando", "Norris", "GBR")),
    (81, driver("McLaren", "Oscar", "Piastri", "AUS")),
    (27, driver("Haas F1 Team", "Nico", "Hulkenberg", "DEU")),
    (20, driver("Haas F1 Team", "Kevin", "Magnussen", "DNK")),
    (22, driver("RB", "Yuki", "Tsunoda", "JPN")),
    (21, driver("RB", "Nyck", "de Vries", "NLD")),
    (3, driver("RB", "Daniel", "Ricciardo", "AUS")),
    (23, driver("Williams", "Alexander", "Albon", "THA")),
    (2, driver("Williams", "Logan", "Sargeant", "USA")),
    (77, driver("Alfa Romeo", "Valtteri", "Bottas", "FIN")),
    (24, driver("Alfa Romeo", "Zhou", "Guanyu", "CHN")),
];

const TEAM_COLOURS: [(&str, &str); 11] = [
    ("Red Bull Racing", "0600EF"),
    ("Ferrari", "DC0000"),
    ("Mercedes", "00D2BE"),
    ("Alpine", "0090FF"),
    ("McLaren", "FF8700"),
    ("Alfa Romeo", "900000"),
    ("Aston Martin", "006F62"),
    ("Haas F1 Team", "FFFFFF"),
    ("AlphaTauri", "2B4562"),
    ("Williams", "0057E9"),
    ("RB", "0041C2"),
];

#[derive(Debug, Clone)]
pub struct ReferenceTable {
    drivers: HashMap<u32, DriverReference>,
    team_colours: HashMap<&'static str, &'static str>,
}

impl ReferenceTable {
    pub fn builtin() -> Self {
        Self {
            drivers: DRIVER_ROSTER.into_iter().collect(),
            team_colours: TEAM_COLOURS.into_iter().collect(),
        }
    }

    pub fn driver(&self, driver_number: u32) -> Option<&DriverReference> {
        self.drivers.get(&driver_number)
    }

    pub fn team_colour(&self, team: &str) -> &'static str {
        self.team_colours
            .get(team)
            .copied()
            .unwrap_or(NEUTRAL_COLOUR)
    }
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Attaches team, colour, names, country and latest position to each roster entry.
///
/// Reference misses fall back to sentinels. Output is ordered by position, unplaced
/// drivers last, then by driver number.
pub fn enrich_roster(
    drivers: Vec<Value>,
    positions: &LatestState,
    reference: &ReferenceTable,
) -> Vec<Value> {
    let mut enriched = drivers
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(map) => Some(enrich_driver(map, positions, reference)),
            _ => {
                tracing::warn!(reason = "not_an_object", "enrich.driver_dropped");
                None
            }
        })
        .collect::<Vec<_>>();

    enriched.sort_by_key(|(position, driver_number, _)| {
        (position.is_none(), *position, *driver_number)
    });
    enriched.into_iter().map(|(_, _, value)| value).collect()
}

fn enrich_driver(
    mut map: Map<String, Value>,
    positions: &LatestState,
    reference: &ReferenceTable,
) -> (Option<u64>, Option<u64>, Value) {
    let driver_number = map.get("driver_number").and_then(Value::as_u64);
    let entry = driver_number
        .and_then(|n| u32::try_from(n).ok())
        .and_then(|n| reference.driver(n));

    let team = entry.map(|d| d.team).unwrap_or(UNKNOWN_TEAM);
    let (fallback_first, fallback_last) = split_full_name(&map);
    let first_name = entry
        .map(|d| d.first_name.to_string())
        .or_else(|| string_field(&map, "first_name"))
        .unwrap_or(fallback_first);
    let last_name = entry
        .map(|d| d.last_name.to_string())
        .or_else(|| string_field(&map, "last_name"))
        .unwrap_or(fallback_last);
    let country_code = entry.map(|d| d.country_code).unwrap_or(UNKNOWN_COUNTRY);

    let position = driver_number
        .and_then(|n| u32::try_from(n).ok())
        .and_then(|n| positions.get(n))
        .and_then(|record| record.rank(RANK_FIELD));

    map.insert("team_name".to_string(), Value::from(team));
    map.insert(
        "team_colour".to_string(),
        Value::from(reference.team_colour(team)),
    );
    map.insert("first_name".to_string(), Value::from(first_name));
    map.insert("last_name".to_string(), Value::from(last_name));
    map.insert("country_code".to_string(), Value::from(country_code));
    map.insert(
        "position".to_string(),
        position.map(Value::from).unwrap_or(Value::Null),
    );

    (position, driver_number, Value::Object(map))
}

fn string_field(map: &Map<String, Value>, field: &str) -> Option<String> {
    map.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn split_full_name(map: &Map<String, Value>) -> (String, String) {
    let full_name = string_field(map, "full_name").unwrap_or_default();
    match full_name.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (full_name, String::new()),
    }
}

/// Adds standings labels to rank-ordered position records.
///
/// `interval` is always null: gap computation between positions is not derived here.
pub fn label_standings(ranked: Vec<EventRecord>) -> Vec<Value> {
    ranked
        .into_iter()
        .enumerate()
        .map(|(idx, mut record)| {
            let leader = idx == 0 && record.rank(RANK_FIELD).is_some();
            record.set("leader", Value::Bool(leader));
            record.set("interval", Value::Null);
            record.into_value()
        })
        .collect()
}
