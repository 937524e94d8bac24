use crate::QueryError;

pub const LATEST_SESSION: &str = "latest";

pub fn normalize_session_key(raw: &str) -> Result<String, QueryError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(LATEST_SESSION) {
        return Ok(LATEST_SESSION.to_string());
    }

    raw.parse::<u64>()
        .map(|key| key.to_string())
        .map_err(|_| QueryError::InvalidSessionKey)
}

/// Renders `resource?k1=v1&k2=v2` with keys sorted, so equal queries always render equal.
pub fn signature(resource: &str, params: &[(&str, String)]) -> String {
    let mut sorted = params.iter().collect::<Vec<_>>();
    sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

    if sorted.is_empty() {
        return resource.to_string();
    }

    let query = sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", resource, query)
}
