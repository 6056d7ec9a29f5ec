use std::net::Ipv4Addr;

/// Neutral bucket shared by all uncoded connections when the deployment
/// requires an explicit code.
pub const LOBBY_KEY: &str = "lobby";

/// Fallback bucket when no client address is available.
pub const UNKNOWN_ADDR_KEY: &str = "ip:unknown";

/// Maximum length of an explicit group code.
pub const MAX_CODE_LENGTH: usize = 32;

/// Resolve the room key for a connection. Deterministic, no side effects.
///
/// Priority: a valid explicit code wins; otherwise the neutral lobby when the
/// deployment requires codes; otherwise an address-derived bucket so
/// co-located users land in the same room without coordination.
pub fn resolve_room_key(code: Option<&str>, addr: Option<&str>, require_code: bool) -> String {
    if let Some(code) = code
        && is_valid_code(code)
    {
        return format!("code:{}", code.to_lowercase());
    }

    if require_code {
        return LOBBY_KEY.to_string();
    }

    match addr {
        Some(addr) if !addr.is_empty() => addr_bucket(addr),
        _ => UNKNOWN_ADDR_KEY.to_string(),
    }
}

/// An explicit code must match `[A-Za-z0-9\-_.]{1,32}`.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_CODE_LENGTH
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Bucket an address: a /24-equivalent for IPv4, a /48-equivalent (first four
/// colon-delimited segments) for anything else.
fn addr_bucket(addr: &str) -> String {
    if let Ok(v4) = addr.parse::<Ipv4Addr>() {
        let [a, b, c, _] = v4.octets();
        return format!("ip:{a}.{b}.{c}");
    }

    let prefix: Vec<&str> = addr.split(':').take(4).collect();
    format!("ip:{}", prefix.join(":"))
}
