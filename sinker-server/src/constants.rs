/// The `Server` header of HTTP responses.
pub const SERVER: &str = concat!("sinker/", env!("CARGO_PKG_VERSION"));

/// The `User-Agent` of outgoing requests.
pub const USER_AGENT: &str = SERVER;
