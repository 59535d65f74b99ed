//! Cache key layout for custom-domain mappings.
//!
//! One mapping owns eight keys: the forward entry, the reverse entry and six
//! Traefik router entries.  The router name is derived with [`sanitize`],
//! which has to stay in lock-step with the writer that provisions the router
//! configuration, otherwise routers survive a reap.

/// Prefix of every forward entry (`custom_domain:{domain}`).
pub const FORWARD_PREFIX: &str = "custom_domain:";

/// `SCAN` pattern matching every forward entry.
pub const FORWARD_PATTERN: &str = "custom_domain:*";

/// Default root key of the Traefik Redis provider.
pub const DEFAULT_ROUTER_ROOT: &str = "traefik";

/// Router sub-keys written per custom domain, in deletion order.
const ROUTER_SUFFIXES: [&str; 6] = [
    "rule",
    "entrypoints/0",
    "service",
    "tls/certresolver",
    "middlewares/0",
    "priority",
];

/// Number of keys that make up one mapping.
pub const KEYS_PER_MAPPING: usize = 2 + ROUTER_SUFFIXES.len();

// ---------------------------------------------------------------------------
// Sanitisation
// ---------------------------------------------------------------------------

/// Render a domain as a Traefik-safe router token.
///
/// `.` and `_` become `-`, then anything that is neither alphanumeric nor
/// `-` also becomes `-`.  Case is preserved.
pub fn sanitize(domain: &str) -> String {
    domain
        .chars()
        .map(|c| match c {
            '.' | '_' => '-',
            c if c.is_alphanumeric() || c == '-' => c,
            _ => '-',
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

pub fn forward_key(domain: &str) -> String {
    format!("{FORWARD_PREFIX}{domain}")
}

pub fn reverse_key(owner: &str, repository: &str) -> String {
    format!("{owner}:{repository}")
}

/// Strip the forward prefix from a scanned key.
pub fn domain_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(FORWARD_PREFIX)
}

/// All keys belonging to one mapping under the default router root.
pub fn keys_for(domain: &str, owner: &str, repository: &str) -> [String; KEYS_PER_MAPPING] {
    keys_for_root(DEFAULT_ROUTER_ROOT, domain, owner, repository)
}

/// All keys belonging to one mapping: forward, reverse, then the router
/// entries under `{root}/http/routers/custom-{sanitized}/`.
pub fn keys_for_root(
    root: &str,
    domain: &str,
    owner: &str,
    repository: &str,
) -> [String; KEYS_PER_MAPPING] {
    let router = format!("{root}/http/routers/custom-{}", sanitize(domain));
    let route = |suffix: &str| format!("{router}/{suffix}");

    [
        forward_key(domain),
        reverse_key(owner, repository),
        route(ROUTER_SUFFIXES[0]),
        route(ROUTER_SUFFIXES[1]),
        route(ROUTER_SUFFIXES[2]),
        route(ROUTER_SUFFIXES[3]),
        route(ROUTER_SUFFIXES[4]),
        route(ROUTER_SUFFIXES[5]),
    ]
}

// ---------------------------------------------------------------------------
// Forward value parsing
// ---------------------------------------------------------------------------

/// Split an `owner:repository` forward value on its first `:`.
///
/// Returns `None` when there is no separator.  Anything after the first `:`
/// belongs to the repository part.
pub fn parse_mapping(value: &str) -> Option<(&str, &str)> {
    value.split_once(':')
}
