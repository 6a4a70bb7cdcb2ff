//! Upstream handshake and token constants
//!
//! These identify the upstream's public endpoints and the claims its token
//! verifier expects. None of them are secrets; the secrets are the per-account
//! session cookies.

/// Handshake endpoint returning `keyId` + `xsrfToken` for a cookie pair
pub const GETOXSRF_URL: &str = "https://business.gemini.google/auth/getoxsrf";

/// `iss` claim of minted tokens
pub const JWT_ISSUER: &str = "https://business.gemini.google";

/// `aud` claim of minted tokens
pub const JWT_AUDIENCE: &str = "https://biz-discoveryengine.googleapis.com";

/// Lifetime of a minted token, in seconds. Not refreshable.
pub const TOKEN_LIFETIME_SECS: i64 = 300;

/// Handshake request timeout, in seconds
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Anti-XSSI prefix the handshake endpoint puts in front of its JSON body
pub const XSSI_PREFIX: &str = ")]}'";

/// User agent used when an account record does not carry one
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Cookie name carrying the secure session
pub const SECURE_SESSION_COOKIE: &str = "__Secure-C_SES";

/// Cookie name carrying the host session
pub const HOST_SESSION_COOKIE: &str = "__Host-C_OSES";
