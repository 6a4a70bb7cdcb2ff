//! Session credential model and bearer-token minting
//!
//! An account is a pair of scraped session cookies plus the identifiers the
//! upstream needs (`csesidx`, team id, user agent). Every upstream call is
//! authorized by a short-lived HS256 bearer token minted from that pair:
//!
//! 1. `Minter::fetch_key_material()` sends the cookies to the `getoxsrf`
//!    handshake endpoint and reads back `keyId` + `xsrfToken`
//! 2. `jwt::decode_signing_key()` turns the `xsrfToken` into HMAC key bytes
//! 3. `jwt::create_jwt()` signs a 300-second token for `csesidx/<id>`
//!
//! There is no refresh: a token is re-minted for each use. This crate has no
//! notion of a pool; classification of failures into the pool's cooldown
//! classes is exposed through `Error::kind()`.

pub mod account;
pub mod constants;
pub mod error;
pub mod jwt;
pub mod token;

pub use account::Account;
pub use constants::*;
pub use error::{Error, FailureKind, Result};
pub use jwt::{create_jwt, decode_signing_key, encode_code_points, verify_signature};
pub use token::{KeyMaterial, MintedToken, Minter};
