//! HS256 bearer-token signing
//!
//! The upstream verifier does not use standard base64url over UTF-8 for the
//! header and payload segments. It encodes each character's code point on its
//! own: code points up to 255 become one byte, larger ones become two bytes,
//! low byte first. For ASCII JSON this is identical to standard base64url; it
//! only diverges for non-Latin-1 content, and must match bit for bit there too.
//!
//! The signature segment is plain base64url (no padding) of the HMAC-SHA256
//! digest over `header_b64 + "." + payload_b64`.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::constants::{JWT_AUDIENCE, JWT_ISSUER, TOKEN_LIFETIME_SECS};
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize)]
struct Header<'a> {
    alg: &'static str,
    typ: &'static str,
    kid: &'a str,
}

#[derive(Serialize)]
struct Claims {
    iss: &'static str,
    aud: &'static str,
    sub: String,
    iat: i64,
    exp: i64,
    nbf: i64,
}

/// Encode a string with the per-code-point scheme, base64url without padding.
///
/// Code points above 255 contribute their low byte then their second byte;
/// bits above 16 are dropped rather than rejected, so a stray character in a
/// server-supplied `kid` cannot fail a mint. The signature covers the encoded
/// bytes, so a truncated header still verifies.
pub fn encode_code_points(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    for ch in s.chars() {
        let cp = ch as u32;
        if cp > 0xFF {
            bytes.push((cp & 0xFF) as u8);
            bytes.push(((cp >> 8) & 0xFF) as u8);
        } else {
            bytes.push(cp as u8);
        }
    }
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode an `xsrfToken` into HMAC key bytes.
///
/// The token arrives as base64url with its padding stripped; padding is
/// restored to a multiple of four before decoding.
pub fn decode_signing_key(xsrf_token: &str) -> Result<Vec<u8>> {
    let mut padded = xsrf_token.trim().to_string();
    let rem = padded.len() % 4;
    if rem != 0 {
        padded.extend(std::iter::repeat_n('=', 4 - rem));
    }
    URL_SAFE
        .decode(padded.as_bytes())
        .map_err(|e| Error::InvalidKey(format!("xsrfToken is not base64url: {e}")))
}

/// Build and sign a token for `csesidx/<subject_id>` issued at `issued_at`
/// (unix seconds), valid for `TOKEN_LIFETIME_SECS`.
pub fn create_jwt(key: &[u8], key_id: &str, subject_id: &str, issued_at: i64) -> Result<String> {
    let header = Header {
        alg: "HS256",
        typ: "JWT",
        kid: key_id,
    };
    let claims = Claims {
        iss: JWT_ISSUER,
        aud: JWT_AUDIENCE,
        sub: format!("csesidx/{subject_id}"),
        iat: issued_at,
        exp: issued_at + TOKEN_LIFETIME_SECS,
        nbf: issued_at,
    };

    let header_json = serde_json::to_string(&header)
        .map_err(|e| Error::InvalidKey(format!("serializing token header: {e}")))?;
    let claims_json = serde_json::to_string(&claims)
        .map_err(|e| Error::InvalidKey(format!("serializing token claims: {e}")))?;

    let signing_input = format!(
        "{}.{}",
        encode_code_points(&header_json),
        encode_code_points(&claims_json)
    );
    let signature = sign(key, signing_input.as_bytes())?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Check a token's HS256 signature against `key`. Claims are not inspected.
pub fn verify_signature(token: &str, key: &[u8]) -> bool {
    let Some((signing_input, signature_b64)) = token.rsplit_once('.') else {
        return false;
    };
    if signing_input.matches('.').count() != 1 {
        return false;
    }
    let Ok(signature) = URL_SAFE_NO_PAD.decode(signature_b64) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

fn sign(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::InvalidKey(format!("HMAC key rejected: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}
