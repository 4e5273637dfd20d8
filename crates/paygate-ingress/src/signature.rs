//! Merchant request signatures.
//!
//! Two schemes, selected by the request's `compatible` flag:
//!
//! - **Standard** (`0`): drop `sign` and nulls, sort by key, join as
//!   `k=v&k=v&key=<secret>`, MD5, uppercase hex.
//! - **Compatible** (`1`): drop `sign`, `sign_type`, nulls and empty
//!   strings, sort by key, join as `k=v&k=v` followed directly by the
//!   secret, MD5, uppercase hex.

use md5::{Digest, Md5};
use paygate_types::{PaygateError, Result};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignScheme {
    Standard,
    Compatible,
}

impl SignScheme {
    /// Map the request's `compatible` flag to a scheme. Anything other
    /// than `1` is the standard scheme.
    #[must_use]
    pub fn from_compatible(flag: i32) -> Self {
        if flag == 1 {
            Self::Compatible
        } else {
            Self::Standard
        }
    }
}

/// Uppercase hex MD5 of `text`.
#[must_use]
pub fn md5_upper(text: &str) -> String {
    hex::encode_upper(Md5::digest(text.as_bytes()))
}

/// Render a parameter value the way merchants concatenate it: strings
/// verbatim, everything else as its JSON text.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The string that gets hashed. Exposed for debugging merchant integrations.
#[must_use]
pub fn canonical_string(params: &Map<String, Value>, key: &str, scheme: SignScheme) -> String {
    let mut pairs: Vec<(&String, &Value)> = params
        .iter()
        .filter(|(k, v)| match scheme {
            SignScheme::Standard => k.as_str() != "sign" && !v.is_null(),
            SignScheme::Compatible => {
                k.as_str() != "sign"
                    && k.as_str() != "sign_type"
                    && !v.is_null()
                    && v.as_str() != Some("")
            }
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let joined = pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", render(v)))
        .collect::<Vec<_>>()
        .join("&");

    match scheme {
        SignScheme::Standard if joined.is_empty() => format!("key={key}"),
        SignScheme::Standard => format!("{joined}&key={key}"),
        SignScheme::Compatible => format!("{joined}{key}"),
    }
}

/// Sign `params` with the merchant secret.
#[must_use]
pub fn sign(params: &Map<String, Value>, key: &str, scheme: SignScheme) -> String {
    md5_upper(&canonical_string(params, key, scheme))
}

/// Verify the `sign` parameter of a merchant request.
///
/// # Errors
/// `SignatureInvalid` when the key or the supplied signature is empty, or
/// when the signature does not match.
pub fn verify(params: &Map<String, Value>, key: &str, scheme: SignScheme) -> Result<()> {
    let supplied = params.get("sign").map(render).unwrap_or_default();
    if key.is_empty() || supplied.is_empty() {
        return Err(PaygateError::SignatureInvalid);
    }
    if sign(params, key, scheme).eq_ignore_ascii_case(&supplied) {
        Ok(())
    } else {
        Err(PaygateError::SignatureInvalid)
    }
}

/// Cashier link signature: `MD5_UPPER(order_no + auth_key + unix / bucket)`.
#[must_use]
pub fn auth_sign(order_no: &str, auth_key: &str, unix: i64, bucket_secs: i64) -> String {
    let bucket = if bucket_secs > 0 { unix / bucket_secs } else { unix };
    md5_upper(&format!("{order_no}{auth_key}{bucket}"))
}
