use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the carrier's request signature.
pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Computes the carrier callback signature: HMAC-SHA1 over the full request URL
/// followed by each form parameter as `key` + `value`, keys in sorted order,
/// base64 encoded.
pub fn compute_signature(
    secret: &str,
    url: &str,
    params: &BTreeMap<String, String>,
) -> Option<String> {
    let mut data = String::from(url);
    for (key, value) in params {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(data.as_bytes());
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(
    secret: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    provided: &str,
) -> bool {
    let Some(expected) = compute_signature(secret, url, params) else {
        return false;
    };
    ConstantTimeEq::ct_eq(expected.as_bytes(), provided.trim().as_bytes()).into()
}
