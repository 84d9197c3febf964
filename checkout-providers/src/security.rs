//! Security utilities for request signing and webhook verification.
//!
//! Every comparison of a received signature against a computed one is
//! constant-time.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a timestamped webhook, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Why an inbound payload could not be trusted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("malformed {0}")]
    Malformed(&'static str),

    #[error("timestamp outside the {WEBHOOK_TOLERANCE_SECS}s tolerance window")]
    Expired,

    #[error("signature mismatch")]
    Mismatch,

    #[error("invalid key: {0}")]
    Key(String),

    #[error("decryption failed")]
    Decrypt,
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// ─────────────────────────────────────────────────────────────────────────────
// Legacy MD5 request signing
// ─────────────────────────────────────────────────────────────────────────────

/// Builds `k1=v1&k2=v2...` with keys in ascending order.
pub fn canonical_params<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut pairs: Vec<(&str, &str)> = params.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Upper-case hex MD5 of the canonical string with the secret appended.
///
/// Only kept for gateways that still require it.
pub fn sign_md5<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>, secret: &str) -> String {
    let mut payload = canonical_params(params);
    payload.push_str(secret);
    hex::encode_upper(Md5::digest(payload.as_bytes()))
}

pub fn verify_md5<'a>(
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
    secret: &str,
    sign: &str,
) -> bool {
    let expected = sign_md5(params, secret);
    ct_eq(expected.as_bytes(), sign.to_ascii_uppercase().as_bytes())
}

// ─────────────────────────────────────────────────────────────────────────────
// HMAC-SHA256 webhooks
// ─────────────────────────────────────────────────────────────────────────────

fn hmac_sha256(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Signs a webhook payload using HMAC-SHA256, hex encoded.
pub fn sign_webhook(payload: &[u8], secret: &str) -> String {
    hex::encode(hmac_sha256(secret.as_bytes(), payload))
}

/// Verifies a hex HMAC-SHA256 webhook signature using constant-time comparison.
pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let expected = sign_webhook(payload, secret);
    ct_eq(
        expected.as_bytes(),
        signature.trim().to_ascii_lowercase().as_bytes(),
    )
}

/// Signs a webhook payload using HMAC-SHA256, base64 encoded.
pub fn sign_webhook_base64(payload: &[u8], secret: &[u8]) -> String {
    STANDARD.encode(hmac_sha256(secret, payload))
}

pub fn verify_webhook_signature_base64(payload: &[u8], signature: &str, secret: &[u8]) -> bool {
    let expected = sign_webhook_base64(payload, secret);
    ct_eq(expected.as_bytes(), signature.trim().as_bytes())
}

/// Rejects timestamps more than [`WEBHOOK_TOLERANCE_SECS`] away from `now`.
pub fn check_timestamp(timestamp: i64, now: i64) -> Result<(), SignatureError> {
    if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<i64, SignatureError> {
    raw.trim()
        .parse()
        .map_err(|_| SignatureError::Malformed("timestamp"))
}

/// `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]` over `"{t}.{body}"`.
pub fn verify_stripe_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Missing("timestamp"))?;
    if candidates.is_empty() {
        return Err(SignatureError::Missing("v1 signature"));
    }
    check_timestamp(parse_timestamp(timestamp)?, now)?;

    let mut payload = format!("{timestamp}.").into_bytes();
    payload.extend_from_slice(body);
    if candidates
        .iter()
        .any(|sig| verify_webhook_signature(&payload, sig, secret))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// `Paddle-Signature: ts=<unix>;h1=<hex>` over `"{ts}:{body}"`.
pub fn verify_paddle_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(';') {
        match part.trim().split_once('=') {
            Some(("ts", v)) => timestamp = Some(v),
            Some(("h1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Missing("ts"))?;
    if candidates.is_empty() {
        return Err(SignatureError::Missing("h1 signature"));
    }
    check_timestamp(parse_timestamp(timestamp)?, now)?;

    let mut payload = format!("{timestamp}:").into_bytes();
    payload.extend_from_slice(body);
    if candidates
        .iter()
        .any(|sig| verify_webhook_signature(&payload, sig, secret))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Standard Webhooks (`webhook-id`, `webhook-timestamp`,
/// `webhook-signature: v1,<base64> ...`) over `"{id}.{ts}.{body}"`.
///
/// A `whsec_`-prefixed secret is base64 decoded; anything else is used as
/// raw bytes.
pub fn verify_standard_webhook(
    id: &str,
    timestamp: &str,
    signatures: &str,
    body: &[u8],
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    check_timestamp(parse_timestamp(timestamp)?, now)?;

    let key = match secret.strip_prefix("whsec_") {
        Some(encoded) => STANDARD
            .decode(encoded)
            .map_err(|e| SignatureError::Key(e.to_string()))?,
        None => secret.as_bytes().to_vec(),
    };

    let mut payload = format!("{id}.{}.", timestamp.trim()).into_bytes();
    payload.extend_from_slice(body);

    let mut seen = false;
    for entry in signatures.split_whitespace() {
        if let Some(sig) = entry.strip_prefix("v1,") {
            seen = true;
            if verify_webhook_signature_base64(&payload, sig, &key) {
                return Ok(());
            }
        }
    }
    if seen {
        Err(SignatureError::Mismatch)
    } else {
        Err(SignatureError::Missing("v1 signature"))
    }
}

/// Adyen notification HMAC: hex key, base64 HMAC-SHA256 over the
/// colon-joined item fields.
pub fn sign_adyen_item(fields: &[&str], hex_key: &str) -> Result<String, SignatureError> {
    let key = hex::decode(hex_key).map_err(|e| SignatureError::Key(e.to_string()))?;
    Ok(sign_webhook_base64(fields.join(":").as_bytes(), &key))
}

pub fn verify_adyen_item(
    fields: &[&str],
    hex_key: &str,
    signature: &str,
) -> Result<(), SignatureError> {
    let expected = sign_adyen_item(fields, hex_key)?;
    if ct_eq(expected.as_bytes(), signature.trim().as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RSA-SHA256 and AEAD (WeChat Pay v3)
// ─────────────────────────────────────────────────────────────────────────────

/// PKCS#1 v1.5 RSA-SHA256 signature, base64 encoded.
pub fn rsa_sign(key: &RsaPrivateKey, message: &[u8]) -> String {
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    STANDARD.encode(signing_key.sign(message).to_bytes())
}

pub fn rsa_verify(
    key: &RsaPublicKey,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), SignatureError> {
    let raw = STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| SignatureError::Malformed("signature"))?;
    let signature =
        Signature::try_from(raw.as_slice()).map_err(|_| SignatureError::Malformed("signature"))?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(message, &signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// Opens an AEAD_AES_256_GCM sealed resource.
///
/// `ciphertext_b64` carries the 16-byte tag at its end.
pub fn aes_gcm_open(
    key: &[u8],
    nonce: &str,
    associated_data: &str,
    ciphertext_b64: &str,
) -> Result<Vec<u8>, SignatureError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| SignatureError::Key(e.to_string()))?;
    if nonce.len() != 12 {
        return Err(SignatureError::Malformed("nonce"));
    }
    let ciphertext = STANDARD
        .decode(ciphertext_b64)
        .map_err(|_| SignatureError::Malformed("ciphertext"))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: &ciphertext,
                aad: associated_data.as_bytes(),
            },
        )
        .map_err(|_| SignatureError::Decrypt)
}
