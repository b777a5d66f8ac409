#![forbid(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sketchy_domain::{SecretString, UserId};
use thiserror::Error;

use crate::util::time::unix_secs_now;

/// Claims carried by a `v1.<payload>.<sig>` bearer token.
///
/// `sub` is the stable user id, `name` the display name shown to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
	pub sub: String,
	#[serde(default)]
	pub name: String,
	pub exp: u64,
}

/// Verified identity extracted from a bearer token.
#[derive(Debug, Clone)]
pub struct Identity {
	pub user_id: UserId,
	pub display_name: String,
}

/// Fatal authentication failures; the connection is closed with a
/// policy-violation status and no session is created.
#[derive(Debug, Error)]
pub enum AuthError {
	#[error("invalid token format")]
	InvalidFormat,
	#[error("invalid token signature")]
	InvalidSignature,
	#[error("malformed token claims")]
	MalformedClaims,
	#[error("token expired")]
	Expired,
	#[error("missing subject claim")]
	MissingSubject,
}

/// Verify a bearer token and extract the caller's identity.
///
/// Stateless: no external calls, called exactly once per connection before
/// any protocol frame is accepted.
pub fn authenticate(token: &str, secret: &SecretString) -> Result<Identity, AuthError> {
	let claims = verify_hmac_token(token, secret)?;

	let user_id = UserId::new(claims.sub.trim()).map_err(|_| AuthError::MissingSubject)?;
	let display_name = if claims.name.trim().is_empty() {
		user_id.as_str().to_string()
	} else {
		claims.name.trim().to_string()
	};

	Ok(Identity { user_id, display_name })
}

/// Verify a `v1.<payload-b64>.<sig-b64>` HMAC-SHA256 token.
pub fn verify_hmac_token(token: &str, secret: &SecretString) -> Result<AuthClaims, AuthError> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(AuthError::InvalidFormat);
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthError::InvalidFormat)?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.expose().as_bytes());
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthError::InvalidFormat)?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(AuthError::InvalidSignature);
	}

	let claims: AuthClaims = serde_json::from_slice(&payload).map_err(|_| AuthError::MalformedClaims)?;
	if claims.exp <= unix_secs_now() {
		return Err(AuthError::Expired);
	}

	Ok(claims)
}

/// Mint a token for the given claims. Used by tests and dev tooling; the
/// production issuer lives in the external identity service.
pub fn mint_hmac_token(claims: &AuthClaims, secret: &SecretString) -> String {
	let payload = serde_json::to_vec(claims).unwrap_or_default();
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig = sign(payload_b64.as_bytes(), secret.expose().as_bytes());
	format!("v1.{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(sig))
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn secret() -> SecretString {
		SecretString::new("test-secret")
	}

	fn claims(sub: &str, name: &str, exp: u64) -> AuthClaims {
		AuthClaims {
			sub: sub.to_string(),
			name: name.to_string(),
			exp,
		}
	}

	#[test]
	fn accepts_valid_token() {
		let token = mint_hmac_token(&claims("u1", "Ada", unix_secs_now() + 3600), &secret());
		let identity = authenticate(&token, &secret()).expect("valid token");
		assert_eq!(identity.user_id.as_str(), "u1");
		assert_eq!(identity.display_name, "Ada");
	}

	#[test]
	fn falls_back_to_user_id_when_name_missing() {
		let token = mint_hmac_token(&claims("u1", "", unix_secs_now() + 3600), &secret());
		let identity = authenticate(&token, &secret()).expect("valid token");
		assert_eq!(identity.display_name, "u1");
	}

	#[test]
	fn rejects_bad_signature() {
		let token = mint_hmac_token(&claims("u1", "Ada", unix_secs_now() + 3600), &secret());
		let err = authenticate(&token, &SecretString::new("other-secret")).expect_err("must fail");
		assert!(matches!(err, AuthError::InvalidSignature));
	}

	#[test]
	fn rejects_expired_token() {
		let token = mint_hmac_token(&claims("u1", "Ada", 1), &secret());
		let err = authenticate(&token, &secret()).expect_err("must fail");
		assert!(matches!(err, AuthError::Expired));
	}

	#[test]
	fn rejects_missing_subject() {
		let token = mint_hmac_token(&claims("   ", "Ada", unix_secs_now() + 3600), &secret());
		let err = authenticate(&token, &secret()).expect_err("must fail");
		assert!(matches!(err, AuthError::MissingSubject));
	}

	#[test]
	fn rejects_garbage_tokens() {
		assert!(matches!(authenticate("", &secret()), Err(AuthError::InvalidFormat)));
		assert!(matches!(authenticate("v2.a.b", &secret()), Err(AuthError::InvalidFormat)));
		assert!(matches!(
			authenticate("v1.!notb64!.sig", &secret()),
			Err(AuthError::InvalidFormat)
		));
	}

	#[test]
	fn rejects_tampered_payload() {
		let token = mint_hmac_token(&claims("u1", "Ada", unix_secs_now() + 3600), &secret());
		let mut parts = token.split('.').map(str::to_string).collect::<Vec<_>>();
		parts[1] = URL_SAFE_NO_PAD.encode(br#"{"sub":"u2","name":"Eve","exp":99999999999}"#);
		let forged = parts.join(".");
		let err = authenticate(&forged, &secret()).expect_err("must fail");
		assert!(matches!(err, AuthError::InvalidSignature));
	}
}
