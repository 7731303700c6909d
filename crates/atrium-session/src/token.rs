use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh token pair as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

/// Reads the `exp` claim from a JWT without verifying its signature.
///
/// Any malformed input (wrong segment count, invalid base64, invalid JSON,
/// missing or non-numeric `exp`) yields `None`. Callers treat `None` as
/// "needs refresh", never as a fatal condition.
#[must_use]
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// True when the token is malformed or its expiry falls within `leeway`
/// from now. Drives proactive refresh scheduling.
#[must_use]
pub fn expires_within(token: &str, leeway: Duration) -> bool {
    match decode_expiry(token) {
        Some(expiry) => Utc::now() + leeway >= expiry,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn decode_expiry_reads_exp_claim() {
        let token = token_with_exp(1_900_000_000);
        let expiry = decode_expiry(&token).expect("expiry");
        assert_eq!(expiry.timestamp(), 1_900_000_000);
    }

    #[test]
    fn decode_expiry_rejects_wrong_segment_count() {
        assert_eq!(decode_expiry("only-one-segment"), None);
        assert_eq!(decode_expiry("a.b"), None);
        assert_eq!(decode_expiry("a.b.c.d"), None);
    }

    #[test]
    fn decode_expiry_swallows_bad_base64() {
        assert_eq!(decode_expiry("head.@@not-base64@@.sig"), None);
    }

    #[test]
    fn decode_expiry_swallows_missing_exp() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1"}"#);
        assert_eq!(decode_expiry(&format!("h.{payload}.s")), None);
    }

    #[test]
    fn decode_expiry_swallows_non_numeric_exp() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"exp":"soon"}"#);
        assert_eq!(decode_expiry(&format!("h.{payload}.s")), None);
    }

    #[test]
    fn expires_within_is_true_for_malformed_tokens() {
        assert!(expires_within("not-a-jwt", Duration::seconds(0)));
    }

    #[test]
    fn expires_within_respects_leeway() {
        let soon = (Utc::now() + Duration::seconds(30)).timestamp();
        let token = token_with_exp(soon);
        assert!(expires_within(&token, Duration::seconds(60)));
        assert!(!expires_within(&token, Duration::seconds(0)));
    }

    #[test]
    fn expires_within_is_true_for_past_expiry() {
        let token = token_with_exp((Utc::now() - Duration::hours(1)).timestamp());
        assert!(expires_within(&token, Duration::seconds(0)));
    }
}
