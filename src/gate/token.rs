//! Time-windowed session tokens.
//!
//! A token is `hex(HMAC-SHA256(secret, identity | bucket | canonical(snapshot) | salt))`.
//! Nothing is stored server side; verification re-derives the digest for every
//! bucket inside the acceptance window and every accepted channel salt.

use crate::gate::{
    clock::{Clock, time_bucket},
    config::TokenConfig,
};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sha2::Sha256;
use std::{fmt::Write as _, sync::Arc};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token secret is not configured")]
    MissingSecret,
}

pub struct TokenAuthenticator {
    secret: Option<SecretString>,
    config: TokenConfig,
    clock: Arc<dyn Clock>,
}

impl TokenAuthenticator {
    /// An empty secret is treated as no secret at all.
    #[must_use]
    pub fn new(secret: Option<SecretString>, config: TokenConfig, clock: Arc<dyn Clock>) -> Self {
        let secret = secret.filter(|secret| !secret.expose_secret().trim().is_empty());
        Self {
            secret,
            config,
            clock,
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Derive a token for an explicit bucket.
    ///
    /// # Errors
    /// Returns `TokenError::MissingSecret` when no secret is configured.
    pub fn issue(
        &self,
        identity: &str,
        bucket: i64,
        snapshot: &Value,
        channel_salt: &str,
    ) -> Result<String, TokenError> {
        let canonical = canonical_json(snapshot);
        let mac = self
            .keyed_mac(identity, bucket, &canonical, channel_salt)
            .ok_or(TokenError::MissingSecret)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Derive a token for the current bucket.
    ///
    /// # Errors
    /// Returns `TokenError::MissingSecret` when no secret is configured.
    pub fn issue_now(
        &self,
        identity: &str,
        snapshot: &Value,
        channel_salt: &str,
    ) -> Result<String, TokenError> {
        let bucket = time_bucket(self.clock.now_ms(), self.config.bucket_ms);
        self.issue(identity, bucket, snapshot, channel_salt)
    }

    /// Accept `token` if it was issued for `identity` and `snapshot` in any
    /// bucket within `window_ms` of now under any configured salt.
    #[must_use]
    pub fn verify(&self, token: &str, identity: &str, snapshot: &Value, window_ms: i64) -> bool {
        self.verify_for_channel(token, identity, snapshot, window_ms, None)
    }

    /// Same as [`Self::verify`], additionally accepting the `ip_<client_ip>` salt.
    #[must_use]
    pub fn verify_for_channel(
        &self,
        token: &str,
        identity: &str,
        snapshot: &Value,
        window_ms: i64,
        client_ip: Option<&str>,
    ) -> bool {
        if !self.is_configured() {
            debug!("token verification attempted without a configured secret");
            return false;
        }

        let Ok(presented) = hex::decode(token.trim()) else {
            debug!("session token is not hex encoded");
            return false;
        };

        let canonical = canonical_json(snapshot);
        let salts = self.salts(client_ip);
        let now = self.clock.now_ms();

        for bucket in candidate_buckets(now, self.config.bucket_ms, window_ms) {
            for salt in &salts {
                let Some(mac) = self.keyed_mac(identity, bucket, &canonical, salt) else {
                    return false;
                };
                if mac.verify_slice(&presented).is_ok() {
                    debug!(bucket, "session token accepted");
                    return true;
                }
            }
        }

        debug!("session token rejected");
        false
    }

    fn salts(&self, client_ip: Option<&str>) -> Vec<String> {
        let mut salts = self.config.salt_variants.clone();
        if let Some(ip) = client_ip.map(str::trim).filter(|ip| !ip.is_empty()) {
            let own = format!("ip_{ip}");
            if !salts.contains(&own) {
                salts.push(own);
            }
        }
        salts
    }

    fn keyed_mac(
        &self,
        identity: &str,
        bucket: i64,
        canonical: &str,
        salt: &str,
    ) -> Option<HmacSha256> {
        let secret = self.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).ok()?;
        mac.update(format!("{identity}|{bucket}|{canonical}|{salt}").as_bytes());
        Some(mac)
    }
}

/// Buckets to try, nearest to `now` first, alternating older and newer.
fn candidate_buckets(now_ms: i64, bucket_ms: i64, window_ms: i64) -> Vec<i64> {
    let current = time_bucket(now_ms, bucket_ms);
    if bucket_ms <= 0 {
        return vec![current];
    }

    let window_ms = window_ms.max(0);
    let steps = window_ms / bucket_ms + 1;
    let mut buckets = Vec::with_capacity(usize::try_from(steps * 2 + 1).unwrap_or(1));
    buckets.push(current);
    for step in 1..=steps {
        buckets.push(current - step * bucket_ms);
        buckets.push(current + step * bucket_ms);
    }
    // a bucket start is the token's timestamp; it must lie within the window
    buckets.retain(|bucket| (now_ms - bucket).abs() <= window_ms);
    buckets
}

/// Compact JSON with object keys sorted at every depth.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::clock::ManualClock;
    use serde_json::json;

    const NOW: i64 = 1_700_000_012_345;
    const PLAYER: &str = "0x1111111111111111111111111111111111111111";

    fn authenticator(clock: Arc<ManualClock>) -> TokenAuthenticator {
        TokenAuthenticator::new(
            Some(SecretString::from("test-secret")),
            TokenConfig::default(),
            clock,
        )
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"score": 10, "level": 2, "player": {"y": 1, "x": 2}, "tags": ["b", "a"]});
        assert_eq!(
            canonical_json(&value),
            r#"{"level":2,"player":{"x":2,"y":1},"score":10,"tags":["b","a"]}"#
        );
    }

    #[test]
    fn issued_token_verifies_within_window() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = authenticator(clock.clone());
        let state = json!({"score": 100, "level": 1});

        let token = auth.issue_now(PLAYER, &state, "").unwrap();
        assert_eq!(token.len(), 64);
        assert!(auth.verify(&token, PLAYER, &state, 600_000));

        clock.advance(597_000);
        assert!(auth.verify(&token, PLAYER, &state, 600_000));
    }

    #[test]
    fn window_is_measured_from_the_bucket_start() {
        let bucket = time_bucket(NOW, 30_000);
        let clock = Arc::new(ManualClock::new(bucket));
        let auth = authenticator(clock.clone());
        let state = json!({});
        let token = auth.issue(PLAYER, bucket, &state, "").unwrap();

        clock.set(bucket + 600_000);
        assert!(auth.verify(&token, PLAYER, &state, 600_000));

        clock.set(bucket + 600_001);
        assert!(!auth.verify(&token, PLAYER, &state, 600_000));

        clock.set(bucket + 615_000);
        assert!(!auth.verify(&token, PLAYER, &state, 600_000));

        clock.set(bucket + 625_000);
        assert!(!auth.verify(&token, PLAYER, &state, 600_000));
    }

    #[test]
    fn token_from_too_far_ahead_is_rejected() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = authenticator(clock);
        let state = json!({});

        let bucket = time_bucket(NOW, 30_000) + 630_000;
        let token = auth.issue(PLAYER, bucket, &state, "").unwrap();
        assert!(!auth.verify(&token, PLAYER, &state, 600_000));
    }

    #[test]
    fn token_outside_window_is_rejected() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = authenticator(clock.clone());
        let state = json!({"score": 100});

        let token = auth.issue_now(PLAYER, &state, "").unwrap();
        clock.advance(700_000);
        assert!(!auth.verify(&token, PLAYER, &state, 600_000));
    }

    #[test]
    fn token_from_slightly_ahead_clock_is_accepted() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = authenticator(clock.clone());
        let state = json!({});

        let bucket = time_bucket(NOW, 30_000) + 60_000;
        let token = auth.issue(PLAYER, bucket, &state, "").unwrap();
        assert!(auth.verify(&token, PLAYER, &state, 600_000));
    }

    #[test]
    fn token_is_bound_to_identity_and_state() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = authenticator(clock);
        let state = json!({"score": 100});
        let token = auth.issue_now(PLAYER, &state, "").unwrap();

        let other = "0x2222222222222222222222222222222222222222";
        assert!(!auth.verify(&token, other, &state, 600_000));
        assert!(!auth.verify(&token, PLAYER, &json!({"score": 101}), 600_000));
    }

    #[test]
    fn key_order_does_not_change_the_token() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = authenticator(clock);
        let issued = json!({"score": 1, "level": 2});
        let presented: Value = serde_json::from_str(r#"{"level":2,"score":1}"#).unwrap();
        let token = auth.issue_now(PLAYER, &issued, "").unwrap();
        assert!(auth.verify(&token, PLAYER, &presented, 600_000));
    }

    #[test]
    fn salt_variants_and_client_ip_salt() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = authenticator(clock);
        let state = json!({});

        let localhost = auth.issue_now(PLAYER, &state, "ip_localhost").unwrap();
        assert!(auth.verify(&localhost, PLAYER, &state, 600_000));

        let own_ip = auth.issue_now(PLAYER, &state, "ip_203.0.113.7").unwrap();
        assert!(!auth.verify(&own_ip, PLAYER, &state, 600_000));
        assert!(auth.verify_for_channel(
            &own_ip,
            PLAYER,
            &state,
            600_000,
            Some("203.0.113.7")
        ));

        let unknown_salt = auth.issue_now(PLAYER, &state, "other").unwrap();
        assert!(!auth.verify(&unknown_salt, PLAYER, &state, 600_000));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = authenticator(clock);
        let state = json!({});
        assert!(!auth.verify("not-hex", PLAYER, &state, 600_000));
        assert!(!auth.verify("", PLAYER, &state, 600_000));
        assert!(!auth.verify(&"a".repeat(64), PLAYER, &state, 600_000));
    }

    #[test]
    fn missing_secret_fails_closed() {
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = TokenAuthenticator::new(
            Some(SecretString::from("  ")),
            TokenConfig::default(),
            clock,
        );
        assert!(!auth.is_configured());
        assert_eq!(
            auth.issue_now(PLAYER, &json!({}), ""),
            Err(TokenError::MissingSecret)
        );
        assert!(!auth.verify(&"0".repeat(64), PLAYER, &json!({}), 600_000));
    }

    #[test]
    fn candidate_buckets_alternate_nearest_first() {
        let buckets = candidate_buckets(95_000, 30_000, 60_000);
        assert_eq!(buckets, vec![90_000, 60_000, 120_000, 30_000, 150_000]);
        assert_eq!(candidate_buckets(95_000, 30_000, 0), vec![90_000]);
    }
}
