//! Server-side origin check for the routes the game frontend calls.
//!
//! CORS only binds browsers. With an allowed origin configured, state-changing
//! requests must also carry a matching `Origin` header, or a `Referer` on that
//! origin when `Origin` is absent.

use anyhow::{Context, Result, bail};
use axum::http::{HeaderMap, HeaderValue, header};
use tracing::warn;
use url::Url;

/// `scheme://host[:port]` of a frontend URL.
pub(crate) fn origin_of(url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid frontend URL: {url}"))?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        bail!("Frontend URL must include a valid host: {url}");
    }
    HeaderValue::from_str(&origin.ascii_serialization())
        .context("Failed to build frontend origin header")
}

#[derive(Clone, Debug, Default)]
pub struct OriginGuard {
    allowed: Option<HeaderValue>,
}

impl OriginGuard {
    /// Without an origin every caller is accepted.
    ///
    /// # Errors
    /// Returns an error if `allowed_origin` is not a URL with a host.
    pub fn new(allowed_origin: Option<&str>) -> Result<Self> {
        Ok(Self {
            allowed: allowed_origin.map(origin_of).transpose()?,
        })
    }

    #[must_use]
    pub fn allowed(&self) -> Option<&HeaderValue> {
        self.allowed.as_ref()
    }

    #[must_use]
    pub fn permits(&self, headers: &HeaderMap) -> bool {
        let Some(allowed) = &self.allowed else {
            return true;
        };

        if let Some(origin) = headers.get(header::ORIGIN) {
            let permitted = origin == allowed;
            if !permitted {
                warn!(origin = ?origin, "request from a foreign origin");
            }
            return permitted;
        }

        let referer_origin = headers
            .get(header::REFERER)
            .and_then(|value| value.to_str().ok())
            .and_then(|referer| origin_of(referer).ok());
        match referer_origin {
            Some(origin) if origin == allowed => true,
            Some(origin) => {
                warn!(referer_origin = ?origin, "request referred by a foreign origin");
                false
            }
            None => {
                warn!("request without origin or referer");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(name.clone(), HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn origin_drops_path() {
        let origin = origin_of("https://play.example.com:8443/game/index.html").unwrap();
        assert_eq!(origin, "https://play.example.com:8443");

        let origin = origin_of("https://play.example.com/").unwrap();
        assert_eq!(origin, "https://play.example.com");
    }

    #[test]
    fn origin_requires_host() {
        assert!(origin_of("not a url").is_err());
        assert!(origin_of("data:text/plain,hello").is_err());
        assert!(OriginGuard::new(Some("::bad::")).is_err());
    }

    #[test]
    fn unconfigured_guard_permits_everything() {
        let guard = OriginGuard::new(None).unwrap();
        assert!(guard.permits(&HeaderMap::new()));
        assert!(guard.permits(&headers(&[(header::ORIGIN, "https://evil.example")])));
    }

    #[test]
    fn origin_header_must_match() {
        let guard = OriginGuard::new(Some("https://play.example.com/game")).unwrap();
        assert!(guard.permits(&headers(&[(header::ORIGIN, "https://play.example.com")])));
        assert!(!guard.permits(&headers(&[(header::ORIGIN, "https://evil.example")])));
        assert!(!guard.permits(&headers(&[(
            header::ORIGIN,
            "https://play.example.com.evil.example"
        )])));
        // a foreign Origin is not rescued by a matching Referer
        assert!(!guard.permits(&headers(&[
            (header::ORIGIN, "https://evil.example"),
            (header::REFERER, "https://play.example.com/game"),
        ])));
    }

    #[test]
    fn referer_is_the_fallback() {
        let guard = OriginGuard::new(Some("https://play.example.com")).unwrap();
        assert!(guard.permits(&headers(&[(
            header::REFERER,
            "https://play.example.com/game?level=2"
        )])));
        assert!(!guard.permits(&headers(&[(header::REFERER, "https://evil.example/")])));
        assert!(!guard.permits(&headers(&[(header::REFERER, "garbage")])));
        assert!(!guard.permits(&HeaderMap::new()));
    }
}
