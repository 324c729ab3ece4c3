use regex::Regex;
use reqwest::header::{HeaderMap, SERVER};
use std::sync::OnceLock;

// 机场三字码, e.g. cf-ray: 7bd32409eda7b020-SJC
static COLO_RE: OnceLock<Regex> = OnceLock::new();

/// A CDN header convention that carries the serving colo code.
pub trait ColoStrategy: Sync + Send {
    fn matches(&self, headers: &HeaderMap) -> bool;

    /// Header holding the colo code for this CDN.
    fn header(&self) -> &'static str;
}

pub struct Cloudflare;

impl ColoStrategy for Cloudflare {
    fn matches(&self, headers: &HeaderMap) -> bool {
        headers
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|server| server.eq_ignore_ascii_case("cloudflare"))
    }

    fn header(&self) -> &'static str {
        "cf-ray"
    }
}

pub struct CloudFront;

impl ColoStrategy for CloudFront {
    fn matches(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(self.header())
    }

    fn header(&self) -> &'static str {
        "x-amz-cf-pop" // e.g. SFO53-P1
    }
}

/// Tried in order; the first matching strategy decides which header is read.
pub const STRATEGIES: &[&dyn ColoStrategy] = &[&Cloudflare, &CloudFront];

/// Extracts the 3-letter colo code from response headers, or "" when no
/// known convention applies.
pub fn extract_colo(headers: &HeaderMap) -> String {
    let Some(strategy) = STRATEGIES.iter().find(|s| s.matches(headers)) else {
        return String::new();
    };

    let value = headers
        .get(strategy.header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let re = COLO_RE.get_or_init(|| Regex::new(r"[A-Z]{3}").expect("static regex"));
    re.find(value)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_cloudflare_ray() {
        let h = headers(&[("server", "cloudflare"), ("cf-ray", "7bd32409eda7b020-SJC")]);
        assert_eq!(extract_colo(&h), "SJC");
    }

    #[test]
    fn test_cloudfront_pop() {
        let h = headers(&[("server", "AmazonS3"), ("x-amz-cf-pop", "NRT57-P3")]);
        assert_eq!(extract_colo(&h), "NRT");
    }

    #[test]
    fn test_cloudflare_wins_over_cloudfront() {
        let h = headers(&[
            ("server", "cloudflare"),
            ("cf-ray", "8a00aa11bb22cc33-HKG"),
            ("x-amz-cf-pop", "LAX3-C1"),
        ]);
        assert_eq!(extract_colo(&h), "HKG");
    }

    #[test]
    fn test_unknown_convention_is_empty() {
        assert_eq!(extract_colo(&headers(&[("server", "nginx")])), "");
        assert_eq!(extract_colo(&headers(&[("server", "cloudflare")])), "");
        assert_eq!(
            extract_colo(&headers(&[("server", "cloudflare"), ("cf-ray", "0123abcd-")])),
            ""
        );
    }
}
