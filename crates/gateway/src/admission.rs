//! Connection admission: the origin gate in front of `/ws` and the spoke
//! identity carried in upgrade headers.

use {
    axum::http::{HeaderMap, header},
    chrono::Utc,
    spokehub_config::{AdmissionConfig, AdmissionMode},
    spokehub_protocol::{DEFAULT_CAPABILITY, DEFAULT_TENANT, DEFAULT_TRUST_SCORE, headers},
    spokehub_routing::NewSpoke,
    tracing::{info, warn},
};

/// Decides which browser origins may open spoke connections.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    /// `None` admits every origin.
    allowed: Option<Vec<String>>,
}

impl OriginPolicy {
    pub fn permissive() -> Self {
        Self { allowed: None }
    }

    pub fn strict<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Some(origins.into_iter().map(Into::into).collect()),
        }
    }

    /// Strict mode without any configured origin degrades to permissive.
    pub fn from_config(config: &AdmissionConfig) -> Self {
        match config.mode {
            AdmissionMode::Strict if config.allowed_origins.is_empty() => {
                warn!("admission: strict mode without allowed origins, accepting all origins");
                Self::permissive()
            },
            AdmissionMode::Strict => {
                info!(
                    origins = config.allowed_origins.len(),
                    "admission: origin allowlist active"
                );
                Self::strict(config.allowed_origins.iter().cloned())
            },
            AdmissionMode::Permissive => Self::permissive(),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.allowed.is_some()
    }

    /// A request without an `Origin` header only passes in permissive mode.
    pub fn admits(&self, origin: Option<&str>) -> bool {
        match (&self.allowed, origin) {
            (None, _) => true,
            (Some(list), Some(origin)) => list.iter().any(|o| o == origin),
            (Some(_), None) => false,
        }
    }
}

/// Origin of an upgrade request, if present and valid UTF-8.
pub fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}

/// Build the registration parameters for a spoke connecting over `/ws`.
///
/// Missing headers fall back to the default tenant, a timestamped agent id,
/// the `data` capability and neutral trust.
pub fn spoke_from_headers(headers: &HeaderMap) -> NewSpoke {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let tenant = text(headers::TENANT_ID).unwrap_or(DEFAULT_TENANT).to_string();
    let agent = text(headers::AGENT_ID)
        .map(String::from)
        .unwrap_or_else(|| format!("ws-{}", Utc::now().format("%Y%m%d%H%M%S")));

    let capabilities: Vec<String> = text(headers::CAPABILITIES)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect()
        })
        .filter(|caps: &Vec<String>| !caps.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_CAPABILITY.to_string()]);

    let trust = text(headers::TRUST_SCORE)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|t| (0.0..=1.0).contains(t))
        .unwrap_or(DEFAULT_TRUST_SCORE);

    NewSpoke::new(tenant, agent)
        .with_capabilities(capabilities)
        .with_trust(trust)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, axum::http::HeaderValue, rstest::rstest};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[rstest]
    #[case::listed(Some("https://app.example"), true)]
    #[case::unlisted(Some("https://evil.example"), false)]
    #[case::missing(None, false)]
    fn strict_policy(#[case] origin: Option<&str>, #[case] admitted: bool) {
        let policy = OriginPolicy::strict(["https://app.example"]);
        assert_eq!(policy.admits(origin), admitted);
    }

    #[rstest]
    #[case(Some("https://anything.example"))]
    #[case(None)]
    fn permissive_policy_admits_all(#[case] origin: Option<&str>) {
        assert!(OriginPolicy::permissive().admits(origin));
    }

    #[test]
    fn strict_without_origins_degrades() {
        let policy = OriginPolicy::from_config(&AdmissionConfig {
            mode: AdmissionMode::Strict,
            allowed_origins: Vec::new(),
        });
        assert!(!policy.is_strict());

        let policy = OriginPolicy::from_config(&AdmissionConfig {
            mode: AdmissionMode::Strict,
            allowed_origins: vec!["https://a.example".into()],
        });
        assert!(policy.is_strict());
        assert!(!policy.admits(Some("https://b.example")));
    }

    #[test]
    fn defaults_when_headers_missing() {
        let spoke = spoke_from_headers(&HeaderMap::new());
        assert_eq!(spoke.tenant_id, "default");
        assert!(spoke.agent_id.starts_with("ws-"));
        assert_eq!(spoke.agent_id.len(), "ws-".len() + 14);
        assert_eq!(spoke.capabilities, vec!["data"]);
        assert_eq!(spoke.trust_score, 0.5);
    }

    #[test]
    fn identity_from_headers() {
        let spoke = spoke_from_headers(&headers(&[
            (headers::TENANT_ID, "acme"),
            (headers::AGENT_ID, "planner"),
            (headers::CAPABILITIES, "compute, ,search"),
            (headers::TRUST_SCORE, "0.9"),
        ]));
        assert_eq!(spoke.tenant_id, "acme");
        assert_eq!(spoke.agent_id, "planner");
        assert_eq!(spoke.capabilities, vec!["compute", "search"]);
        assert_eq!(spoke.trust_score, 0.9);
    }

    #[rstest]
    #[case("not-a-number")]
    #[case("1.5")]
    #[case("-0.1")]
    fn bad_trust_falls_back(#[case] raw: &str) {
        let spoke = spoke_from_headers(&headers(&[(headers::TRUST_SCORE, raw)]));
        assert_eq!(spoke.trust_score, 0.5);
    }
}
