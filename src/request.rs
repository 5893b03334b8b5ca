//! Request planning: data URL construction and browser-context headers.

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT,
};
use url::Url;

use crate::config::ClientConfig;
use crate::params::SearchParams;
use crate::{FetchError, Result};

/// Marker header the origin's client router sends on data requests.
const DATA_REQUEST_HEADER: &str = "x-nextjs-data";

/// Builds URLs and headers for the origin.
///
/// URL construction is a pure function of the parameters and the build
/// identifier passed in; the planner itself holds no mutable state.
#[derive(Debug, Clone)]
pub struct RequestPlanner {
    base: Url,
    landing_url: String,
    data_path: String,
    data_headers: HeaderMap,
    landing_headers: HeaderMap,
}

impl RequestPlanner {
    /// Creates a planner from the client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)?;
        let landing_url = base.join(&config.landing_path)?.to_string();

        let user_agent = header_value(&config.user_agent)?;
        let language = header_value(&config.accept_language)?;

        let mut landing_headers = HeaderMap::new();
        landing_headers.insert(USER_AGENT, user_agent.clone());
        landing_headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        landing_headers.insert(ACCEPT_LANGUAGE, language.clone());

        let mut data_headers = HeaderMap::new();
        data_headers.insert(USER_AGENT, user_agent);
        data_headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        data_headers.insert(ACCEPT_LANGUAGE, language);
        data_headers.insert(REFERER, header_value(&landing_url)?);
        data_headers.insert(
            HeaderName::from_static(DATA_REQUEST_HEADER),
            HeaderValue::from_static("1"),
        );

        Ok(Self {
            base,
            landing_url,
            data_path: config.data_path.clone(),
            data_headers,
            landing_headers,
        })
    }

    /// Builds the data-endpoint URL for `params` under `build_id`.
    pub fn data_url(&self, params: &SearchParams, build_id: &str) -> Result<String> {
        let path = self.data_path.replace("{build_id}", build_id);
        let mut url = self.base.join(&path)?;
        url.query_pairs_mut()
            .extend_pairs(params.query_pairs().iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url.to_string())
    }

    /// Returns the human-facing listings page URL.
    pub fn landing_url(&self) -> &str {
        &self.landing_url
    }

    /// Headers for data-endpoint requests.
    pub fn data_headers(&self) -> &HeaderMap {
        &self.data_headers
    }

    /// Headers for the landing page.
    pub fn landing_headers(&self) -> &HeaderMap {
        &self.landing_headers
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| FetchError::Config(format!("Invalid header value '{}': {}", value, e)))
}
