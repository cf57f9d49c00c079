use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt::{self, Debug};
use tracing::instrument;

use crate::error::TransportError;
use crate::model::Coordinate;

pub const DEFAULT_BASE_URL: &str = "http://api.openweathermap.org/data/2.5/weather";

/// Anything that can turn a coordinate into a raw weather payload.
#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    async fn fetch_raw(&self, coord: Coordinate) -> Result<String, TransportError>;
}

#[derive(Clone)]
pub struct WeatherClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl WeatherClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), api_key)
    }

    pub fn with_base_url(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            http: Client::new(),
        }
    }

    /// `<base>?lat=<lat>&lon=<lon>&appid=<key>`, coordinates as plain integers.
    pub fn request_url(&self, coord: Coordinate) -> String {
        format!(
            "{}?lat={}&lon={}&appid={}",
            self.base_url, coord.latitude, coord.longitude, self.api_key
        )
    }
}

impl Debug for WeatherClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeatherClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl WeatherSource for WeatherClient {
    #[instrument(skip(self), fields(base_url = %self.base_url), level = "debug")]
    async fn fetch_raw(&self, coord: Coordinate) -> Result<String, TransportError> {
        let url = Url::parse(&self.request_url(coord))
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        tracing::debug!(lat = coord.latitude, lon = coord.longitude, "requesting current weather");

        // The response owns the connection; it is released when dropped on any path below.
        let res = self.http.get(url).send().await?.error_for_status()?;
        let body = res.text().await?;

        tracing::debug!(bytes = body.len(), "weather response received");
        Ok(body)
    }
}
