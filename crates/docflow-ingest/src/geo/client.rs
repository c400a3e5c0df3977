//! HTTP client for the external geocoding service

use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

use super::response::parse_geocode_response;
use super::{Coordinates, Geocoder};
use crate::config::GeoConfig;
use crate::error::{GeoErrorKind, GeoResolutionFailure, IngestError};

/// Statuses meaning "the request was fine, there is just nothing to return"
const EMPTY_RESULT_STATUSES: &[&str] = &["OK", "ZERO_RESULTS"];

/// Geocoding client
///
/// Built once per pipeline and shared; `reqwest::Client` pools connections
/// internally and no per-call state is kept here.
#[derive(Debug, Clone)]
pub struct GeoEnrichmentClient {
    client: Client,
    endpoint: Url,
}

impl GeoEnrichmentClient {
    /// Create a client for `endpoint`; the address is appended as `address=`
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, IngestError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| IngestError::Config(format!("invalid geocoding endpoint '{endpoint}': {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(IngestError::Client)?;

        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &GeoConfig) -> Result<Self, IngestError> {
        Self::new(&config.endpoint, config.timeout())
    }

    /// Full request URL for an address, percent-encoded
    pub fn request_url(&self, address: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("address", address);
        url
    }
}

#[async_trait]
impl Geocoder for GeoEnrichmentClient {
    async fn resolve(
        &self,
        identifier: &str,
        address: &str,
    ) -> Result<Option<Coordinates>, GeoResolutionFailure> {
        let url = self.request_url(address);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GeoResolutionFailure::new(identifier, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoResolutionFailure::new(
                identifier,
                GeoErrorKind::HttpStatus(status),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GeoResolutionFailure::new(identifier, e))?;

        let parsed =
            parse_geocode_response(&body).map_err(|kind| GeoResolutionFailure::new(identifier, kind))?;

        if let Some(service_status) = parsed.status.as_deref() {
            if !EMPTY_RESULT_STATUSES.contains(&service_status) {
                return Err(GeoResolutionFailure::new(
                    identifier,
                    GeoErrorKind::ServiceStatus(service_status.to_string()),
                ));
            }
        }

        debug!(
            record_id = %identifier,
            address = %address,
            coordinates = ?parsed.coordinates.as_ref().map(ToString::to_string),
            "Address geocoded"
        );

        Ok(parsed.coordinates)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    const LOCATION_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GeocodeResponse>
 <status>OK</status>
 <result><geometry><location><lat>42.37</lat><lng>12.27</lng></location></geometry></result>
</GeocodeResponse>"#;

    async fn client_for(server: &MockServer) -> GeoEnrichmentClient {
        let endpoint = format!("{}/maps/api/geocode/xml?sensor=false", server.uri());
        GeoEnrichmentClient::new(&endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_request_url_encodes_address() {
        let client = GeoEnrichmentClient::new(
            "http://maps.example.com/geocode/xml?sensor=false",
            Duration::from_secs(1),
        )
        .unwrap();

        let url = client.request_url("Via Roma 1, Viterbo & Co");
        assert_eq!(
            url.as_str(),
            "http://maps.example.com/geocode/xml?sensor=false&address=Via+Roma+1%2C+Viterbo+%26+Co"
        );
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        assert!(GeoEnrichmentClient::new("no scheme here", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_resolves_first_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/geocode/xml"))
            .and(query_param("address", "Viterbo, Italy"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOCATION_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let coordinates = client.resolve("00000001", "Viterbo, Italy").await.unwrap();

        assert_eq!(coordinates.unwrap().to_string(), "42.37,12.27");
    }

    #[tokio::test]
    async fn test_zero_results_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<GeocodeResponse><status>ZERO_RESULTS</status></GeocodeResponse>",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.resolve("2", "Nowhere").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_http_error_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.resolve("3", "Viterbo").await.unwrap_err();

        assert_eq!(err.identifier, "3");
        assert!(matches!(
            err.kind,
            GeoErrorKind::HttpStatus(status) if status.as_u16() == 503
        ));
    }

    #[tokio::test]
    async fn test_over_query_limit_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<GeocodeResponse><status>OVER_QUERY_LIMIT</status></GeocodeResponse>",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.resolve("4", "Viterbo").await.unwrap_err();

        assert!(matches!(err.kind, GeoErrorKind::ServiceStatus(ref s) if s == "OVER_QUERY_LIMIT"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<location><lat>1</lng>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.resolve("5", "Viterbo").await.unwrap_err();

        assert!(matches!(err.kind, GeoErrorKind::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_failure() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        drop(server);

        let err = client.resolve("6", "Viterbo").await.unwrap_err();
        assert!(matches!(err.kind, GeoErrorKind::Transport(_)));
    }
}
