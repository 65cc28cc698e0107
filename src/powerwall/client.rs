//! Powerwall gateway client
//!
//! Blocking client for the gateway's local JSON API. Construct and use it
//! only on blocking worker threads.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use tracing::{info, trace};

use super::source::ReadingSource;
use super::types::*;
use crate::config::PowerwallConfig;
use crate::errors::SourceError;

const AGGREGATES: &str = "/api/meters/aggregates";
const STATE_OF_ENERGY: &str = "/api/system_status/soe";

/// Powerwall gateway client
pub struct PowerwallClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl PowerwallClient {
    /// Create a new gateway client
    pub fn new(config: &PowerwallConfig) -> Result<Self, SourceError> {
        Self::with_options(
            config.host.clone(),
            config.auth_token.clone(),
            config.request_timeout,
            config.accept_invalid_certs,
        )
    }

    pub fn with_options(
        host: String,
        auth_token: Option<String>,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, SourceError> {
        let base_url = host.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| SourceError::Transport {
                endpoint: base_url.clone(),
                reason: e.to_string(),
            })?;
        info!("Powerwall client ready for {}", base_url);

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &'static str) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, endpoint);
        trace!("GET {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| SourceError::Transport {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().map_err(|e| SourceError::Decode {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    fn aggregates(&self) -> Result<Aggregates, SourceError> {
        self.get(AGGREGATES)
    }
}

impl ReadingSource for PowerwallClient {
    fn power(&self) -> Result<RawPower, SourceError> {
        Ok(self.aggregates()?.power())
    }

    fn grid(&self) -> Result<f64, SourceError> {
        self.aggregates()?.grid()
    }

    fn state_of_charge(&self) -> Result<RawStateOfCharge, SourceError> {
        self.get(STATE_OF_ENERGY)
    }

    fn solar_verbose(&self) -> Result<Option<RawSolarVerbose>, SourceError> {
        Ok(self.aggregates()?.solar_verbose())
    }

    /// All three come from a single aggregates request.
    fn meters(&self, with_solar: bool) -> Result<RawMeters, SourceError> {
        let aggregates = self.aggregates()?;
        Ok(RawMeters {
            power: aggregates.power(),
            grid: aggregates.grid()?,
            solar: if with_solar {
                aggregates.solar_verbose()
            } else {
                None
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powerwall::source::fetch_payload;

    const AGGREGATES_BODY: &str = r#"
    {
        "site": {"instant_power": -1000.0, "last_communication_time": "2023-05-01T12:00:00Z"},
        "battery": {"instant_power": 2000.0, "last_communication_time": "2023-05-01T12:00:00Z"},
        "load": {"instant_power": 3500.0, "last_communication_time": "2023-05-01T12:00:00Z"},
        "solar": {"instant_power": 1500.0, "last_communication_time": "2023-05-01T12:00:00Z"}
    }
    "#;

    fn client(server: &mockito::Server, token: Option<&str>) -> PowerwallClient {
        PowerwallClient::with_options(
            server.url(),
            token.map(str::to_string),
            Duration::from_secs(5),
            false,
        )
        .unwrap()
    }

    fn soe_mock(server: &mut mockito::Server, hits: usize) -> mockito::Mock {
        server
            .mock("GET", STATE_OF_ENERGY)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"percentage": 75.5}"#)
            .expect(hits)
            .create()
    }

    #[test]
    fn test_power_and_grid_from_aggregates() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", AGGREGATES)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(AGGREGATES_BODY)
            .create();

        let client = client(&server, None);
        let power = client.power().unwrap();
        assert_eq!(power.solar, Some(1500.0));
        assert_eq!(power.battery, Some(2000.0));
        assert_eq!(power.load, Some(3500.0));
        assert_eq!(client.grid().unwrap(), -1000.0);

        let solar = client.solar_verbose().unwrap().unwrap();
        assert_eq!(
            solar.last_communication_time.as_deref(),
            Some("2023-05-01T12:00:00Z")
        );
    }

    #[test]
    fn test_one_aggregates_request_per_fetch() {
        let mut server = mockito::Server::new();
        let aggregates = server
            .mock("GET", AGGREGATES)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(AGGREGATES_BODY)
            .expect(1)
            .create();
        let soe = soe_mock(&mut server, 1);

        let payload = fetch_payload(&client(&server, None), true).unwrap();
        assert_eq!(payload.power.solar, Some(1500.0));
        assert_eq!(payload.grid, -1000.0);
        assert_eq!(payload.state_of_charge.percentage, Some(75.5));
        assert_eq!(
            payload.solar.unwrap().last_communication_time.as_deref(),
            Some("2023-05-01T12:00:00Z")
        );

        aggregates.assert();
        soe.assert();
    }

    #[test]
    fn test_fetch_without_solar_section_fails_after_one_request() {
        let mut server = mockito::Server::new();
        let aggregates = server
            .mock("GET", AGGREGATES)
            .with_status(200)
            .with_body(r#"{"site": {"instant_power": 10.0}}"#)
            .expect(1)
            .create();
        let soe = soe_mock(&mut server, 0);

        let err = fetch_payload(&client(&server, None), true).unwrap_err();
        assert!(matches!(err, SourceError::NoData("solar meter record")));

        aggregates.assert();
        soe.assert();
    }

    #[test]
    fn test_state_of_charge_with_bearer_token() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", STATE_OF_ENERGY)
            .match_header("Authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"percentage": 75.5}"#)
            .create();

        let soc = client(&server, Some("secret")).state_of_charge().unwrap();
        assert_eq!(soc.percentage, Some(75.5));
        mock.assert();
    }

    #[test]
    fn test_missing_solar_section_is_none() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", AGGREGATES)
            .with_status(200)
            .with_body(r#"{"site": {"instant_power": 10.0}}"#)
            .create();

        let client = client(&server, None);
        assert!(client.solar_verbose().unwrap().is_none());
        assert_eq!(client.power().unwrap(), RawPower::default());
    }

    #[test]
    fn test_missing_site_is_no_data() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", AGGREGATES)
            .with_status(200)
            .with_body("{}")
            .create();

        let err = client(&server, None).grid().unwrap_err();
        assert!(matches!(err, SourceError::NoData(_)));
    }

    #[test]
    fn test_http_error_status() {
        let mut server = mockito::Server::new();
        server.mock("GET", STATE_OF_ENERGY).with_status(502).create();

        let err = client(&server, None).state_of_charge().unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 502, .. }));
    }

    #[test]
    fn test_undecodable_body() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", STATE_OF_ENERGY)
            .with_status(200)
            .with_body("not json")
            .create();

        let err = client(&server, None).state_of_charge().unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }
}
