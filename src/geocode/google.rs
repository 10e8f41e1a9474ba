use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::data::models::{non_blank, Coordinate, Pincode};
use crate::geocode::{Geocoder, ResolutionFailure, ResolvedLocation};

pub const GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

const CITY_COMPONENT: &str = "locality";
const STATE_COMPONENT: &str = "administrative_area_level_1";

#[derive(Debug, Deserialize)]
pub struct GeocodeResponse {
    pub status: String,
    #[serde(default)]
    pub results: Vec<GeocodeCandidate>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeCandidate {
    pub geometry: Geometry,
    #[serde(default)]
    pub address_components: Vec<AddressComponent>,
    #[serde(default)]
    pub formatted_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Geometry {
    pub location: LatLng,
}

#[derive(Debug, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct AddressComponent {
    pub long_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

/// Google Geocoding API adapter.
pub struct GoogleGeocoder {
    client: Client,
    endpoint: String,
    api_key: String,
    country: String,
    region: String,
}

impl GoogleGeocoder {
    pub fn new(
        api_key: &str,
        country: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(GoogleGeocoder {
            client,
            endpoint: GEOCODE_ENDPOINT.to_owned(),
            api_key: api_key.to_owned(),
            country: country.to_owned(),
            region: region.to_owned(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_owned();
        self
    }

    fn query_for(&self, pincode: Pincode) -> String {
        format!("Pincode {}, {}", pincode, self.country)
    }
}

impl Geocoder for GoogleGeocoder {
    fn resolve(&self, pincode: Pincode) -> Result<ResolvedLocation, ResolutionFailure> {
        let query = self.query_for(pincode);
        debug!("Geocoding {:?}", query);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("address", query.as_str()),
                ("region", self.region.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ResolutionFailure::TransientError(format!("HTTP {}", status)));
        }
        if status.is_client_error() {
            return Err(ResolutionFailure::PermanentError(format!("HTTP {}", status)));
        }

        let body: GeocodeResponse = response.json().map_err(|err| {
            ResolutionFailure::PermanentError(format!("undecodable response: {}", err))
        })?;
        interpret_response(body)
    }
}

fn classify_transport_error(err: reqwest::Error) -> ResolutionFailure {
    if err.is_builder() {
        ResolutionFailure::PermanentError(err.to_string())
    } else {
        ResolutionFailure::TransientError(err.to_string())
    }
}

/// Maps a provider answer onto the first candidate or a classified failure.
pub fn interpret_response(response: GeocodeResponse) -> Result<ResolvedLocation, ResolutionFailure> {
    let detail = || {
        response
            .error_message
            .clone()
            .unwrap_or_else(|| response.status.clone())
    };

    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(ResolutionFailure::NoResult),
        "OVER_QUERY_LIMIT" | "UNKNOWN_ERROR" => {
            return Err(ResolutionFailure::TransientError(detail()))
        }
        _ => return Err(ResolutionFailure::PermanentError(detail())),
    }

    let candidate = response
        .results
        .into_iter()
        .next()
        .ok_or(ResolutionFailure::NoResult)?;
    Ok(candidate.into_resolved())
}

impl GeocodeCandidate {
    fn component(&self, kind: &str) -> Option<String> {
        self.address_components
            .iter()
            .find(|c| c.types.iter().any(|t| t == kind))
            .and_then(|c| non_blank(Some(c.long_name.as_str())))
    }

    fn into_resolved(self) -> ResolvedLocation {
        ResolvedLocation {
            coordinate: Coordinate::new(self.geometry.location.lat, self.geometry.location.lng),
            city: self.component(CITY_COMPONENT),
            state: self.component(STATE_COMPONENT),
            formatted_address: non_blank(self.formatted_address.as_deref()),
        }
    }
}
