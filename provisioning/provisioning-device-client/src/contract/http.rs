// Copyright (c) Microsoft. All rights reserved.

use super::request::{Connector, HttpRequest, HttpResponse};
use super::{ContractState, RequestData, ResponseCallback, ResponseData};
use crate::schema::{request::DeviceRegistration, response::ServiceError, TpmAttestation};
use crate::{Error, ProvisioningDeviceClientConfig, TlsContext};

const USER_AGENT: &str = concat!(
    "provisioning-device-client/",
    env!("CARGO_PKG_VERSION")
);

/// Provisioning contract over HTTPS.
#[derive(Clone, Debug)]
pub struct ContractApiHttp {
    endpoint: url::Url,
    id_scope: String,
    api_version: String,
    timeout: std::time::Duration,
}

impl ContractApiHttp {
    pub fn new(config: &ProvisioningDeviceClientConfig) -> Self {
        ContractApiHttp {
            endpoint: config.global_endpoint.clone(),
            id_scope: config.id_scope.clone(),
            api_version: config.api_version.clone(),
            timeout: config.http_timeout(),
        }
    }

    fn register_uri(&self, registration_id: &str) -> Result<url::Url, Error> {
        self.uri(&[self.id_scope.as_str(), "registrations", registration_id, "register"])
    }

    fn status_uri(&self, registration_id: &str, operation_id: &str) -> Result<url::Url, Error> {
        self.uri(&[
            self.id_scope.as_str(),
            "registrations",
            registration_id,
            "operations",
            operation_id,
        ])
    }

    /// Replaces the endpoint's path. Each segment is percent-encoded, so an id containing `/`
    /// stays a single segment.
    fn uri(&self, segments: &[&str]) -> Result<url::Url, Error> {
        let mut uri = self.endpoint.clone();

        uri.path_segments_mut()
            .map_err(|()| Error::client("global endpoint cannot have a path"))?
            .clear()
            .extend(segments);
        uri.set_query(Some(&format!("api-version={}", self.api_version)));

        Ok(uri)
    }

    fn register_request(&self, request_data: &RequestData) -> Result<HttpRequest, Error> {
        let tpm = match (
            request_data.endorsement_key(),
            request_data.storage_root_key(),
        ) {
            (Some(endorsement_key), Some(storage_root_key)) => {
                Some(TpmAttestation::new(endorsement_key, storage_root_key))
            }
            _ => None,
        };

        let body = DeviceRegistration {
            registration_id: request_data.registration_id().to_string(),
            tpm,
            payload: request_data.payload().cloned(),
        };

        let connector = connector(request_data.tls_context())?;
        let uri = self.register_uri(request_data.registration_id())?;

        let mut request =
            HttpRequest::put(connector, uri.as_str(), &body)?.with_timeout(self.timeout);
        add_common_headers(&mut request, request_data)?;

        Ok(request)
    }
}

#[async_trait::async_trait]
impl super::ProvisioningDeviceClientContract for ContractApiHttp {
    async fn request_nonce_for_tpm(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error> {
        if request_data.endorsement_key().is_none() || request_data.storage_root_key().is_none() {
            return Err(Error::security("Ek or SRK cannot be null"));
        }

        let request = self.register_request(&request_data)?;

        log::info!("Requesting DPS authentication key for TPM.");
        let response = request.json_response().await?;

        // DPS should respond with 401 Unauthorized and present the encrypted nonce.
        if response.status != hyper::StatusCode::UNAUTHORIZED {
            return Err(hub_error(&response));
        }

        callback.run(received(response));

        Ok(())
    }

    async fn authenticate_with_provisioning_service(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error> {
        let request = self.register_request(&request_data)?;

        log::info!("Sending DPS registration request.");
        let response = request.json_response().await?;

        if !matches!(
            response.status,
            hyper::StatusCode::OK | hyper::StatusCode::ACCEPTED
        ) {
            return Err(hub_error(&response));
        }

        callback.run(received(response));

        Ok(())
    }

    async fn get_registration_status(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error> {
        let operation_id = request_data
            .operation_id()
            .ok_or_else(|| Error::client("operation id cannot be empty"))?;

        let connector = connector(request_data.tls_context())?;
        let uri = self.status_uri(request_data.registration_id(), operation_id)?;

        let mut request = HttpRequest::get(connector, uri.as_str()).with_timeout(self.timeout);
        add_common_headers(&mut request, &request_data)?;

        log::info!("Checking DPS registration status.");
        let response = request.json_response().await?;

        if !matches!(
            response.status,
            hyper::StatusCode::OK | hyper::StatusCode::ACCEPTED
        ) {
            return Err(hub_error(&response));
        }

        callback.run(received(response));

        Ok(())
    }
}

fn connector(tls_context: Option<&TlsContext>) -> Result<Connector, Error> {
    let ssl = match tls_context {
        Some(tls_context) => tls_context.connector_builder(),
        None => TlsContext::default().connector_builder(),
    }
    .map_err(Error::security)?;

    let mut http = hyper::client::HttpConnector::new();
    http.enforce_http(false);

    let connector =
        hyper_openssl::HttpsConnector::with_connector(http, ssl).map_err(Error::security)?;

    Ok(connector)
}

fn add_common_headers(
    request: &mut HttpRequest,
    request_data: &RequestData,
) -> Result<(), Error> {
    request
        .add_header(hyper::header::USER_AGENT, USER_AGENT)
        .map_err(|err| Error::invalid_parameter("user_agent", err))?;

    if let Some(sas_token) = request_data.sas_token() {
        request
            .add_header(hyper::header::AUTHORIZATION, sas_token)
            .map_err(|err| Error::invalid_parameter("sas_token", err))?;
    }

    Ok(())
}

fn received(response: HttpResponse) -> ResponseData {
    let body = if response.body.is_empty() {
        None
    } else {
        Some(response.body.to_vec())
    };

    ResponseData::new(
        body,
        ContractState::RegistrationReceived,
        response.retry_after,
    )
}

fn hub_error(response: &HttpResponse) -> Error {
    match ServiceError::from_json(&response.body) {
        Ok(err) => Error::Hub(err.to_string()),
        Err(_) => Error::Hub(format!("unexpected HTTP status {}", response.status)),
    }
}
