// Copyright (c) Microsoft. All rights reserved.

//! The transport seam between the registration tasks and a wire protocol.

mod http;
pub use self::http::ContractApiHttp;

mod request;

use std::time::Duration;

use crate::{Error, TlsContext};

/// Everything a single exchange with the service needs.
#[derive(Clone, Debug)]
pub struct RequestData {
    registration_id: String,
    endorsement_key: Option<Vec<u8>>,
    storage_root_key: Option<Vec<u8>>,
    operation_id: Option<String>,
    tls_context: Option<TlsContext>,
    sas_token: Option<String>,
    payload: Option<serde_json::Value>,
}

impl RequestData {
    /// Data for a register or nonce request.
    pub fn registration(registration_id: impl Into<String>) -> Self {
        RequestData {
            registration_id: registration_id.into(),
            endorsement_key: None,
            storage_root_key: None,
            operation_id: None,
            tls_context: None,
            sas_token: None,
            payload: None,
        }
    }

    /// Data for an operation status request.
    pub fn status(registration_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        RequestData {
            operation_id: Some(operation_id.into()),
            ..RequestData::registration(registration_id)
        }
    }

    #[must_use]
    pub fn with_tpm_keys(mut self, endorsement_key: Vec<u8>, storage_root_key: Vec<u8>) -> Self {
        self.endorsement_key = Some(endorsement_key);
        self.storage_root_key = Some(storage_root_key);

        self
    }

    #[must_use]
    pub fn with_tls_context(mut self, tls_context: Option<TlsContext>) -> Self {
        self.tls_context = tls_context;

        self
    }

    #[must_use]
    pub fn with_sas_token(mut self, sas_token: Option<String>) -> Self {
        self.sas_token = sas_token;

        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.payload = payload;

        self
    }

    pub fn set_sas_token(&mut self, sas_token: String) {
        self.sas_token = Some(sas_token);
    }

    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    pub fn endorsement_key(&self) -> Option<&[u8]> {
        self.endorsement_key.as_deref()
    }

    pub fn storage_root_key(&self) -> Option<&[u8]> {
        self.storage_root_key.as_deref()
    }

    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    pub fn tls_context(&self) -> Option<&TlsContext> {
        self.tls_context.as_ref()
    }

    pub fn sas_token(&self) -> Option<&str> {
        self.sas_token.as_deref()
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContractState {
    RegistrationReceived,
    Pending,
    Error,
}

/// What the contract hands back for one exchange.
#[derive(Clone, Debug)]
pub struct ResponseData {
    response_data: Option<Vec<u8>>,
    contract_state: ContractState,
    wait_for_status: Option<Duration>,
}

impl ResponseData {
    pub fn new(
        response_data: Option<Vec<u8>>,
        contract_state: ContractState,
        wait_for_status: Option<Duration>,
    ) -> Self {
        ResponseData {
            response_data,
            contract_state,
            wait_for_status,
        }
    }

    /// A complete response body.
    pub fn received(response_data: Vec<u8>) -> Self {
        ResponseData::new(Some(response_data), ContractState::RegistrationReceived, None)
    }

    pub fn response_data(&self) -> Option<&[u8]> {
        self.response_data.as_deref()
    }

    pub fn contract_state(&self) -> ContractState {
        self.contract_state
    }

    /// How long the service asked the device to wait before polling again.
    pub fn wait_for_status(&self) -> Option<Duration> {
        self.wait_for_status
    }

    /// The body, if the exchange completed and returned one.
    pub(crate) fn into_received(self) -> Option<(Vec<u8>, Option<Duration>)> {
        match (self.contract_state, self.response_data) {
            (ContractState::RegistrationReceived, Some(response_data)) => {
                Some((response_data, self.wait_for_status))
            }
            _ => None,
        }
    }
}

/// Resolves one exchange. Consumed on use, so a response is delivered at most once.
#[derive(Debug)]
pub struct ResponseCallback(tokio::sync::oneshot::Sender<ResponseData>);

impl ResponseCallback {
    /// A callback for driving a contract directly, and the receiver it resolves.
    pub fn channel() -> (Self, tokio::sync::oneshot::Receiver<ResponseData>) {
        let (sender, receiver) = tokio::sync::oneshot::channel();

        (ResponseCallback(sender), receiver)
    }

    pub fn run(self, response_data: ResponseData) {
        // The receiver is gone if the task already gave up waiting.
        if self.0.send(response_data).is_err() {
            log::debug!("Dropping provisioning response that nobody is waiting for.");
        }
    }
}

#[derive(Debug)]
pub(crate) struct PendingResponse(tokio::sync::oneshot::Receiver<ResponseData>);

impl PendingResponse {
    /// Waits for the contract to run the callback. `None` if it did not do so in time, or
    /// dropped the callback without running it.
    pub(crate) async fn wait(self, timeout: Duration) -> Option<ResponseData> {
        match tokio::time::timeout(timeout, self.0).await {
            Ok(Ok(response_data)) => Some(response_data),
            Ok(Err(_)) => {
                log::warn!("Provisioning transport dropped the response callback.");
                None
            }
            Err(_) => {
                log::warn!("Timed out after {:?} waiting for provisioning response.", timeout);
                None
            }
        }
    }
}

pub(crate) fn response_channel() -> (ResponseCallback, PendingResponse) {
    let (callback, receiver) = ResponseCallback::channel();

    (callback, PendingResponse(receiver))
}

/// A wire protocol for talking to the provisioning service.
///
/// Each exchange method may run the callback before returning, from a task it spawns, or not at
/// all. Errors returned directly mean the request could not be made.
#[async_trait::async_trait]
pub trait ProvisioningDeviceClientContract: Send + Sync {
    async fn open(&self, _request_data: &RequestData) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn request_nonce_for_tpm(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error>;

    async fn authenticate_with_provisioning_service(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error>;

    async fn get_registration_status(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error>;
}
