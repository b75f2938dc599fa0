// Copyright (c) Microsoft. All rights reserved.

//! The registration state machine and the sub-tasks it runs.

pub(crate) mod authorization;
mod pool;
mod register;
mod status;

use std::sync::Arc;
use std::time::Duration;

use crate::schema::response::{RegistrationOperationStatus, ServiceError};
use crate::{
    Error, ProvisioningDeviceClientConfig, ProvisioningDeviceClientContract,
    ProvisioningDeviceClientStatus, ProvisioningStatus, RegistrationInfo, RequestData,
    SecurityProvider,
};

/// Receives every status transition of a registration attempt, with the error for `Error`.
pub type StatusCallback = Box<dyn FnMut(ProvisioningDeviceClientStatus, Option<&Error>) + Send>;

/// Receives the outcome of a registration attempt that reached a terminal service status.
pub type RegistrationCallback = Box<dyn FnOnce(RegistrationInfo, Option<Error>) + Send>;

/// A parsed service response and how long the service asked the device to wait before polling.
#[derive(Debug)]
pub(crate) struct OperationResponse {
    pub(crate) status: RegistrationOperationStatus,
    pub(crate) retry_after: Option<Duration>,
}

/// Drives one device registration from authentication to a terminal status.
pub struct ProvisioningTask {
    config: ProvisioningDeviceClientConfig,
    security: SecurityProvider,
    contract: Arc<dyn ProvisioningDeviceClientContract>,
    authorization: authorization::SharedAuthorization,
    pool: pool::WorkerPool,

    status_callback: Option<StatusCallback>,
    registration_callback: Option<RegistrationCallback>,

    status: ProvisioningDeviceClientStatus,
}

impl ProvisioningTask {
    /// Fires the status callback with `Unauthenticated` before returning.
    pub fn new(
        config: ProvisioningDeviceClientConfig,
        security: SecurityProvider,
        contract: Arc<dyn ProvisioningDeviceClientContract>,
        status_callback: Option<StatusCallback>,
    ) -> Result<Self, Error> {
        config.check()?;

        let pool = pool::WorkerPool::new(config.max_workers);

        let mut task = ProvisioningTask {
            config,
            security,
            contract,
            authorization: Arc::default(),
            pool,
            status_callback,
            registration_callback: None,
            status: ProvisioningDeviceClientStatus::Unauthenticated,
        };

        task.report_status(ProvisioningDeviceClientStatus::Unauthenticated, None);

        Ok(task)
    }

    pub fn set_registration_callback(&mut self, registration_callback: RegistrationCallback) {
        self.registration_callback = Some(registration_callback);
    }

    /// Status most recently reported to the status callback.
    pub fn status(&self) -> ProvisioningDeviceClientStatus {
        self.status
    }

    /// Runs the registration attempt to completion. Failures before a terminal service status
    /// are reported through the status callback only.
    pub async fn call(&mut self) -> ProvisioningDeviceClientStatus {
        if let Err(err) = self.run().await {
            log::error!("DPS registration failed: {}", err);

            self.report_status(ProvisioningDeviceClientStatus::Error, Some(&err));
        }

        if let Err(err) = self.contract.close().await {
            log::warn!("Failed to close provisioning transport: {}", err);
        }

        self.close();

        self.status
    }

    /// Shuts the worker pool down, aborting any running sub-task. Returns `false` if it was
    /// already shut down.
    pub fn close(&self) -> bool {
        self.pool.shutdown_now()
    }

    async fn run(&mut self) -> Result<(), Error> {
        let registration_id = self.security.registration_id().unwrap_or_default();
        let tls_context = self.security.tls_context()?;

        self.contract
            .open(&RequestData::registration(registration_id).with_tls_context(tls_context))
            .await?;

        let registration = self.invoke_register().await?;
        self.report_status(ProvisioningDeviceClientStatus::Authenticated, None);

        self.execute_state_machine_for_status(registration).await
    }

    // `&mut self` rather than `&self`: the callbacks are `Send` but not `Sync`.
    async fn invoke_register(&mut self) -> Result<OperationResponse, Error> {
        let task = register::RegisterTask {
            id_scope: self.config.id_scope.clone(),
            payload: self.config.custom_payload.clone(),
            response_timeout: self.config.response_timeout(),
            sas_token_ttl: self.config.sas_token_ttl()?,
            security: self.security.clone(),
            contract: self.contract.clone(),
            authorization: self.authorization.clone(),
        };

        let response = self
            .pool
            .execute(task.call(), self.config.registration_timeout())
            .await?;

        // Only the status matters here. Its registration state is read once the attempt ends.
        response.status.provisioning_status()?;

        Ok(response)
    }

    async fn invoke_status(
        &mut self,
        operation_id: &str,
        wait: Duration,
    ) -> Result<OperationResponse, Error> {
        tokio::time::sleep(wait).await;

        let task = status::StatusTask {
            registration_id: self.security.registration_id().unwrap_or_default(),
            operation_id: operation_id.to_string(),
            response_timeout: self.config.response_timeout(),
            contract: self.contract.clone(),
            authorization: self.authorization.clone(),
        };

        let response = self
            .pool
            .execute(task.call(), self.config.status_timeout())
            .await?;

        response.status.provisioning_status()?;

        Ok(response)
    }

    async fn execute_state_machine_for_status(
        &mut self,
        registration: OperationResponse,
    ) -> Result<(), Error> {
        let operation_id = registration.status.operation_id.clone();
        let mut next_status = registration.status.provisioning_status()?;
        let mut response = registration;

        loop {
            match next_status {
                ProvisioningStatus::Unassigned | ProvisioningStatus::Assigning => {
                    self.report_status(ProvisioningDeviceClientStatus::Assigning, None);
                    log::info!("DPS registration is still in progress.");

                    let wait = response
                        .retry_after
                        .unwrap_or_else(|| self.config.poll_interval());

                    response = self.invoke_status(&operation_id, wait).await?;
                    next_status = response.status.provisioning_status()?;
                }

                ProvisioningStatus::Assigned => {
                    let state = response.status.registration_state.unwrap_or_default();
                    log::info!("DPS registration complete.");

                    self.report_status(ProvisioningDeviceClientStatus::Assigned, None);
                    self.invoke_registration_callback(
                        RegistrationInfo::new(
                            state.assigned_hub,
                            state.device_id,
                            ProvisioningDeviceClientStatus::Assigned,
                        ),
                        None,
                    )?;

                    return Ok(());
                }

                ProvisioningStatus::Failed | ProvisioningStatus::Disabled => {
                    let message = response
                        .status
                        .registration_state
                        .and_then(|state| state.error_message)
                        .unwrap_or_else(|| format!("device registration {}", next_status));
                    let err = Error::Hub(message);
                    log::error!("DPS registration ended with status {}: {}", next_status, err);

                    self.report_status(ProvisioningDeviceClientStatus::Error, Some(&err));
                    self.invoke_registration_callback(
                        RegistrationInfo::new(None, None, ProvisioningDeviceClientStatus::Error),
                        Some(err),
                    )?;

                    return Ok(());
                }
            }
        }
    }

    fn report_status(&mut self, status: ProvisioningDeviceClientStatus, err: Option<&Error>) {
        self.status = status;

        if let Some(status_callback) = &mut self.status_callback {
            status_callback(status, err);
        }
    }

    fn invoke_registration_callback(
        &mut self,
        registration_info: RegistrationInfo,
        err: Option<Error>,
    ) -> Result<(), Error> {
        let registration_callback = self
            .registration_callback
            .take()
            .ok_or_else(|| Error::client("registration callback cannot be null"))?;

        registration_callback(registration_info, err);

        Ok(())
    }
}

impl std::fmt::Debug for ProvisioningTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningTask")
            .field("config", &self.config)
            .field("security", &self.security)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Parses a register or status response body. A body that is a service error is reported as
/// such; anything else that does not parse is an authentication failure.
pub(crate) fn parse_response(
    body: &[u8],
    retry_after: Option<Duration>,
) -> Result<OperationResponse, Error> {
    match RegistrationOperationStatus::from_json(body) {
        Ok(status) => Ok(OperationResponse {
            status,
            retry_after,
        }),

        Err(err) => match ServiceError::from_json(body) {
            Ok(service_error) => Err(Error::Hub(service_error.to_string())),
            Err(_) => Err(Error::authentication(format!(
                "could not parse registration response: {}",
                err
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::parse_response;
    use crate::Error;

    #[test]
    fn parse_registration_response() {
        let response = parse_response(
            br#"{"operationId":"op-1","status":"assigning"}"#,
            Some(Duration::from_secs(2)),
        )
        .unwrap();

        assert_eq!(response.status.operation_id, "op-1");
        assert_eq!(response.retry_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn parse_service_error_response() {
        let err = parse_response(
            br#"{"errorCode":401002,"trackingId":"t-1","message":"Unauthorized"}"#,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Hub(_)));
    }

    #[test]
    fn parse_garbage_response() {
        let bodies: [&[u8]; 4] = [b"", b"null", b"{}", br#"{"status":"assigned"}"#];

        for body in bodies {
            let err = parse_response(body, None).unwrap_err();
            assert!(matches!(err, Error::Authentication(_)));
        }
    }
}
