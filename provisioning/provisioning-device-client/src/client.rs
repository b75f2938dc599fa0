// Copyright (c) Microsoft. All rights reserved.

use std::sync::Arc;

use crate::{
    ContractApiHttp, Error, ProvisioningDeviceClientConfig, ProvisioningDeviceClientContract,
    ProvisioningDeviceClientStatus, ProvisioningTask, RegistrationCallback, SecurityProvider,
    StatusCallback,
};

/// Registers a device with the provisioning service in the background.
pub struct ProvisioningDeviceClient {
    config: ProvisioningDeviceClientConfig,
    security: SecurityProvider,
    contract: Arc<dyn ProvisioningDeviceClientContract>,
}

impl ProvisioningDeviceClient {
    /// Creates a client that talks to `config.global_endpoint` over HTTPS.
    pub fn new(
        config: ProvisioningDeviceClientConfig,
        security: SecurityProvider,
    ) -> Result<Self, Error> {
        config.check()?;

        let contract = Arc::new(ContractApiHttp::new(&config));

        Ok(ProvisioningDeviceClient {
            config,
            security,
            contract,
        })
    }

    #[must_use]
    pub fn with_contract(mut self, contract: Arc<dyn ProvisioningDeviceClientContract>) -> Self {
        self.contract = contract;

        self
    }

    /// Starts a registration attempt on the tokio runtime.
    ///
    /// The status callback fires with `Unauthenticated` before this returns. The returned handle
    /// resolves to the final status once the attempt is over.
    pub fn register_device(
        &self,
        registration_callback: RegistrationCallback,
        status_callback: Option<StatusCallback>,
    ) -> Result<tokio::task::JoinHandle<ProvisioningDeviceClientStatus>, Error> {
        let mut task = ProvisioningTask::new(
            self.config.clone(),
            self.security.clone(),
            self.contract.clone(),
            status_callback,
        )?;
        task.set_registration_callback(registration_callback);

        log::info!(
            "Starting DPS registration for scope {}.",
            self.config.id_scope
        );

        Ok(tokio::spawn(async move { task.call().await }))
    }
}

impl std::fmt::Debug for ProvisioningDeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningDeviceClient")
            .field("config", &self.config)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}
