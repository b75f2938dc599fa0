// Copyright (c) Microsoft. All rights reserved.

use std::sync::Arc;
use std::time::Duration;

use super::authorization::SharedAuthorization;
use super::OperationResponse;
use crate::contract::response_channel;
use crate::{Error, ProvisioningDeviceClientContract, RequestData, ResponseData};

/// One poll of a registration operation.
pub(crate) struct StatusTask {
    pub(crate) registration_id: String,
    pub(crate) operation_id: String,
    pub(crate) response_timeout: Duration,
    pub(crate) contract: Arc<dyn ProvisioningDeviceClientContract>,
    pub(crate) authorization: SharedAuthorization,
}

impl StatusTask {
    pub(crate) async fn call(self) -> Result<OperationResponse, Error> {
        if self.operation_id.is_empty() {
            return Err(Error::client("operation id cannot be empty"));
        }

        let request_data = {
            let authorization = self.authorization.lock().await;

            RequestData::status(self.registration_id, self.operation_id)
                .with_tls_context(authorization.tls_context().cloned())
                .with_sas_token(authorization.sas_token().map(ToOwned::to_owned))
        };

        let (callback, pending) = response_channel();
        self.contract
            .get_registration_status(request_data, callback)
            .await?;

        let (body, retry_after) = pending
            .wait(self.response_timeout)
            .await
            .and_then(ResponseData::into_received)
            .ok_or_else(|| {
                Error::authentication("Status response could not be retrieved")
            })?;

        super::parse_response(&body, retry_after)
    }
}
