// Copyright (c) Microsoft. All rights reserved.

use std::sync::{Arc, Mutex};

use provisioning_device_client::{
    ProvisioningDeviceClientStatus, RegistrationCallback, RegistrationInfo, StatusCallback,
};

#[derive(Debug, Default)]
struct Recorded {
    statuses: Vec<(ProvisioningDeviceClientStatus, Option<String>)>,
    registrations: Vec<(RegistrationInfo, Option<String>)>,
}

/// Hands out status and registration callbacks that record every invocation. Errors are kept
/// as their display strings.
#[derive(Clone, Debug, Default)]
pub struct CallbackRecorder {
    inner: Arc<Mutex<Recorded>>,
}

impl CallbackRecorder {
    pub fn status_callback(&self) -> StatusCallback {
        let inner = self.inner.clone();

        Box::new(move |status, err| {
            inner
                .lock()
                .unwrap()
                .statuses
                .push((status, err.map(ToString::to_string)));
        })
    }

    pub fn registration_callback(&self) -> RegistrationCallback {
        let inner = self.inner.clone();

        Box::new(move |registration_info, err| {
            inner
                .lock()
                .unwrap()
                .registrations
                .push((registration_info, err.map(|err| err.to_string())));
        })
    }

    pub fn statuses(&self) -> Vec<ProvisioningDeviceClientStatus> {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .iter()
            .map(|(status, _)| *status)
            .collect()
    }

    /// Error reported alongside the most recent status, if any.
    pub fn last_status_error(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .last()
            .and_then(|(_, err)| err.clone())
    }

    pub fn registrations(&self) -> Vec<(RegistrationInfo, Option<String>)> {
        self.inner.lock().unwrap().registrations.clone()
    }
}
