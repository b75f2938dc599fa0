// Copyright (c) Microsoft. All rights reserved.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use provisioning_device_client::{
    ContractState, Error, ProvisioningDeviceClientContract, RequestData, ResponseCallback,
    ResponseData,
};

/// How the contract answers one exchange.
#[derive(Debug)]
pub enum Scripted {
    /// Runs the callback with this body before returning.
    Body(Vec<u8>),

    /// Runs the callback with this body and a suggested wait before the next poll.
    BodyWithRetryAfter(Vec<u8>, Duration),

    /// Runs the callback from a spawned task after the exchange method has returned.
    Deferred(Vec<u8>),

    /// Runs the callback with a response that never completed.
    Incomplete,

    /// Keeps the callback without ever running it.
    Hang,

    /// Fails the exchange outright.
    Fail,
}

impl Scripted {
    pub fn json(body: &str) -> Self {
        Scripted::Body(body.as_bytes().to_vec())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Exchange {
    Open,
    Nonce,
    Register,
    Status,
    Close,
}

/// Contract that answers each kind of exchange from its own script, in order, and records every
/// request it sees. An exchange with nothing left in its script behaves like [`Scripted::Fail`].
#[derive(Default)]
pub struct ScriptedContract {
    nonce: Mutex<VecDeque<Scripted>>,
    register: Mutex<VecDeque<Scripted>>,
    status: Mutex<VecDeque<Scripted>>,

    exchanges: Mutex<Vec<(Exchange, Option<RequestData>)>>,
    held_callbacks: Mutex<Vec<ResponseCallback>>,
}

impl ScriptedContract {
    #[must_use]
    pub fn with_nonce(self, response: Scripted) -> Self {
        self.nonce.lock().unwrap().push_back(response);
        self
    }

    #[must_use]
    pub fn with_register(self, response: Scripted) -> Self {
        self.register.lock().unwrap().push_back(response);
        self
    }

    #[must_use]
    pub fn with_status(self, response: Scripted) -> Self {
        self.status.lock().unwrap().push_back(response);
        self
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges
            .lock()
            .unwrap()
            .iter()
            .map(|(exchange, _)| *exchange)
            .collect()
    }

    /// Requests sent for one kind of exchange, in order.
    pub fn requests(&self, kind: Exchange) -> Vec<RequestData> {
        self.exchanges
            .lock()
            .unwrap()
            .iter()
            .filter(|(exchange, _)| *exchange == kind)
            .filter_map(|(_, request_data)| request_data.clone())
            .collect()
    }

    fn answer(
        &self,
        kind: Exchange,
        script: &Mutex<VecDeque<Scripted>>,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error> {
        self.exchanges
            .lock()
            .unwrap()
            .push((kind, Some(request_data)));

        let response = script.lock().unwrap().pop_front();
        log::debug!("Scripted {:?} exchange answers with {:?}.", kind, response);

        match response {
            Some(Scripted::Body(body)) => callback.run(ResponseData::received(body)),

            Some(Scripted::BodyWithRetryAfter(body, retry_after)) => callback.run(
                ResponseData::new(
                    Some(body),
                    ContractState::RegistrationReceived,
                    Some(retry_after),
                ),
            ),

            Some(Scripted::Deferred(body)) => {
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    callback.run(ResponseData::received(body));
                });
            }

            Some(Scripted::Incomplete) => {
                callback.run(ResponseData::new(None, ContractState::Pending, None));
            }

            Some(Scripted::Hang) => self.held_callbacks.lock().unwrap().push(callback),

            Some(Scripted::Fail) | None => return Err(super::client_error()),
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl ProvisioningDeviceClientContract for ScriptedContract {
    async fn open(&self, request_data: &RequestData) -> Result<(), Error> {
        self.exchanges
            .lock()
            .unwrap()
            .push((Exchange::Open, Some(request_data.clone())));

        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.exchanges.lock().unwrap().push((Exchange::Close, None));

        Ok(())
    }

    async fn request_nonce_for_tpm(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error> {
        self.answer(Exchange::Nonce, &self.nonce, request_data, callback)
    }

    async fn authenticate_with_provisioning_service(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error> {
        self.answer(Exchange::Register, &self.register, request_data, callback)
    }

    async fn get_registration_status(
        &self,
        request_data: RequestData,
        callback: ResponseCallback,
    ) -> Result<(), Error> {
        self.answer(Exchange::Status, &self.status, request_data, callback)
    }
}
