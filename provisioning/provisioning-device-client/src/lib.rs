// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::let_and_return,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

mod client;
pub use client::ProvisioningDeviceClient;

pub mod config;
pub use config::ProvisioningDeviceClientConfig;

pub mod contract;
pub use contract::{
    ContractApiHttp, ContractState, ProvisioningDeviceClientContract, RequestData,
    ResponseCallback, ResponseData,
};

mod error;
pub use error::Error;

mod sas;

pub mod schema;

pub mod security;
pub use security::{
    SecurityClient, SecurityClientKey, SecurityProvider, SymmetricKeyClient, TlsContext,
};

mod status;
pub use status::{ProvisioningDeviceClientStatus, ProvisioningStatus, RegistrationInfo};

pub mod task;
pub use task::{ProvisioningTask, RegistrationCallback, StatusCallback};

/// Percent-encode set matching `application/x-www-form-urlencoded` for everything but space,
/// which registration ids and id scopes never contain.
const TOKEN_SCOPE_ENCODE_SET: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'*');
