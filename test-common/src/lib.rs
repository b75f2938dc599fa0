// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

//! Test doubles for the provisioning device client.

pub mod callbacks;
pub mod contract;
pub mod credential;
pub mod dps_server;
pub mod security;

/// Generic client error. Current tests don't act on the error other
/// than passing it up the call stack, so it's fine to return any error.
fn client_error() -> provisioning_device_client::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "test error").into()
}
