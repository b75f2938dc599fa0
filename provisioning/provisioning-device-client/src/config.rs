// Copyright (c) Microsoft. All rights reserved.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

const DEFAULT_GLOBAL_ENDPOINT: &str = "https://global.azure-devices-provisioning.net";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProvisioningDeviceClientConfig {
    #[serde(default = "ProvisioningDeviceClientConfig::default_global_endpoint")]
    pub global_endpoint: url::Url,

    pub id_scope: String,

    #[serde(default = "ProvisioningDeviceClientConfig::default_api_version")]
    pub api_version: String,

    /// Sent to the service alongside the registration request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_payload: Option<serde_json::Value>,

    /// Number of sub-tasks that may run at once.
    #[serde(default = "ProvisioningDeviceClientConfig::default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "ProvisioningDeviceClientConfig::default_registration_timeout")]
    pub registration_timeout_sec: u64,

    #[serde(default = "ProvisioningDeviceClientConfig::default_status_timeout")]
    pub status_timeout_sec: u64,

    #[serde(default = "ProvisioningDeviceClientConfig::default_poll_interval")]
    pub poll_interval_sec: u64,

    #[serde(default = "ProvisioningDeviceClientConfig::default_response_timeout")]
    pub response_timeout_sec: u64,

    #[serde(default = "ProvisioningDeviceClientConfig::default_http_timeout")]
    pub http_timeout_sec: u64,

    #[serde(default = "ProvisioningDeviceClientConfig::default_sas_token_ttl")]
    pub sas_token_ttl_sec: i64,
}

impl ProvisioningDeviceClientConfig {
    pub fn new(id_scope: impl Into<String>) -> Self {
        ProvisioningDeviceClientConfig {
            global_endpoint: Self::default_global_endpoint(),
            id_scope: id_scope.into(),
            api_version: Self::default_api_version(),
            custom_payload: None,
            max_workers: Self::default_max_workers(),
            registration_timeout_sec: Self::default_registration_timeout(),
            status_timeout_sec: Self::default_status_timeout(),
            poll_interval_sec: Self::default_poll_interval(),
            response_timeout_sec: Self::default_response_timeout(),
            http_timeout_sec: Self::default_http_timeout(),
            sas_token_ttl_sec: Self::default_sas_token_ttl(),
        }
    }

    #[must_use]
    pub fn with_global_endpoint(mut self, global_endpoint: url::Url) -> Self {
        self.global_endpoint = global_endpoint;

        self
    }

    #[must_use]
    pub fn with_custom_payload(mut self, custom_payload: Option<serde_json::Value>) -> Self {
        self.custom_payload = custom_payload;

        self
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let config = std::fs::read_to_string(path)
            .map_err(|err| Error::ReadConfig(Some(path.to_owned()), Box::new(err)))?;
        let config: ProvisioningDeviceClientConfig = toml::from_str(&config)
            .map_err(|err| Error::ReadConfig(Some(path.to_owned()), Box::new(err)))?;

        Ok(config)
    }

    /// Rejects configurations that the provisioning task cannot run with.
    pub fn check(&self) -> Result<(), Error> {
        if self.id_scope.is_empty() {
            return Err(Error::client("id scope cannot be empty"));
        }

        if self.max_workers == 0 {
            return Err(Error::client("max_workers must be at least 1"));
        }

        let sas_token_ttl = self.sas_token_ttl()?;
        if sas_token_ttl <= chrono::Duration::zero() {
            return Err(Error::invalid_parameter(
                "sas_token_ttl_sec",
                "SAS token lifetime must be positive",
            ));
        }

        // Tokens expire at `now + ttl`, which must still be a representable time.
        if chrono::Utc::now().checked_add_signed(sas_token_ttl).is_none() {
            return Err(Error::invalid_parameter(
                "sas_token_ttl_sec",
                "SAS token lifetime is out of range",
            ));
        }

        Ok(())
    }

    pub fn default_global_endpoint() -> url::Url {
        url::Url::parse(DEFAULT_GLOBAL_ENDPOINT).expect("hardcoded uri should parse")
    }

    pub fn default_api_version() -> String {
        "2019-03-31".to_string()
    }

    pub fn default_max_workers() -> usize {
        2
    }

    pub fn default_registration_timeout() -> u64 {
        1000
    }

    pub fn default_status_timeout() -> u64 {
        10
    }

    pub fn default_poll_interval() -> u64 {
        10
    }

    pub fn default_response_timeout() -> u64 {
        90
    }

    pub fn default_http_timeout() -> u64 {
        30
    }

    pub fn default_sas_token_ttl() -> i64 {
        3600
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_sec)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_sec)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_sec)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_sec)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_sec)
    }

    pub fn sas_token_ttl(&self) -> Result<chrono::Duration, Error> {
        chrono::Duration::try_seconds(self.sas_token_ttl_sec).ok_or_else(|| {
            Error::invalid_parameter("sas_token_ttl_sec", "SAS token lifetime is out of range")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ProvisioningDeviceClientConfig;

    #[test]
    fn defaults() {
        let config: ProvisioningDeviceClientConfig =
            toml::from_str(r#"id_scope = "0ne00000001""#).unwrap();

        assert_eq!(
            config.global_endpoint.as_str(),
            "https://global.azure-devices-provisioning.net/"
        );
        assert_eq!(config.api_version, "2019-03-31");
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.registration_timeout().as_secs(), 1000);
        assert_eq!(config.status_timeout().as_secs(), 10);
        assert_eq!(config.poll_interval().as_secs(), 10);
        assert_eq!(config.sas_token_ttl().unwrap().num_seconds(), 3600);
        assert!(config.custom_payload.is_none());
        config.check().unwrap();
    }

    #[test]
    fn overrides_and_payload() {
        let config: ProvisioningDeviceClientConfig = toml::from_str(
            r#"
global_endpoint = "https://localhost:8443"
id_scope = "scope"
max_workers = 4
poll_interval_sec = 1

[custom_payload]
modelId = "dtmi:example:thermostat;1"
"#,
        )
        .unwrap();

        assert_eq!(config.global_endpoint.host_str(), Some("localhost"));
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.poll_interval().as_secs(), 1);
        assert_eq!(
            config.custom_payload.unwrap()["modelId"],
            "dtmi:example:thermostat;1"
        );
    }

    #[test]
    fn check_rejects_bad_values() {
        assert!(ProvisioningDeviceClientConfig::new("").check().is_err());

        let mut config = ProvisioningDeviceClientConfig::new("scope");
        config.max_workers = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn check_rejects_bad_sas_token_ttl() {
        // Zero and negative lifetimes, a lifetime beyond what a duration can hold, and one that
        // is a valid duration but overflows the expiry time.
        for sas_token_ttl_sec in [0, -1, i64::MAX / 10, i64::MAX / 1000 - 1] {
            let mut config = ProvisioningDeviceClientConfig::new("scope");
            config.sas_token_ttl_sec = sas_token_ttl_sec;

            let err = config.check().unwrap_err();
            assert!(
                matches!(err, crate::Error::InvalidParameter("sas_token_ttl_sec", _)),
                "{} was accepted: {:?}",
                sas_token_ttl_sec,
                err
            );
        }

        let mut config = ProvisioningDeviceClientConfig::new("scope");
        config.sas_token_ttl_sec = i64::MAX / 10;
        assert!(config.sas_token_ttl().is_err());
    }

    #[test]
    fn missing_file() {
        let err = ProvisioningDeviceClientConfig::from_file("/nonexistent/provisioning.toml")
            .unwrap_err();
        assert!(matches!(err, crate::Error::ReadConfig(Some(_), _)));
    }

    #[test]
    fn from_file() {
        let path = std::env::temp_dir().join(format!(
            "provisioning-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "id_scope = \"0ne0000ABCD\"\nsas_token_ttl_sec = 60\n").unwrap();

        let config = ProvisioningDeviceClientConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.id_scope, "0ne0000ABCD");
        assert_eq!(config.sas_token_ttl().unwrap().num_seconds(), 60);
    }
}
