// Copyright (c) Microsoft. All rights reserved.

//! JSON bodies exchanged with the provisioning service.

pub mod request {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeviceRegistration {
        pub registration_id: String,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub tpm: Option<super::TpmAttestation>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub payload: Option<serde_json::Value>,
    }
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmAttestation {
    pub endorsement_key: String,
    pub storage_root_key: String,
}

impl TpmAttestation {
    pub fn new(endorsement_key: &[u8], storage_root_key: &[u8]) -> Self {
        let engine = base64::engine::general_purpose::STANDARD;

        TpmAttestation {
            endorsement_key: base64::Engine::encode(&engine, endorsement_key),
            storage_root_key: base64::Engine::encode(&engine, storage_root_key),
        }
    }
}

pub mod response {
    use crate::{Error, ProvisioningStatus};

    /// The body returned by both the register and the operation status requests.
    #[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RegistrationOperationStatus {
        pub operation_id: String,

        pub status: String,

        #[serde(
            rename = "registrationStatus",
            alias = "registrationState",
            skip_serializing_if = "Option::is_none"
        )]
        pub registration_state: Option<DeviceRegistrationResult>,
    }

    impl RegistrationOperationStatus {
        /// Parses a service response. Missing or empty `operationId` and `status` are rejected.
        pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
            let response: RegistrationOperationStatus = serde_json::from_slice(body)?;

            if response.operation_id.is_empty() {
                return Err(serde::de::Error::custom("operationId cannot be empty"));
            }

            if response.status.is_empty() {
                return Err(serde::de::Error::custom("status cannot be empty"));
            }

            Ok(response)
        }

        pub fn provisioning_status(&self) -> Result<ProvisioningStatus, Error> {
            self.status.parse().map_err(Error::Authentication)
        }
    }

    #[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeviceRegistrationResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub registration_id: Option<String>,

        #[serde(rename = "createdDateTimeUtc", skip_serializing_if = "Option::is_none")]
        pub created_date_time_utc: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub assigned_hub: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub device_id: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub status: Option<String>,

        /// `initialAssignment`, `deviceDataMigrated` or `deviceDataReset` for assigned devices.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub substatus: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub error_code: Option<i32>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub error_message: Option<String>,

        #[serde(
            rename = "lastUpdatedDateTimeUtc",
            skip_serializing_if = "Option::is_none"
        )]
        pub last_updated_date_time_utc: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub etag: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub tpm: Option<TpmAuthKey>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub x509: Option<X509RegistrationResult>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub symmetric_key: Option<SymmetricKeyRegistrationResult>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub payload: Option<serde_json::Value>,
    }

    #[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TpmAuthKey {
        pub authentication_key: String,
    }

    #[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct X509RegistrationResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub certificate_info: Option<X509CertificateInfo>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub enrollment_group_id: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub signing_certificate_info: Option<X509CertificateInfo>,
    }

    #[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
    pub struct X509CertificateInfo {
        #[serde(rename = "subjectName")]
        pub subject_name: String,
        #[serde(rename = "sha1Thumbprint")]
        pub sha1_thumbprint: String,
        #[serde(rename = "sha256Thumbprint")]
        pub sha256_thumbprint: String,
        #[serde(rename = "issuerName")]
        pub issuer_name: String,
        #[serde(rename = "notBeforeUtc")]
        pub not_before_utc: String,
        #[serde(rename = "notAfterUtc")]
        pub not_after_utc: String,
        #[serde(rename = "serialNumber")]
        pub serial_number: String,
        #[serde(rename = "version")]
        pub version: i32,
    }

    #[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SymmetricKeyRegistrationResult {
        pub enrollment_group_id: Option<String>,
    }

    /// Error body returned by the service for rejected requests.
    #[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ServiceError {
        #[serde(alias = "code")]
        pub error_code: i32,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub tracking_id: Option<String>,

        #[serde(alias = "Message", alias = "errorMessage")]
        pub message: String,
    }

    impl ServiceError {
        pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
            serde_json::from_slice(body)
        }
    }

    impl std::fmt::Display for ServiceError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{} (error code {})", self.message, self.error_code)?;

            if let Some(tracking_id) = &self.tracking_id {
                write!(f, ", tracking id {}", tracking_id)?;
            }

            Ok(())
        }
    }
}
