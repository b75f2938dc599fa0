// Copyright (c) Microsoft. All rights reserved.

//! Device identities used to authenticate with the provisioning service.

use std::sync::Arc;

use crate::Error;

/// TLS settings for connections to the provisioning service.
///
/// Carries the device's client certificate chain and private key for X.509 attestation, and any
/// extra trusted roots beyond the system store.
#[derive(Clone, Default)]
pub struct TlsContext {
    identity: Option<(Vec<openssl::x509::X509>, openssl::pkey::PKey<openssl::pkey::Private>)>,
    trusted_certs: Vec<openssl::x509::X509>,
}

impl TlsContext {
    pub fn new() -> Self {
        TlsContext::default()
    }

    /// Sets the client identity. The first certificate of `chain` is the device certificate.
    pub fn with_identity(
        mut self,
        chain: Vec<openssl::x509::X509>,
        private_key: openssl::pkey::PKey<openssl::pkey::Private>,
    ) -> Result<Self, Error> {
        if chain.is_empty() {
            return Err(Error::security("no certs in identity chain"));
        }

        self.identity = Some((chain, private_key));

        Ok(self)
    }

    #[must_use]
    pub fn with_trusted_certs(mut self, trusted_certs: Vec<openssl::x509::X509>) -> Self {
        self.trusted_certs = trusted_certs;

        self
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub(crate) fn connector_builder(
        &self,
    ) -> Result<openssl::ssl::SslConnectorBuilder, openssl::error::ErrorStack> {
        let mut builder = openssl::ssl::SslConnector::builder(openssl::ssl::SslMethod::tls())?;

        if let Some((chain, private_key)) = &self.identity {
            let mut chain = chain.iter();

            if let Some(device_cert) = chain.next() {
                builder.set_certificate(device_cert)?;
            }

            for cert in chain {
                builder.add_extra_chain_cert(cert.clone())?;
            }

            builder.set_private_key(private_key)?;
        }

        for cert in &self.trusted_certs {
            builder.cert_store_mut().add_cert(cert.clone())?;
        }

        Ok(builder)
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("has_identity", &self.has_identity())
            .field("trusted_certs", &self.trusted_certs.len())
            .finish()
    }
}

pub trait SecurityClient: Send + Sync {
    fn registration_id(&self) -> Option<String>;

    fn tls_context(&self) -> Result<Option<TlsContext>, Error>;
}

/// A key store that exchanges a service nonce for an authentication key before signing tokens,
/// such as a TPM.
#[async_trait::async_trait]
pub trait SecurityClientKey: SecurityClient {
    fn endorsement_key(&self) -> Option<Vec<u8>>;

    fn storage_root_key(&self) -> Option<Vec<u8>>;

    async fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, Error>;

    async fn import_key(&self, key: &[u8]) -> Result<(), Error>;
}

/// A device key shared with the service. Tokens are HMAC-SHA256 signatures made with the key.
pub struct SymmetricKeyClient {
    registration_id: String,
    key: Vec<u8>,
    tls_context: TlsContext,
}

impl SymmetricKeyClient {
    pub fn new(registration_id: impl Into<String>, key: &str) -> Result<Self, Error> {
        let engine = base64::engine::general_purpose::STANDARD;
        let key = base64::Engine::decode(&engine, key)
            .map_err(|err| Error::invalid_parameter("key", err))?;

        if key.is_empty() {
            return Err(Error::invalid_parameter("key", "symmetric key cannot be empty"));
        }

        Ok(SymmetricKeyClient {
            registration_id: registration_id.into(),
            key,
            tls_context: TlsContext::default(),
        })
    }

    #[must_use]
    pub fn with_tls_context(mut self, tls_context: TlsContext) -> Self {
        self.tls_context = tls_context;

        self
    }

    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let key = openssl::pkey::PKey::hmac(&self.key).map_err(Error::security)?;

        let mut signer =
            openssl::sign::Signer::new(openssl::hash::MessageDigest::sha256(), &key)
                .map_err(Error::security)?;
        signer.update(data).map_err(Error::security)?;

        let signature = signer.sign_to_vec().map_err(Error::security)?;

        Ok(signature)
    }
}

impl SecurityClient for SymmetricKeyClient {
    fn registration_id(&self) -> Option<String> {
        Some(self.registration_id.clone())
    }

    fn tls_context(&self) -> Result<Option<TlsContext>, Error> {
        Ok(Some(self.tls_context.clone()))
    }
}

/// The attestation mechanism of a device.
#[derive(Clone)]
pub enum SecurityProvider {
    X509(Arc<dyn SecurityClient>),
    Key(Arc<dyn SecurityClientKey>),
    SymmetricKey(Arc<SymmetricKeyClient>),
}

impl SecurityProvider {
    pub fn registration_id(&self) -> Option<String> {
        match self {
            SecurityProvider::X509(client) => client.registration_id(),
            SecurityProvider::Key(client) => client.registration_id(),
            SecurityProvider::SymmetricKey(client) => client.registration_id(),
        }
    }

    pub fn tls_context(&self) -> Result<Option<TlsContext>, Error> {
        match self {
            SecurityProvider::X509(client) => client.tls_context(),
            SecurityProvider::Key(client) => client.tls_context(),
            SecurityProvider::SymmetricKey(client) => client.tls_context(),
        }
    }
}

impl std::fmt::Debug for SecurityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            SecurityProvider::X509(_) => "X509",
            SecurityProvider::Key(_) => "Key",
            SecurityProvider::SymmetricKey(_) => "SymmetricKey",
        };

        f.debug_tuple(kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{SecurityClient, SymmetricKeyClient, TlsContext};

    #[test]
    fn hmac_sha256() {
        // "key" base64-encoded.
        let client = SymmetricKeyClient::new("dev-001", "a2V5").unwrap();

        let signature = client
            .sign_data(b"The quick brown fox jumps over the lazy dog")
            .unwrap();

        let expected = [
            0xf7, 0xbc, 0x83, 0xf4, 0x30, 0x53, 0x84, 0x24, 0xb1, 0x32, 0x98, 0xe6, 0xaa, 0x6f,
            0xb1, 0x43, 0xef, 0x4d, 0x59, 0xa1, 0x49, 0x46, 0x17, 0x59, 0x97, 0x47, 0x9d, 0xbc,
            0x2d, 0x1a, 0x3c, 0xd8,
        ];
        assert_eq!(signature, expected);
    }

    #[test]
    fn bad_symmetric_key() {
        assert!(SymmetricKeyClient::new("dev-001", "not base64!").is_err());
        assert!(SymmetricKeyClient::new("dev-001", "").is_err());
    }

    #[test]
    fn symmetric_key_client_identity() {
        let client = SymmetricKeyClient::new("dev-001", "a2V5").unwrap();

        assert_eq!(client.registration_id().as_deref(), Some("dev-001"));
        assert!(!client.tls_context().unwrap().unwrap().has_identity());
    }

    #[test]
    fn tls_context_without_identity() {
        let context = TlsContext::new();
        assert!(!context.has_identity());
        assert!(context.connector_builder().is_ok());

        let group =
            openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
        let key = openssl::ec::EcKey::generate(&group).unwrap();
        let key = openssl::pkey::PKey::from_ec_key(key).unwrap();
        assert!(TlsContext::new().with_identity(vec![], key).is_err());
    }
}
