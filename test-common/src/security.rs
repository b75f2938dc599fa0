// Copyright (c) Microsoft. All rights reserved.

use std::sync::Mutex;

use provisioning_device_client::{Error, SecurityClient, SecurityClientKey, TlsContext};

/// X.509 security client. The TLS context carries a self-signed device certificate.
pub struct X509Client {
    pub registration_id: Option<String>,

    pub tls_context_ok: bool,
}

impl Default for X509Client {
    fn default() -> Self {
        X509Client {
            registration_id: Some("dev-001".to_string()),
            tls_context_ok: true,
        }
    }
}

impl SecurityClient for X509Client {
    fn registration_id(&self) -> Option<String> {
        self.registration_id.clone()
    }

    fn tls_context(&self) -> Result<Option<TlsContext>, Error> {
        if !self.tls_context_ok {
            return Ok(None);
        }

        let registration_id = self.registration_id.as_deref().unwrap_or("dev-001");

        Ok(Some(crate::credential::tls_context(registration_id)))
    }
}

/// TPM-style security client. Signatures are the signed data prefixed with the imported key, so
/// tests can tell which key signed a token.
#[allow(clippy::struct_excessive_bools)]
pub struct KeyClient {
    pub registration_id: Option<String>,

    pub endorsement_key_ok: bool,
    pub storage_root_key_ok: bool,

    pub sign_ok: bool,
    pub import_key_ok: bool,

    pub imported_keys: Mutex<Vec<Vec<u8>>>,
}

impl Default for KeyClient {
    fn default() -> Self {
        KeyClient {
            registration_id: Some("dev-001".to_string()),
            endorsement_key_ok: true,
            storage_root_key_ok: true,
            sign_ok: true,
            import_key_ok: true,
            imported_keys: Mutex::default(),
        }
    }
}

impl KeyClient {
    pub fn imported_keys(&self) -> Vec<Vec<u8>> {
        self.imported_keys.lock().unwrap().clone()
    }
}

impl SecurityClient for KeyClient {
    fn registration_id(&self) -> Option<String> {
        self.registration_id.clone()
    }

    fn tls_context(&self) -> Result<Option<TlsContext>, Error> {
        Ok(Some(TlsContext::new()))
    }
}

#[async_trait::async_trait]
impl SecurityClientKey for KeyClient {
    fn endorsement_key(&self) -> Option<Vec<u8>> {
        self.endorsement_key_ok.then(|| b"mock-endorsement-key".to_vec())
    }

    fn storage_root_key(&self) -> Option<Vec<u8>> {
        self.storage_root_key_ok
            .then(|| b"mock-storage-root-key".to_vec())
    }

    async fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        if !self.sign_ok {
            return Err(super::client_error());
        }

        let mut signature = self
            .imported_keys
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default();
        signature.extend_from_slice(data);

        Ok(signature)
    }

    async fn import_key(&self, key: &[u8]) -> Result<(), Error> {
        if !self.import_key_ok {
            return Err(super::client_error());
        }

        self.imported_keys.lock().unwrap().push(key.to_vec());

        Ok(())
    }
}
