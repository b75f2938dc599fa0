// Copyright (c) Microsoft. All rights reserved.

use std::sync::Arc;
use std::time::Duration;

use super::authorization::SharedAuthorization;
use super::OperationResponse;
use crate::contract::{response_channel, ContractState};
use crate::sas::{self, SignData};
use crate::schema::response::TpmAuthKey;
use crate::{
    Error, ProvisioningDeviceClientContract, RequestData, SecurityClientKey, SecurityProvider,
};

/// One registration exchange: authenticate the device and submit its registration.
pub(crate) struct RegisterTask {
    pub(crate) id_scope: String,
    pub(crate) payload: Option<serde_json::Value>,
    pub(crate) response_timeout: Duration,
    pub(crate) sas_token_ttl: chrono::Duration,
    pub(crate) security: SecurityProvider,
    pub(crate) contract: Arc<dyn ProvisioningDeviceClientContract>,
    pub(crate) authorization: SharedAuthorization,
}

impl RegisterTask {
    pub(crate) async fn call(self) -> Result<OperationResponse, Error> {
        let registration_id = self
            .security
            .registration_id()
            .filter(|registration_id| !registration_id.is_empty())
            .ok_or_else(|| Error::client("registration id cannot be empty"))?;

        let tls_context = self
            .security
            .tls_context()?
            .ok_or_else(|| Error::security("Null SSL Context received from security client"))?;
        self.authorization
            .lock()
            .await
            .set_tls_context(tls_context.clone());

        let request_data = RequestData::registration(registration_id)
            .with_tls_context(Some(tls_context))
            .with_payload(self.payload.clone());

        match &self.security {
            SecurityProvider::X509(_) => self.authenticate_with_x509(request_data).await,

            SecurityProvider::Key(client) => {
                self.authenticate_with_nonce(request_data, client.clone())
                    .await
            }

            SecurityProvider::SymmetricKey(client) => {
                self.authenticate_with_sas_token(request_data, client)
                    .await
            }
        }
    }

    async fn authenticate_with_x509(
        &self,
        request_data: RequestData,
    ) -> Result<OperationResponse, Error> {
        log::info!("Sending DPS registration request with X.509 identity.");

        let (callback, pending) = response_channel();
        self.contract
            .authenticate_with_provisioning_service(request_data, callback)
            .await?;

        let (body, retry_after) = pending
            .wait(self.response_timeout)
            .await
            .and_then(crate::ResponseData::into_received)
            .ok_or_else(|| Error::client("Did not receive DPS registration successfully"))?;

        super::parse_response(&body, retry_after)
    }

    /// Exchanges the device's TPM keys for an authentication key, then registers with a token
    /// signed by that key.
    async fn authenticate_with_nonce(
        &self,
        request_data: RequestData,
        client: Arc<dyn SecurityClientKey>,
    ) -> Result<OperationResponse, Error> {
        let (endorsement_key, storage_root_key) =
            match (client.endorsement_key(), client.storage_root_key()) {
                (Some(endorsement_key), Some(storage_root_key)) => {
                    (endorsement_key, storage_root_key)
                }
                _ => return Err(Error::security("Ek or SRK cannot be null")),
            };

        let request_data = request_data.with_tpm_keys(endorsement_key, storage_root_key);

        log::info!("Requesting DPS authentication key.");

        let (callback, pending) = response_channel();
        self.contract
            .request_nonce_for_tpm(request_data.clone(), callback)
            .await?;

        let response = pending
            .wait(self.response_timeout)
            .await
            .filter(|response| response.contract_state() == ContractState::RegistrationReceived)
            .ok_or_else(|| {
                Error::client("Did not receive DPS registration nonce successfully")
            })?;

        let nonce = response
            .response_data()
            .filter(|nonce| !nonce.is_empty())
            .ok_or_else(|| Error::authentication("Service did not send authentication key"))?;

        let auth_key: TpmAuthKey = serde_json::from_slice(nonce).map_err(|err| {
            Error::authentication(format!("could not parse authentication key: {}", err))
        })?;

        let auth_key = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            auth_key.authentication_key,
        )
        .map_err(Error::security)?;

        client.import_key(&auth_key).await?;
        log::info!("Imported DPS authentication key.");

        self.authenticate_with_sas_token(request_data, &client)
            .await
    }

    async fn authenticate_with_sas_token(
        &self,
        request_data: RequestData,
        signer: &impl SignData,
    ) -> Result<OperationResponse, Error> {
        let token_scope = sas::token_scope(&self.id_scope, request_data.registration_id());
        let sas_token = sas::generate_token(&token_scope, self.sas_token_ttl, signer).await?;

        let request_data = request_data.with_sas_token(Some(sas_token.clone()));

        log::info!("Sending DPS registration request with SAS token.");

        let (callback, pending) = response_channel();
        self.contract
            .authenticate_with_provisioning_service(request_data, callback)
            .await?;

        let (body, retry_after) = pending
            .wait(self.response_timeout)
            .await
            .and_then(crate::ResponseData::into_received)
            .ok_or_else(|| Error::authentication("Service did not authorize SasToken"))?;

        self.authorization.lock().await.set_sas_token(sas_token);

        super::parse_response(&body, retry_after)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::RegisterTask;
    use crate::contract::{RequestData, ResponseCallback, ResponseData};
    use crate::{
        Error, ProvisioningDeviceClientContract, SecurityClient, SecurityClientKey,
        SecurityProvider, SymmetricKeyClient, TlsContext,
    };

    const ASSIGNING: &[u8] = br#"{"operationId":"op-1","status":"assigning"}"#;

    /// Answers every exchange with the next canned body, and remembers what it was sent.
    #[derive(Default)]
    struct Contract {
        nonce: Option<Vec<u8>>,
        register: Option<Vec<u8>>,
        requests: Mutex<Vec<(&'static str, RequestData)>>,
    }

    #[async_trait::async_trait]
    impl ProvisioningDeviceClientContract for Contract {
        async fn request_nonce_for_tpm(
            &self,
            request_data: RequestData,
            callback: ResponseCallback,
        ) -> Result<(), Error> {
            self.requests.lock().unwrap().push(("nonce", request_data));
            if let Some(nonce) = &self.nonce {
                callback.run(ResponseData::received(nonce.clone()));
            }
            Ok(())
        }

        async fn authenticate_with_provisioning_service(
            &self,
            request_data: RequestData,
            callback: ResponseCallback,
        ) -> Result<(), Error> {
            self.requests.lock().unwrap().push(("register", request_data));
            if let Some(register) = &self.register {
                callback.run(ResponseData::received(register.clone()));
            }
            Ok(())
        }

        async fn get_registration_status(
            &self,
            _request_data: RequestData,
            _callback: ResponseCallback,
        ) -> Result<(), Error> {
            unreachable!("register task never polls")
        }
    }

    struct X509Client {
        registration_id: Option<String>,
        tls_context: bool,
    }

    impl SecurityClient for X509Client {
        fn registration_id(&self) -> Option<String> {
            self.registration_id.clone()
        }

        fn tls_context(&self) -> Result<Option<TlsContext>, Error> {
            Ok(self.tls_context.then(TlsContext::new))
        }
    }

    struct KeyClient {
        keys: bool,
        imported: Mutex<Vec<Vec<u8>>>,
    }

    impl SecurityClient for KeyClient {
        fn registration_id(&self) -> Option<String> {
            Some("dev-001".to_string())
        }

        fn tls_context(&self) -> Result<Option<TlsContext>, Error> {
            Ok(Some(TlsContext::new()))
        }
    }

    #[async_trait::async_trait]
    impl SecurityClientKey for KeyClient {
        fn endorsement_key(&self) -> Option<Vec<u8>> {
            self.keys.then(|| b"ek".to_vec())
        }

        fn storage_root_key(&self) -> Option<Vec<u8>> {
            self.keys.then(|| b"srk".to_vec())
        }

        async fn sign_data(&self, _data: &[u8]) -> Result<Vec<u8>, Error> {
            Ok(b"signature".to_vec())
        }

        async fn import_key(&self, key: &[u8]) -> Result<(), Error> {
            self.imported.lock().unwrap().push(key.to_vec());
            Ok(())
        }
    }

    fn task(security: SecurityProvider, contract: &Arc<Contract>) -> RegisterTask {
        RegisterTask {
            id_scope: "0ne00000001".to_string(),
            payload: None,
            response_timeout: Duration::from_secs(1),
            sas_token_ttl: chrono::Duration::seconds(3600),
            security,
            contract: contract.clone(),
            authorization: Arc::default(),
        }
    }

    fn x509(registration_id: Option<&str>, tls_context: bool) -> SecurityProvider {
        SecurityProvider::X509(Arc::new(X509Client {
            registration_id: registration_id.map(ToOwned::to_owned),
            tls_context,
        }))
    }

    fn key_client(keys: bool) -> Arc<KeyClient> {
        Arc::new(KeyClient {
            keys,
            imported: Mutex::default(),
        })
    }

    #[tokio::test]
    async fn x509_registration() {
        let contract = Arc::new(Contract {
            register: Some(ASSIGNING.to_vec()),
            ..Contract::default()
        });
        let task = task(x509(Some("dev-001"), true), &contract);
        let authorization = task.authorization.clone();

        let response = task.call().await.unwrap();
        assert_eq!(response.status.operation_id, "op-1");

        let requests = contract.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.registration_id(), "dev-001");
        assert!(requests[0].1.tls_context().is_some());
        assert!(requests[0].1.sas_token().is_none());

        let authorization = authorization.lock().await;
        assert!(authorization.tls_context().is_some());
        assert!(authorization.sas_token().is_none());
    }

    #[tokio::test]
    async fn missing_registration_id() {
        let contract = Arc::new(Contract::default());

        for registration_id in [None, Some("")] {
            let err = task(x509(registration_id, true), &contract)
                .call()
                .await
                .err()
                .unwrap();
            assert!(matches!(err, Error::Client(_)));
        }

        assert!(contract.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_tls_context() {
        let contract = Arc::new(Contract::default());

        let err = task(x509(Some("dev-001"), false), &contract)
            .call()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Security(_)));
    }

    #[tokio::test]
    async fn x509_no_response() {
        let contract = Arc::new(Contract::default());

        let err = task(x509(Some("dev-001"), true), &contract)
            .call()
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Client(message) if message == "Did not receive DPS registration successfully"
        ));
    }

    #[tokio::test]
    async fn tpm_nonce_then_sas_registration() {
        let contract = Arc::new(Contract {
            nonce: Some(br#"{"authenticationKey":"a2V5"}"#.to_vec()),
            register: Some(ASSIGNING.to_vec()),
            ..Contract::default()
        });
        let client = key_client(true);
        let task = task(SecurityProvider::Key(client.clone()), &contract);
        let authorization = task.authorization.clone();

        task.call().await.unwrap();

        assert_eq!(*client.imported.lock().unwrap(), vec![b"key".to_vec()]);

        let requests = contract.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, "nonce");
        assert_eq!(requests[0].1.endorsement_key(), Some(&b"ek"[..]));
        assert!(requests[0].1.sas_token().is_none());

        assert_eq!(requests[1].0, "register");
        let sas_token = requests[1].1.sas_token().unwrap();
        assert!(sas_token.starts_with(
            "SharedAccessSignature sr=0ne00000001%2Fregistrations%2Fdev-001&sig=c2lnbmF0dXJl&se="
        ));
        assert!(sas_token.ends_with("&skn="));

        assert_eq!(authorization.lock().await.sas_token(), Some(sas_token));
    }

    #[tokio::test]
    async fn tpm_without_keys() {
        let contract = Arc::new(Contract::default());

        let err = task(SecurityProvider::Key(key_client(false)), &contract)
            .call()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Security(_)));
        assert!(contract.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tpm_empty_nonce() {
        let contract = Arc::new(Contract {
            nonce: Some(vec![]),
            ..Contract::default()
        });

        let err = task(SecurityProvider::Key(key_client(true)), &contract)
            .call()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn tpm_nonce_not_base64() {
        let contract = Arc::new(Contract {
            nonce: Some(br#"{"authenticationKey":"not base64!"}"#.to_vec()),
            register: Some(ASSIGNING.to_vec()),
            ..Contract::default()
        });
        let client = key_client(true);

        let err = task(SecurityProvider::Key(client.clone()), &contract)
            .call()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Security(_)));
        assert!(client.imported.lock().unwrap().is_empty());
        assert_eq!(contract.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sas_registration_not_authorized() {
        let contract = Arc::new(Contract::default());
        let client = SymmetricKeyClient::new("dev-001", "a2V5").unwrap();

        let err = task(SecurityProvider::SymmetricKey(Arc::new(client)), &contract)
            .call()
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Authentication(message) if message == "Service did not authorize SasToken"
        ));
    }

    #[tokio::test]
    async fn symmetric_key_skips_nonce() {
        let contract = Arc::new(Contract {
            register: Some(ASSIGNING.to_vec()),
            ..Contract::default()
        });
        let client = SymmetricKeyClient::new("dev-001", "a2V5").unwrap();

        task(SecurityProvider::SymmetricKey(Arc::new(client)), &contract)
            .call()
            .await
            .unwrap();

        let requests = contract.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "register");
        assert!(requests[0].1.endorsement_key().is_none());
        assert!(requests[0].1.sas_token().is_some());
    }
}
