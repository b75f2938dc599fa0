// Copyright (c) Microsoft. All rights reserved.

use std::sync::Arc;

use crate::{Error, SecurityClientKey, SymmetricKeyClient};

#[async_trait::async_trait]
pub(crate) trait SignData {
    async fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
}

#[async_trait::async_trait]
impl SignData for Arc<dyn SecurityClientKey> {
    async fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        SecurityClientKey::sign_data(&**self, data).await
    }
}

#[async_trait::async_trait]
impl SignData for Arc<SymmetricKeyClient> {
    async fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        SymmetricKeyClient::sign_data(self, data)
    }
}

/// The resource a registration token grants access to, URL-encoded.
pub(crate) fn token_scope(id_scope: &str, registration_id: &str) -> String {
    let scope = format!("{}/registrations/{}", id_scope, registration_id);

    percent_encoding::utf8_percent_encode(&scope, crate::TOKEN_SCOPE_ENCODE_SET).to_string()
}

pub(crate) async fn generate_token(
    token_scope: &str,
    expiry: chrono::Duration,
    client: &impl SignData,
) -> Result<String, Error> {
    if expiry <= chrono::Duration::zero() {
        return Err(Error::invalid_parameter(
            "expiry",
            "expiry time cannot be negative or zero",
        ));
    }

    if token_scope.is_empty() {
        return Err(Error::client("could not construct token scope"));
    }

    let expiry = chrono::Utc::now()
        .checked_add_signed(expiry)
        .ok_or_else(|| Error::invalid_parameter("expiry", "expiry time is out of range"))?
        .timestamp();

    let sig_data = format!("{}\n{}", token_scope, expiry);
    let signature = client.sign_data(sig_data.as_bytes()).await?;

    if signature.is_empty() {
        return Err(Error::security(
            "security client could not sign data successfully",
        ));
    }

    Ok(format_token(token_scope, &signature, expiry))
}

/// No policy name applies to device registration, so `skn` is always empty.
fn format_token(token_scope: &str, signature: &[u8], expiry: i64) -> String {
    let signature = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature);
    let signature: String = url::form_urlencoded::byte_serialize(signature.as_bytes()).collect();

    format!(
        "SharedAccessSignature sr={}&sig={}&se={}&skn=",
        token_scope, signature, expiry
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::{format_token, generate_token, token_scope, SignData};
    use crate::Error;

    struct Signer {
        signature: Vec<u8>,
        signed: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SignData for Signer {
        async fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
            self.signed
                .lock()
                .unwrap()
                .push(String::from_utf8(data.to_vec()).unwrap());

            Ok(self.signature.clone())
        }
    }

    fn signer(signature: &[u8]) -> Signer {
        Signer {
            signature: signature.to_vec(),
            signed: Mutex::default(),
        }
    }

    #[test]
    fn scope_is_url_encoded() {
        assert_eq!(
            token_scope("0ne00000001", "dev-001"),
            "0ne00000001%2Fregistrations%2Fdev-001"
        );
    }

    #[test]
    fn token_format() {
        // base64 of these bytes is "+/8=", which needs URL encoding.
        let token = format_token("scope%2Fregistrations%2Fdev", &[0xfb, 0xff], 1_700_000_000);

        assert_eq!(
            token,
            "SharedAccessSignature sr=scope%2Fregistrations%2Fdev&sig=%2B%2F8%3D&se=1700000000&skn="
        );
    }

    #[tokio::test]
    async fn signs_scope_and_expiry() {
        let client = signer(b"signature");
        let before = chrono::Utc::now().timestamp();

        let token = generate_token("scope", chrono::Duration::seconds(3600), &client)
            .await
            .unwrap();

        let signed = client.signed.lock().unwrap().clone();
        assert_eq!(signed.len(), 1);

        let (scope, expiry) = signed[0].split_once('\n').unwrap();
        assert_eq!(scope, "scope");

        let expiry: i64 = expiry.parse().unwrap();
        assert!(expiry >= before + 3600);
        assert!(expiry <= chrono::Utc::now().timestamp() + 3600);

        assert_eq!(
            token,
            format!(
                "SharedAccessSignature sr=scope&sig=c2lnbmF0dXJl&se={}&skn=",
                expiry
            )
        );
    }

    #[tokio::test]
    async fn rejects_non_positive_expiry() {
        let client = signer(b"signature");

        for expiry in [0, -1] {
            let err = generate_token("scope", chrono::Duration::seconds(expiry), &client)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidParameter("expiry", _)));
        }

        assert!(client.signed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_unrepresentable_expiry() {
        let client = signer(b"signature");

        let err = generate_token(
            "scope",
            chrono::Duration::seconds(i64::MAX / 1000 - 1),
            &client,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter("expiry", _)));

        assert!(client.signed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_signature() {
        let err = generate_token("scope", chrono::Duration::seconds(60), &signer(b""))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Security(_)));
    }
}
