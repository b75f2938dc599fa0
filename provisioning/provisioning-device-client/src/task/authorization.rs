// Copyright (c) Microsoft. All rights reserved.

use crate::TlsContext;

/// Credentials gathered while registering, reused by every status poll of the same attempt.
#[derive(Debug, Default)]
pub(crate) struct Authorization {
    tls_context: Option<TlsContext>,
    sas_token: Option<String>,
}

impl Authorization {
    pub(crate) fn tls_context(&self) -> Option<&TlsContext> {
        self.tls_context.as_ref()
    }

    pub(crate) fn set_tls_context(&mut self, tls_context: TlsContext) {
        self.tls_context = Some(tls_context);
    }

    pub(crate) fn sas_token(&self) -> Option<&str> {
        self.sas_token.as_deref()
    }

    pub(crate) fn set_sas_token(&mut self, sas_token: String) {
        self.sas_token = Some(sas_token);
    }
}

pub(crate) type SharedAuthorization = std::sync::Arc<futures_util::lock::Mutex<Authorization>>;

#[cfg(test)]
mod tests {
    use super::Authorization;

    #[test]
    fn last_writer_wins() {
        let mut authorization = Authorization::default();
        assert!(authorization.sas_token().is_none());
        assert!(authorization.tls_context().is_none());

        authorization.set_sas_token("first".to_string());
        authorization.set_sas_token("second".to_string());
        assert_eq!(authorization.sas_token(), Some("second"));

        authorization.set_tls_context(crate::TlsContext::new());
        assert!(authorization.tls_context().is_some());
    }
}
