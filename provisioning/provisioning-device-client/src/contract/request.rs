// Copyright (c) Microsoft. All rights reserved.

use std::io::{Error, ErrorKind};

pub(super) const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

pub(super) type Connector = hyper_openssl::HttpsConnector<hyper::client::HttpConnector>;

pub(super) struct HttpRequest {
    connector: Connector,
    method: hyper::Method,
    uri: String,
    headers: http::HeaderMap<http::HeaderValue>,
    body: Option<Vec<u8>>,
    timeout: std::time::Duration,
}

pub(super) struct HttpResponse {
    pub(super) status: hyper::StatusCode,
    pub(super) retry_after: Option<std::time::Duration>,
    pub(super) body: hyper::body::Bytes,
}

impl HttpRequest {
    pub(super) fn get(connector: Connector, uri: &str) -> Self {
        HttpRequest {
            connector,
            method: hyper::Method::GET,
            uri: uri.to_string(),
            headers: http::HeaderMap::default(),
            body: None,
            timeout: std::time::Duration::from_secs(30),
        }
    }

    pub(super) fn put(
        connector: Connector,
        uri: &str,
        body: &impl serde::Serialize,
    ) -> Result<Self, Error> {
        let body =
            serde_json::to_vec(body).map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

        Ok(HttpRequest {
            connector,
            method: hyper::Method::PUT,
            uri: uri.to_string(),
            headers: http::HeaderMap::default(),
            body: Some(body),
            timeout: std::time::Duration::from_secs(30),
        })
    }

    pub(super) fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;

        self
    }

    pub(super) fn add_header(
        &mut self,
        name: hyper::header::HeaderName,
        value: &str,
    ) -> Result<(), Error> {
        let value = http::HeaderValue::from_str(value)
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

        self.headers.insert(name, value);

        Ok(())
    }

    /// Sends the request once. Any status code is returned to the caller; only a response body
    /// that is not JSON is an error here.
    pub(super) async fn json_response(self) -> Result<HttpResponse, Error> {
        let client: hyper::Client<_, hyper::Body> = hyper::Client::builder().build(self.connector);

        let mut request = hyper::Request::builder()
            .method(&self.method)
            .uri(&self.uri)
            .header(hyper::header::ACCEPT, CONTENT_TYPE_JSON);

        let request_body = if let Some(body) = self.body {
            request = request.header(hyper::header::CONTENT_TYPE, CONTENT_TYPE_JSON);

            hyper::Body::from(body)
        } else {
            hyper::Body::empty()
        };

        for (header_name, header_value) in &self.headers {
            request = request.header(header_name, header_value);
        }

        let request = request
            .body(request_body)
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

        let response = match tokio::time::timeout(self.timeout, client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                let err = if err.is_connect() {
                    Error::new(ErrorKind::NotConnected, err)
                } else {
                    Error::new(ErrorKind::Other, err)
                };

                log::warn!("Failed to send HTTP request: {}", err);

                return Err(err);
            }
            Err(timeout) => {
                log::warn!("HTTP request to {} timed out.", self.uri);

                return Err(timeout.into());
            }
        };

        let (
            http::response::Parts {
                status: response_status,
                headers: response_headers,
                ..
            },
            response_body,
        ) = response.into_parts();

        let response_body = hyper::body::to_bytes(response_body)
            .await
            .map_err(|err| Error::new(ErrorKind::Other, err))?;

        // Empty bodies are allowed through so the caller can decide what they mean.
        if !response_body.is_empty() {
            let is_json_response =
                if let Some(content_type) = response_headers.get(hyper::header::CONTENT_TYPE) {
                    let content_type = content_type
                        .to_str()
                        .map_err(|err| Error::new(ErrorKind::InvalidData, err))?;

                    content_type.contains("application/json")
                } else {
                    false
                };

            if !is_json_response {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "invalid Content-Type; expected JSON",
                ));
            }
        }

        let retry_after = response_headers
            .get(hyper::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);

        Ok(HttpResponse {
            status: response_status,
            retry_after,
            body: response_body,
        })
    }
}

/// `Retry-After` as delay-seconds. The HTTP-date form is not used by the provisioning service.
fn parse_retry_after(value: &str) -> Option<std::time::Duration> {
    let seconds: u64 = value.trim().parse().ok()?;

    Some(std::time::Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::parse_retry_after;

    #[test]
    fn retry_after() {
        assert_eq!(
            parse_retry_after("3"),
            Some(std::time::Duration::from_secs(3))
        );
        assert_eq!(
            parse_retry_after(" 10 "),
            Some(std::time::Duration::from_secs(10))
        );
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-1"), None);
    }
}
