// Copyright (c) Microsoft. All rights reserved.

//! In-process provisioning service for exercising the HTTP contract.
//!
//! Plain HTTP on localhost. Registrations answer `assigning`, and each operation answers
//! `assigning` for [`Options::assigning_polls`] polls before reporting the device assigned to
//! hub `localhost`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Authentication key handed out to TPM registrations, before base64 encoding.
pub const TPM_AUTH_KEY: &[u8] = b"mock-dps-tpm-key";

pub const ASSIGNED_HUB: &str = "localhost";

#[derive(Clone, Debug)]
pub struct Options {
    pub id_scope: String,

    /// Status polls that still answer `assigning`.
    pub assigning_polls: usize,

    /// Sent as `Retry-After` on every accepted register and status response.
    pub retry_after_sec: Option<u64>,

    /// Reject registrations without a SAS token in the `Authorization` header.
    pub require_sas_token: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            id_scope: "0ne00000001".to_string(),
            assigning_polls: 0,
            retry_after_sec: None,
            require_sas_token: false,
        }
    }
}

/// A request as seen by the server.
#[derive(Clone, Debug)]
pub struct ParsedRequest {
    pub method: hyper::Method,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl ParsedRequest {
    async fn from_http(req: hyper::Request<hyper::Body>) -> Result<Self, Response> {
        let method = req.method().clone();
        let uri = req.uri().to_string();

        let mut headers = BTreeMap::new();
        for (key, value) in req.headers() {
            let value = value
                .to_str()
                .map_err(|_| Response::bad_request("bad header value"))?
                .to_string();

            headers.insert(key.to_string(), value);
        }

        let body = hyper::body::to_bytes(req.into_body())
            .await
            .map_err(|_| Response::bad_request("unable to get body"))?
            .to_vec();

        let body = if body.is_empty() {
            None
        } else {
            let body = String::from_utf8(body)
                .map_err(|_| Response::bad_request("unable to parse body"))?;

            Some(body)
        };

        log::debug!("mock DPS < {} {}", method, uri);

        Ok(ParsedRequest {
            method,
            uri,
            headers,
            body,
        })
    }
}

enum Response {
    Error {
        status: hyper::StatusCode,
        message: String,
    },

    Json {
        status: hyper::StatusCode,
        retry_after_sec: Option<u64>,
        body: String,
    },
}

impl Response {
    fn bad_request(message: impl std::fmt::Display) -> Self {
        Response::service_error(hyper::StatusCode::BAD_REQUEST, 400_000, message)
    }

    fn not_found(message: impl std::fmt::Display) -> Self {
        Response::Error {
            status: hyper::StatusCode::NOT_FOUND,
            message: message.to_string(),
        }
    }

    fn method_not_allowed(method: &hyper::Method) -> Self {
        Response::Error {
            status: hyper::StatusCode::METHOD_NOT_ALLOWED,
            message: format!("{} not allowed", method),
        }
    }

    /// Error in the body format the service uses.
    fn service_error(
        status: hyper::StatusCode,
        error_code: i32,
        message: impl std::fmt::Display,
    ) -> Self {
        Response::json(
            status,
            None,
            &serde_json::json!({
                "errorCode": error_code,
                "trackingId": uuid::Uuid::new_v4().hyphenated().to_string(),
                "message": message.to_string(),
            }),
        )
    }

    fn json(
        status: hyper::StatusCode,
        retry_after_sec: Option<u64>,
        body: &serde_json::Value,
    ) -> Self {
        Response::Json {
            status,
            retry_after_sec,
            body: body.to_string(),
        }
    }

    fn into_http(self) -> hyper::Response<hyper::Body> {
        let mut response = hyper::Response::builder();

        let (status, body) = match self {
            Response::Error { status, message } => {
                log::debug!("mock DPS > {}: {}", status, message);

                (status, hyper::Body::empty())
            }

            Response::Json {
                status,
                retry_after_sec,
                body,
            } => {
                log::debug!("mock DPS > {}: {}", status, body);

                response = response.header(hyper::header::CONTENT_TYPE, "application/json");

                if let Some(retry_after_sec) = retry_after_sec {
                    response = response.header(hyper::header::RETRY_AFTER, retry_after_sec);
                }

                (status, hyper::Body::from(body))
            }
        };

        response.status(status).body(body).unwrap()
    }
}

#[derive(Debug, Default)]
struct Context {
    options: Options,

    /// Operation id to (registration id, polls left before assignment).
    in_progress_operations: BTreeMap<String, (String, usize)>,

    requests: Vec<ParsedRequest>,
}

/// Handle to a running mock server. The server stops when this is dropped.
pub struct MockDpsServer {
    endpoint: url::Url,
    context: Arc<Mutex<Context>>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockDpsServer {
    /// Binds an ephemeral localhost port and starts serving on the current runtime.
    pub fn start(options: Options) -> Self {
        let context = Arc::new(Mutex::new(Context {
            options,
            ..Context::default()
        }));

        let server = {
            let context = context.clone();

            hyper::Server::bind(&([127, 0, 0, 1], 0).into()).serve(
                hyper::service::make_service_fn(move |_| {
                    let context = context.clone();

                    let service = hyper::service::service_fn(move |req| {
                        serve_request(context.clone(), req)
                    });

                    async move { Ok::<_, std::convert::Infallible>(service) }
                }),
            )
        };

        let endpoint = url::Url::parse(&format!("http://{}", server.local_addr())).unwrap();

        let (shutdown, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        tokio::spawn(async move {
            if let Err(err) = server.await {
                log::error!("mock DPS server failed: {}", err);
            }
        });

        MockDpsServer {
            endpoint,
            context,
            shutdown: Some(shutdown),
        }
    }

    /// Base URL to use as the client's global endpoint.
    pub fn endpoint(&self) -> url::Url {
        self.endpoint.clone()
    }

    pub fn requests(&self) -> Vec<ParsedRequest> {
        self.context.lock().unwrap().requests.clone()
    }
}

impl Drop for MockDpsServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn serve_request(
    context: Arc<Mutex<Context>>,
    req: hyper::Request<hyper::Body>,
) -> Result<hyper::Response<hyper::Body>, std::convert::Infallible> {
    let req = match ParsedRequest::from_http(req).await {
        Ok(req) => req,
        Err(response) => return Ok(response.into_http()),
    };

    let mut context = context.lock().unwrap();
    context.requests.push(req.clone());

    Ok(process_dps_request(&req, &mut context).into_http())
}

fn process_dps_request(req: &ParsedRequest, context: &mut Context) -> Response {
    lazy_static::lazy_static! {
        static ref DPS_REGEX: regex::Regex = regex::Regex::new(
            "/(?P<scopeId>[^/]+)/registrations/(?P<registrationId>[^/]+)/(?P<action>.+)\\?api-version=\\d{4}-\\d{2}-\\d{2}$"
        ).unwrap();

        static ref OPERATION_STATUS_REGEX: regex::Regex = regex::Regex::new(
            "operations/(?P<operationId>[^/]+)$"
        ).unwrap();
    }

    let captures = match DPS_REGEX.captures(&req.uri) {
        Some(captures) => captures,
        None => return Response::not_found(format!("{} not found", req.uri)),
    };

    let scope_id = match get_param(&captures, "scopeId") {
        Ok(scope_id) => scope_id,
        Err(response) => return response,
    };

    if scope_id != context.options.id_scope {
        return Response::not_found(format!("scope {} not found", scope_id));
    }

    let registration_id = match get_param(&captures, "registrationId") {
        Ok(registration_id) => registration_id,
        Err(response) => return response,
    };

    let action = match get_param(&captures, "action") {
        Ok(action) => action,
        Err(response) => return response,
    };

    if let Some(captures) = OPERATION_STATUS_REGEX.captures(&action) {
        if req.method != hyper::Method::GET {
            return Response::method_not_allowed(&req.method);
        }

        let operation_id = match get_param(&captures, "operationId") {
            Ok(operation_id) => operation_id,
            Err(response) => return response,
        };

        operation_status(&registration_id, &operation_id, context)
    } else if action == "register" {
        if req.method != hyper::Method::PUT {
            return Response::method_not_allowed(&req.method);
        }

        register(req, &registration_id, context)
    } else {
        Response::not_found(format!("{} not found", action))
    }
}

fn register(req: &ParsedRequest, registration_id: &str, context: &mut Context) -> Response {
    let body: serde_json::Value = match req.body.as_deref().map(serde_json::from_str) {
        Some(Ok(body)) => body,
        Some(Err(_)) => return Response::bad_request("failed to parse register body"),
        None => return Response::bad_request("missing required body for register"),
    };

    if body["registrationId"] != registration_id {
        return Response::bad_request("registration IDs in URI and request mismatch");
    }

    let sas_token = req.headers.get("authorization");

    // TPM registrations without a token are asking for the authentication key.
    if body.get("tpm").is_some() && sas_token.is_none() {
        let authentication_key =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, TPM_AUTH_KEY);

        return Response::json(
            hyper::StatusCode::UNAUTHORIZED,
            None,
            &serde_json::json!({ "authenticationKey": authentication_key }),
        );
    }

    let authorized = sas_token.map_or(false, |sas_token| {
        sas_token.starts_with("SharedAccessSignature sr=") && sas_token.ends_with("&skn=")
    });

    if context.options.require_sas_token && !authorized {
        return Response::service_error(
            hyper::StatusCode::UNAUTHORIZED,
            401_002,
            "Unauthorized",
        );
    }

    let operation_id = uuid::Uuid::new_v4().hyphenated().to_string();
    context.in_progress_operations.insert(
        operation_id.clone(),
        (registration_id.to_string(), context.options.assigning_polls),
    );

    Response::json(
        hyper::StatusCode::ACCEPTED,
        context.options.retry_after_sec,
        &serde_json::json!({ "operationId": operation_id, "status": "assigning" }),
    )
}

fn operation_status(registration_id: &str, operation_id: &str, context: &mut Context) -> Response {
    let retry_after_sec = context.options.retry_after_sec;

    let polls_left = match context.in_progress_operations.get_mut(operation_id) {
        Some((expected, polls_left)) if expected.as_str() == registration_id => polls_left,
        _ => return Response::not_found(format!("operation {} not found", operation_id)),
    };

    if *polls_left > 0 {
        *polls_left -= 1;

        return Response::json(
            hyper::StatusCode::ACCEPTED,
            retry_after_sec,
            &serde_json::json!({ "operationId": operation_id, "status": "assigning" }),
        );
    }

    context.in_progress_operations.remove(operation_id);

    Response::json(
        hyper::StatusCode::OK,
        None,
        &serde_json::json!({
            "operationId": operation_id,
            "status": "assigned",
            "registrationState": {
                "registrationId": registration_id,
                "assignedHub": ASSIGNED_HUB,
                "deviceId": registration_id,
                "status": "assigned",
                "substatus": "initialAssignment",
            },
        }),
    )
}

fn get_param(captures: &regex::Captures<'_>, name: &str) -> Result<String, Response> {
    let value = &captures[name];

    let value = percent_encoding::percent_decode_str(value)
        .decode_utf8()
        .map_err(|_| Response::bad_request(format!("bad {}", name)))?
        .to_string();

    Ok(value)
}
