//! Outbound HTTP dispatch for the Wire API.
//!
//! Every authenticated call goes through [`WireTransport::request`], which
//! builds the URL, injects the bearer token and optional refresh cookie, and
//! folds every failure into an [`ApiError`]:
//!
//! - unsupported methods are rejected before any network call
//! - a status of 400 or above becomes `Bad credentials` (status and body are dropped)
//! - transport failures are logged at warning level and returned as values

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, USER_AGENT};
use reqwest::{Client, Method, Response};
use serde_json::{Map, Value};

use crate::CoreError;
use crate::error::{ApiError, ApiResult};
use crate::wire::models::{ApiRequest, ApiResponse, RawBody, Session};

/// User agent sent with every request unless configured otherwise.
pub const DEFAULT_USER_AGENT: &str = concat!("wirelink/", env!("CARGO_PKG_VERSION"));

/// HTTP client bound to a user agent and timeout.
#[derive(Debug, Clone)]
pub struct WireTransport {
    http: Client,
    user_agent: String,
}

impl WireTransport {
    /// Create a transport with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if HTTP client creation fails.
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> Result<Self, CoreError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Other(format!("creating HTTP client: {e}")))?;

        Ok(Self {
            http,
            user_agent: user_agent.into(),
        })
    }

    /// Underlying HTTP client, for the unauthenticated login and refresh calls.
    #[must_use]
    pub const fn http(&self) -> &Client {
        &self.http
    }

    /// User agent sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Dispatch `req` against `session.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `BadMethod` for methods other than GET/POST/PUT/DELETE,
    /// `BadCredentials` for any status of 400 or above, `InvalidResponse` when
    /// a JSON body cannot be decoded and `Transport` for network failures.
    pub async fn request(&self, session: &Session, req: &ApiRequest) -> ApiResult<ApiResponse> {
        if !is_supported_method(&req.method) {
            return Err(ApiError::BadMethod);
        }

        let mut url = format!("{}/{}", session.base_url, req.endpoint);
        if req.method == Method::GET && !req.params.is_empty() {
            url.push('?');
            url.push_str(&encode_query(&req.params));
        }

        let mut builder = self
            .http
            .request(req.method.clone(), &url)
            .header(AUTHORIZATION, format!("Bearer {}", session.access_token))
            .header(CONTENT_TYPE, req.content_type.as_str())
            .header(USER_AGENT, self.user_agent.as_str());

        if req.use_cookie {
            builder = builder.header(COOKIE, format!("zuid={}", session.refresh_cookie));
        }

        if req.method != Method::GET {
            if let Some(ref body) = req.raw_body {
                builder = builder.body(body.clone());
            } else if !req.params.is_empty() {
                builder = builder.body(Value::Object(req.params.clone()).to_string());
            }
        }

        log::debug!("{} {url}", req.method);

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Wire API error: {e}");
                return Err(ApiError::Transport(e.to_string()));
            }
        };

        read_response(response, req.expect_json).await
    }
}

fn is_supported_method(method: &Method) -> bool {
    [Method::GET, Method::POST, Method::PUT, Method::DELETE].contains(method)
}

async fn read_response(response: Response, expect_json: bool) -> ApiResult<ApiResponse> {
    let status = response.status();
    if status.as_u16() >= 400 {
        log::debug!("Wire API answered {status}");
        return Err(ApiError::BadCredentials);
    }

    let headers = collect_headers(response.headers());
    let body = response.bytes().await.map_err(|e| {
        log::warn!("Wire API error while reading body: {e}");
        ApiError::Transport(e.to_string())
    })?;

    if !expect_json {
        return Ok(ApiResponse::Raw(RawBody {
            body: body.to_vec(),
            headers,
        }));
    }

    if body.is_empty() {
        return Ok(ApiResponse::Json(Value::Null));
    }

    serde_json::from_slice(&body).map(ApiResponse::Json).map_err(|e| {
        log::warn!("undecodable Wire API response: {e}");
        ApiError::InvalidResponse
    })
}

/// Collect response headers by lower-cased name.
pub(crate) fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut collected: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        collected
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    collected
}

/// Encode GET parameters.
///
/// Array values are expanded first as repeated `key[]=value` pairs. The
/// remaining parameters follow in form encoding: booleans as `1`/`0`, nulls
/// skipped, one level of object nesting as `key[sub]=value`.
#[must_use]
pub fn encode_query(params: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();

    for (key, value) in params {
        if let Value::Array(items) = value {
            for item in items {
                let text = form_scalar(item).unwrap_or_default();
                pairs.push(format!("{key}[]={}", urlencoding::encode(&text)));
            }
        }
    }

    for (key, value) in params {
        match value {
            Value::Array(_) => {}
            Value::Object(fields) => {
                for (sub, field) in fields {
                    if let Some(text) = form_scalar(field) {
                        let name = format!("{key}[{sub}]");
                        pairs.push(format!(
                            "{}={}",
                            urlencoding::encode(&name),
                            urlencoding::encode(&text)
                        ));
                    }
                }
            }
            other => {
                if let Some(text) = form_scalar(other) {
                    pairs.push(format!(
                        "{}={}",
                        urlencoding::encode(key),
                        urlencoding::encode(&text)
                    ));
                }
            }
        }
    }

    pairs.join("&")
}

fn form_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some((if *flag { "1" } else { "0" }).to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> WireTransport {
        WireTransport::new(Duration::from_secs(5), DEFAULT_USER_AGENT).unwrap()
    }

    fn session(base_url: &str) -> Session {
        Session {
            base_url: base_url.to_string(),
            access_token: "tok-1".to_string(),
            refresh_cookie: "cookie-1".to_string(),
            ..Session::default()
        }
    }

    fn pairs(query: &str) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| {
                (
                    urlencoding::decode(k).unwrap().into_owned(),
                    urlencoding::decode(v).unwrap().into_owned(),
                )
            })
            .collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn array_params_expand_before_scalars() {
        let params = json!({ "tags": ["a", "b"], "limit": 10 });
        let query = encode_query(params.as_object().unwrap());

        assert!(query.starts_with("tags[]=a&tags[]=b"));

        let mut expected = vec![
            ("tags[]".to_string(), "a".to_string()),
            ("tags[]".to_string(), "b".to_string()),
            ("limit".to_string(), "10".to_string()),
        ];
        expected.sort();
        assert_eq!(pairs(&query), expected);
    }

    #[test]
    fn scalar_params_use_form_encoding() {
        let params = json!({
            "q": "a b&c",
            "persist": true,
            "skip": null,
            "filter": { "type": "image" }
        });
        let query = encode_query(params.as_object().unwrap());
        let mut expected = vec![
            ("q".to_string(), "a b&c".to_string()),
            ("persist".to_string(), "1".to_string()),
            ("filter[type]".to_string(), "image".to_string()),
        ];
        expected.sort();
        assert_eq!(pairs(&query), expected);
    }

    #[tokio::test]
    async fn get_injects_auth_headers_and_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .and(header("authorization", "Bearer tok-1"))
            .and(header("user-agent", DEFAULT_USER_AGENT))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "conversations": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport()
            .request(&session(&server.uri()), &ApiRequest::get("conversations"))
            .await
            .unwrap();

        assert_eq!(response, ApiResponse::Json(json!({ "conversations": [] })));
    }

    #[tokio::test]
    async fn get_params_land_in_the_query_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let req = ApiRequest::get("search")
            .param("tags", json!(["a", "b"]))
            .param("limit", 10);
        transport()
            .request(&session(&server.uri()), &req)
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let mut query: Vec<(String, String)> = received[0]
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        query.sort();
        assert_eq!(
            query,
            vec![
                ("limit".to_string(), "10".to_string()),
                ("tags[]".to_string(), "a".to_string()),
                ("tags[]".to_string(), "b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn cookie_is_sent_only_when_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/self"))
            .and(header("cookie", "zuid=cookie-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "me" })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let transport = transport();
        let session = session(&server.uri());
        let with_cookie = transport
            .request(&session, &ApiRequest::get("self").with_cookie())
            .await;
        assert!(with_cookie.is_ok());
        let without_cookie = transport.request(&session, &ApiRequest::get("plain")).await;
        assert!(without_cookie.is_ok());

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("cookie").is_some());
        assert!(received[1].headers.get("cookie").is_none());
    }

    #[tokio::test]
    async fn post_sends_params_as_json_and_prefers_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/with-params"))
            .and(body_json(json!({ "name": "report" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/with-raw"))
            .and(body_string("raw payload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport();
        let session = session(&server.uri());

        let created = transport
            .request(&session, &ApiRequest::post("with-params").param("name", "report"))
            .await
            .unwrap();
        assert_eq!(created, ApiResponse::Json(json!({ "ok": true })));

        let req = ApiRequest::new(Method::PUT, "with-raw")
            .param("ignored", true)
            .body("raw payload");
        let updated = transport.request(&session, &req).await.unwrap();
        assert_eq!(updated, ApiResponse::Json(Value::Null));
    }

    #[tokio::test]
    async fn error_statuses_collapse_into_bad_credentials() {
        let server = MockServer::start().await;
        for (status, route) in [(400, "/a"), (401, "/b"), (404, "/c"), (500, "/d"), (599, "/e")] {
            Mock::given(path(route))
                .respond_with(
                    ResponseTemplate::new(status)
                        .set_body_json(json!({ "code": status, "label": "server-error" })),
                )
                .mount(&server)
                .await;
        }

        let transport = transport();
        let session = session(&server.uri());
        for endpoint in ["a", "b", "c", "d", "e"] {
            let err = transport
                .request(&session, &ApiRequest::get(endpoint))
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::BadCredentials));
            assert_eq!(err.message(), "Bad credentials");
        }
    }

    #[tokio::test]
    async fn unsupported_method_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(path("/conversations"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let req = ApiRequest::new(Method::PATCH, "conversations");
        let err = transport()
            .request(&session(&server.uri()), &req)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::BadMethod));
        assert_eq!(err.message(), "Bad HTTP method");
    }

    #[tokio::test]
    async fn raw_responses_carry_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/wire.com/3-1-abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
            )
            .mount(&server)
            .await;

        let raw = transport()
            .request(
                &session(&server.uri()),
                &ApiRequest::get("assets/wire.com/3-1-abc").raw(),
            )
            .await
            .unwrap()
            .into_raw()
            .unwrap();

        assert_eq!(raw.body, vec![0x89, b'P', b'N', b'G']);
        assert_eq!(raw.header("Content-Type"), Some("image/png"));
    }

    #[tokio::test]
    async fn undecodable_json_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(path("/teams"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = transport()
            .request(&session(&server.uri()), &ApiRequest::get("teams"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse));
    }

    #[tokio::test]
    async fn transport_failures_are_returned_as_values() {
        let err = transport()
            .request(&session("http://127.0.0.1:1"), &ApiRequest::get("conversations"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(!err.message().is_empty());
    }
}
