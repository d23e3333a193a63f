//! Just enough HTTP/1.0 over monoio to talk to the canvas service.
//!
//! Every request opens its own connection, asks the server to close it, and
//! reads the response to EOF, so there is no chunked decoding or connection
//! reuse to worry about.

use crate::canvas::{
    Absolute, ApiError, AuthError, Authorizer, CanvasApi, Credentials, PixelState, WriteReceipt,
};
use monoio::{
    io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt},
    net::TcpStream,
};
use placer_common::PaletteCode;
use serde::Deserialize;
use std::{io, str::FromStr, time::Duration};
use thiserror::Error;

const READ_CHUNK: usize = 8 * 1024;
const MAX_RESPONSE: usize = 1024 * 1024;

macro_rules! attempt {
    ($io:expr) => {{
        let (result, buf) = { $io };
        result?;
        buf
    }};
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum EndpointError {
    #[error("unsupported scheme `{0}`, only plain http:// endpoints are supported")]
    UnsupportedScheme(String),
    #[error("endpoint has no host")]
    MissingHost,
    #[error("invalid port `{0}`")]
    BadPort(String),
}

/// `http://host[:port][/base/path]`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    host: String,
    port: u16,
    base_path: String,
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.split_once("://") {
            Some(("http", rest)) => rest,
            Some((scheme, _)) => return Err(EndpointError::UnsupportedScheme(scheme.into())),
            None => s,
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .map_err(|_| EndpointError::BadPort(port.into()))?,
            ),
            None => (authority, 80),
        };

        if host.is_empty() {
            return Err(EndpointError::MissingHost);
        }

        Ok(Self {
            host: host.into(),
            port,
            base_path: path.trim_end_matches('/').into(),
        })
    }
}

impl Endpoint {
    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// `application/x-www-form-urlencoded` body.
pub fn form(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(name, value)| format!("{}={}", encode_component(name), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Clone, Debug)]
pub struct Request {
    method: &'static str,
    path: String,
    headers: Vec<(&'static str, String)>,
    form: Option<String>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET",
            path: path.into(),
            headers: Vec::new(),
            form: None,
        }
    }

    pub fn post(path: impl Into<String>, form: String) -> Self {
        Self {
            method: "POST",
            path: path.into(),
            headers: Vec::new(),
            form: Some(form),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn encode(&self, endpoint: &Endpoint, user_agent: &str) -> Vec<u8> {
        let mut head = format!(
            "{} {}{} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: close\r\n",
            self.method,
            endpoint.base_path,
            self.path,
            endpoint.host_header(),
            user_agent,
        );

        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }

        match &self.form {
            Some(form) => {
                head.push_str("Content-Type: application/x-www-form-urlencoded\r\n");
                head.push_str(&format!("Content-Length: {}\r\n\r\n", form.len()));
                head.push_str(form);
            }
            None => head.push_str("\r\n"),
        }

        head.into_bytes()
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn parse(raw: &[u8]) -> Result<Self, String> {
        let split = raw
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .ok_or("response ended before the headers did")?;

        let head = std::str::from_utf8(&raw[..split]).map_err(|_| "response head is not utf-8")?;
        let mut lines = head.split("\r\n");

        let status = lines
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| format!("bad status line in {head:?}"))?;

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
            .collect();

        Ok(Self {
            status,
            headers,
            body: raw[split + 4..].to_vec(),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `Cookie` header value built from every `Set-Cookie`.
    pub fn cookies(&self) -> Option<String> {
        let cookies: Vec<&str> = self
            .header_values("set-cookie")
            .filter_map(|value| value.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect();

        (!cookies.is_empty()).then(|| cookies.join("; "))
    }

    fn describe(&self) -> String {
        let body = String::from_utf8_lossy(&self.body);
        let preview: String = body.chars().take(120).collect();
        format!("status {}: {}", self.status, preview.trim())
    }
}

async fn exchange(endpoint: &Endpoint, request: Vec<u8>) -> io::Result<Vec<u8>> {
    let mut conn = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    conn.set_nodelay(true)?;

    attempt!(conn.write_all(request).await);
    conn.flush().await?;

    let mut raw = Vec::new();
    let mut chunk = Vec::with_capacity(READ_CHUNK);
    loop {
        let (result, buf) = conn.read(chunk).await;
        let read = result?;
        if read == 0 {
            break;
        }

        raw.extend_from_slice(&buf[..read]);
        if raw.len() > MAX_RESPONSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("response exceeds {MAX_RESPONSE} bytes"),
            ));
        }

        chunk = buf;
        chunk.clear();
    }

    Ok(raw)
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    endpoint: Endpoint,
    user_agent: String,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(endpoint: Endpoint, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint,
            user_agent: user_agent.into(),
            timeout,
        }
    }

    /// Errors are transport failures, described for the log.
    pub async fn send(&self, request: Request) -> Result<Response, String> {
        let bytes = request.encode(&self.endpoint, &self.user_agent);

        let raw = monoio::time::timeout(self.timeout, exchange(&self.endpoint, bytes))
            .await
            .map_err(|_| format!("no response within {:?}", self.timeout))?
            .map_err(|error| error.to_string())?;

        Response::parse(&raw)
    }
}

#[derive(Deserialize)]
struct PixelBody {
    color: Option<PaletteCode>,
    user_name: Option<String>,
}

#[derive(Deserialize)]
struct DrawBody {
    wait_seconds: f64,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LoginBody {
    json: LoginJson,
}

#[derive(Deserialize)]
struct LoginJson {
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    data: Option<LoginData>,
}

#[derive(Deserialize)]
struct LoginData {
    modhash: Option<String>,
}

#[derive(Clone, Debug)]
pub struct HttpAuthorizer {
    client: HttpClient,
}

impl HttpAuthorizer {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl Authorizer for HttpAuthorizer {
    type Session = HttpSession;

    async fn authorize(&self, credentials: &Credentials) -> Result<HttpSession, AuthError> {
        let path = format!("/api/login/{}", encode_component(&credentials.username));
        let body = form(&[
            ("user", credentials.username.as_str()),
            ("passwd", credentials.password.as_str()),
            ("api_type", "json"),
        ]);

        let response = self
            .client
            .send(Request::post(path, body))
            .await
            .map_err(AuthError::Transient)?;

        match response.status {
            401 | 403 => return Err(AuthError::BadCredentials(response.describe())),
            _ if !response.is_success() => return Err(AuthError::Transient(response.describe())),
            _ => {}
        }

        let login: LoginBody = serde_json::from_slice(&response.body)
            .map_err(|error| AuthError::Malformed(error.to_string()))?;

        let Some(modhash) = login.json.data.and_then(|data| data.modhash) else {
            let reason = if login.json.errors.is_empty() {
                "no session in response".to_owned()
            } else {
                serde_json::Value::Array(login.json.errors).to_string()
            };
            return Err(AuthError::BadCredentials(reason));
        };

        Ok(HttpSession {
            client: self.client.clone(),
            modhash,
            cookie: response.cookies(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct HttpSession {
    client: HttpClient,
    modhash: String,
    cookie: Option<String>,
}

impl HttpSession {
    fn authorized(&self, request: Request) -> Request {
        let request = request.header("X-Modhash", self.modhash.as_str());
        match &self.cookie {
            Some(cookie) => request.header("Cookie", cookie.as_str()),
            None => request,
        }
    }
}

impl CanvasApi for HttpSession {
    async fn probe(&self, at: Absolute) -> Result<PixelState, ApiError> {
        let (mut x, mut y) = (itoa::Buffer::new(), itoa::Buffer::new());
        let path = format!(
            "/api/place/pixel.json?x={}&y={}",
            x.format(at.x),
            y.format(at.y)
        );

        let response = self
            .client
            .send(self.authorized(Request::get(path)))
            .await
            .map_err(ApiError::Transient)?;

        if response.status != 200 {
            return Err(ApiError::Transient(response.describe()));
        }

        let body: PixelBody = serde_json::from_slice(&response.body)
            .map_err(|error| ApiError::Malformed(error.to_string()))?;

        Ok(PixelState {
            color: body.color.unwrap_or(0),
            owner: body.user_name,
        })
    }

    async fn place(&self, at: Absolute, code: PaletteCode) -> Result<WriteReceipt, ApiError> {
        let (mut x, mut y, mut color) = (itoa::Buffer::new(), itoa::Buffer::new(), itoa::Buffer::new());
        let body = form(&[
            ("x", x.format(at.x)),
            ("y", y.format(at.y)),
            ("color", color.format(code)),
        ]);

        let response = self
            .client
            .send(self.authorized(Request::post("/api/place/draw.json", body)))
            .await
            .map_err(ApiError::Transient)?;

        match serde_json::from_slice::<DrawBody>(&response.body) {
            Ok(draw) => {
                let wait = Duration::try_from_secs_f64(draw.wait_seconds).map_err(|_| {
                    ApiError::Malformed(format!("wait_seconds = {}", draw.wait_seconds))
                })?;

                // an error status carrying a wait is a rejection, even without the marker
                Ok(WriteReceipt {
                    wait,
                    rejected: draw.error.is_some() || !response.is_success(),
                })
            }
            Err(error) if response.is_success() => Err(ApiError::Malformed(error.to_string())),
            Err(_) => Err(ApiError::Transient(response.describe())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::block_on;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread::{self, JoinHandle},
    };

    /// Accept one connection, answer with `response`, hand back the request.
    fn serve_once(response: impl Into<String>) -> (Endpoint, JoinHandle<String>) {
        let response = response.into();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0; 1024];

            loop {
                let read = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..read]);

                let text = String::from_utf8_lossy(&request);
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|line| line.strip_prefix("Content-Length: "))
                        .map_or(0, |len| len.parse::<usize>().unwrap());
                    if body.len() >= length {
                        break;
                    }
                }
                if read == 0 {
                    break;
                }
            }

            // the client may hang up before reading everything
            let _ = stream.write_all(response.as_bytes());
            String::from_utf8(request).unwrap()
        });

        let endpoint = format!("http://127.0.0.1:{port}/base").parse().unwrap();
        (endpoint, handle)
    }

    fn session(endpoint: Endpoint) -> HttpSession {
        HttpSession {
            client: HttpClient::new(endpoint, "test-agent", Duration::from_secs(5)),
            modhash: "hash".into(),
            cookie: Some("session=abc".into()),
        }
    }

    #[test]
    fn endpoint_parsing() {
        let endpoint: Endpoint = "http://localhost:8080/prefix/".parse().unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 8080);
        assert_eq!(endpoint.base_path, "/prefix");

        let endpoint: Endpoint = "www.reddit.com".parse().unwrap();
        assert_eq!((endpoint.port, endpoint.base_path.as_str()), (80, ""));

        assert_eq!(
            "https://www.reddit.com".parse::<Endpoint>(),
            Err(EndpointError::UnsupportedScheme("https".into()))
        );
        assert_eq!("http://:80".parse::<Endpoint>(), Err(EndpointError::MissingHost));
        assert_eq!(
            "http://host:http".parse::<Endpoint>(),
            Err(EndpointError::BadPort("http".into()))
        );
    }

    #[test]
    fn form_encoding() {
        assert_eq!(
            form(&[("user", "a b"), ("passwd", "p&ss=1/ü")]),
            "user=a%20b&passwd=p%26ss%3D1%2F%C3%BC"
        );
    }

    #[test]
    fn request_encoding() {
        let endpoint: Endpoint = "http://example.org:81/api".parse().unwrap();
        let request = Request::post("/draw", "x=1".into()).header("X-Modhash", "m");
        let encoded = String::from_utf8(request.encode(&endpoint, "agent")).unwrap();

        assert_eq!(
            encoded,
            "POST /api/draw HTTP/1.0\r\nHost: example.org:81\r\nUser-Agent: agent\r\n\
             Connection: close\r\nX-Modhash: m\r\n\
             Content-Type: application/x-www-form-urlencoded\r\nContent-Length: 3\r\n\r\nx=1"
        );
    }

    #[test]
    fn response_parsing() {
        let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1; Path=/\r\nset-cookie: b=2\r\n\r\n{\"k\":1}";
        let response = Response::parse(raw).unwrap();

        assert_eq!(response.status, 200);
        assert!(response.is_success());
        assert_eq!(response.body, b"{\"k\":1}");
        assert_eq!(response.cookies().as_deref(), Some("a=1; b=2"));

        assert!(Response::parse(b"HTTP/1.1 200 OK\r\n").is_err());
        assert!(Response::parse(b"garbage\r\n\r\n").is_err());
    }

    #[test]
    fn probe_reads_color_and_owner() {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"color\": 5, \"user_name\": \"bob\"}",
        );

        let state = block_on(session(endpoint).probe(Absolute { x: 10, y: 20 })).unwrap();
        assert_eq!(state, PixelState { color: 5, owner: Some("bob".into()) });

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /base/api/place/pixel.json?x=10&y=20 HTTP/1.0\r\n"));
        assert!(request.contains("X-Modhash: hash\r\n"));
        assert!(request.contains("Cookie: session=abc\r\n"));
    }

    #[test]
    fn probe_defaults_missing_color_to_zero() {
        let (endpoint, server) = serve_once("HTTP/1.1 200 OK\r\n\r\n{}");
        let state = block_on(session(endpoint).probe(Absolute { x: 0, y: 0 })).unwrap();
        assert_eq!(state, PixelState::default());
        server.join().unwrap();
    }

    #[test]
    fn probe_non_200_is_transient() {
        let (endpoint, server) = serve_once("HTTP/1.1 503 Service Unavailable\r\n\r\nbusy");
        let error = block_on(session(endpoint).probe(Absolute { x: 0, y: 0 })).unwrap_err();
        assert!(matches!(error, ApiError::Transient(_)));
        server.join().unwrap();
    }

    #[test]
    fn place_reads_wait_and_error_marker() {
        let (endpoint, server) =
            serve_once("HTTP/1.1 429 Too Many Requests\r\n\r\n{\"wait_seconds\": 290.5, \"error\": 1}");

        let receipt = block_on(session(endpoint).place(Absolute { x: 3, y: 4 }, 12)).unwrap();
        assert_eq!(
            receipt,
            WriteReceipt {
                wait: Duration::from_secs_f64(290.5),
                rejected: true
            }
        );

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /base/api/place/draw.json HTTP/1.0\r\n"));
        assert!(request.ends_with("\r\n\r\nx=3&y=4&color=12"));
    }

    #[test]
    fn place_error_status_with_wait_is_rejected() {
        let (endpoint, server) = serve_once("HTTP/1.1 500 Internal Server Error\r\n\r\n{\"wait_seconds\": 0}");

        let receipt = block_on(session(endpoint).place(Absolute { x: 0, y: 0 }, 1)).unwrap();
        assert_eq!(
            receipt,
            WriteReceipt {
                wait: Duration::ZERO,
                rejected: true
            }
        );
        server.join().unwrap();
    }

    #[test]
    fn place_error_status_without_json_is_transient() {
        let (endpoint, server) = serve_once("HTTP/1.1 502 Bad Gateway\r\n\r\n<html>upstream down</html>");
        let error = block_on(session(endpoint).place(Absolute { x: 0, y: 0 }, 1)).unwrap_err();
        assert!(matches!(error, ApiError::Transient(_)));
        server.join().unwrap();
    }

    #[test]
    fn oversized_response_is_transient() {
        let body = "x".repeat(MAX_RESPONSE + 1);
        let (endpoint, server) = serve_once(format!("HTTP/1.1 200 OK\r\n\r\n{body}"));

        let error = block_on(session(endpoint).probe(Absolute { x: 0, y: 0 })).unwrap_err();
        match error {
            ApiError::Transient(reason) => assert!(reason.contains("exceeds")),
            other => panic!("expected transient, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn place_without_wait_seconds_is_malformed() {
        let (endpoint, server) = serve_once("HTTP/1.1 200 OK\r\n\r\n{\"ok\": true}");
        let error = block_on(session(endpoint).place(Absolute { x: 0, y: 0 }, 1)).unwrap_err();
        assert!(matches!(error, ApiError::Malformed(_)));
        server.join().unwrap();
    }

    #[test]
    fn login_yields_session() {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 200 OK\r\nSet-Cookie: reddit_session=xyz; Domain=reddit.com\r\n\r\n\
             {\"json\": {\"errors\": [], \"data\": {\"modhash\": \"mh\"}}}",
        );
        let authorizer =
            HttpAuthorizer::new(HttpClient::new(endpoint, "agent", Duration::from_secs(5)));

        let session = block_on(authorizer.authorize(&Credentials::new("al ice", "pw"))).unwrap();
        assert_eq!(session.modhash, "mh");
        assert_eq!(session.cookie.as_deref(), Some("reddit_session=xyz"));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /base/api/login/al%20ice HTTP/1.0\r\n"));
        assert!(request.ends_with("user=al%20ice&passwd=pw&api_type=json"));
    }

    #[test]
    fn login_without_modhash_is_bad_credentials() {
        let (endpoint, server) = serve_once(
            "HTTP/1.1 200 OK\r\n\r\n{\"json\": {\"errors\": [[\"WRONG_PASSWORD\", \"wrong password\", \"passwd\"]]}}",
        );
        let authorizer =
            HttpAuthorizer::new(HttpClient::new(endpoint, "agent", Duration::from_secs(5)));

        let error = block_on(authorizer.authorize(&Credentials::new("alice", "nope"))).unwrap_err();
        match error {
            AuthError::BadCredentials(reason) => assert!(reason.contains("WRONG_PASSWORD")),
            other => panic!("expected bad credentials, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn login_server_error_is_transient() {
        let (endpoint, server) = serve_once("HTTP/1.1 502 Bad Gateway\r\n\r\n<html></html>");
        let authorizer =
            HttpAuthorizer::new(HttpClient::new(endpoint, "agent", Duration::from_secs(5)));

        let error = block_on(authorizer.authorize(&Credentials::new("alice", "pw"))).unwrap_err();
        assert!(matches!(error, AuthError::Transient(_)));
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_transient() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = format!("http://127.0.0.1:{port}").parse().unwrap();

        let error = block_on(session(endpoint).probe(Absolute { x: 0, y: 0 })).unwrap_err();
        assert!(matches!(error, ApiError::Transient(_)));
    }
}
