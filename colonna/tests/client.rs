//! End to end scenarios against an in-process stub server.
//!
//! The stub speaks just enough of the wire contract to exercise the
//! client: query bodies (plain, compressed, multipart), sessions, the
//! ping endpoint, summary headers and embedded error markers.
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use colonna::{
    Backend, Client, Config, ExternalTable, Format, HealthCheck, Manager,
    compress::{Compressor, Decompressor, Method},
};

// ===== row binary writer =====

fn varuint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    varuint(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

fn header(buf: &mut BytesMut, columns: &[(&str, &str)]) {
    varuint(buf, columns.len() as u64);
    for (name, _) in columns {
        put_string(buf, name);
    }
    for (_, ty) in columns {
        put_string(buf, ty);
    }
}

fn int_pair_body(rows: &[(i32, i32)]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    header(&mut buf, &[("a", "Int32"), ("b", "Int32")]);
    for (a, b) in rows {
        buf.put_i32_le(*a);
        buf.put_i32_le(*b);
    }
    buf.to_vec()
}

// ===== stub server =====

#[derive(Default)]
struct State {
    connections: usize,
    requests: usize,
    /// session id -> temporary table names
    sessions: HashMap<String, Vec<String>>,
}

#[derive(Clone)]
struct Stub {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl Stub {
    async fn start() -> Stub {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                accept_state.lock().unwrap().connections += 1;
                let state = accept_state.clone();
                tokio::spawn(serve(stream, state));
            }
        });

        Stub { addr, state }
    }

    fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    fn requests(&self) -> usize {
        self.state.lock().unwrap().requests
    }

    fn sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }
}

struct Req {
    method: String,
    path: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Req {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn read_request(stream: &mut TcpStream, buf: &mut BytesMut) -> Option<Req> {
    let head_end = loop {
        if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break i;
        }
        if stream.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    };

    let head = buf.split_to(head_end + 4);
    let head = String::from_utf8(head.to_vec()).ok()?;
    let mut lines = head.split("\r\n");
    let status = lines.next()?;
    let mut it = status.split(' ');
    let method = it.next()?.to_string();
    let target = it.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (n, v) = line.split_once(':')?;
            Some((n.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target, String::new()),
    };
    let params = query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .filter_map(|kv| {
            let (n, v) = kv.split_once('=')?;
            Some((percent_decode(n), percent_decode(v)))
        })
        .collect();

    let mut req = Req { method, path, params, headers, body: Vec::new() };

    if let Some(len) = req.header("content-length") {
        let len: usize = len.parse().ok()?;
        while buf.len() < len {
            if stream.read_buf(buf).await.ok()? == 0 {
                return None;
            }
        }
        req.body = buf.split_to(len).to_vec();
    } else if req.header("transfer-encoding") == Some("chunked") {
        loop {
            let line_end = loop {
                if let Some(i) = buf.windows(2).position(|w| w == b"\r\n") {
                    break i;
                }
                if stream.read_buf(buf).await.ok()? == 0 {
                    return None;
                }
            };
            let size_line = buf.split_to(line_end + 2);
            let size = usize::from_str_radix(
                std::str::from_utf8(&size_line[..line_end]).ok()?.trim(),
                16,
            )
            .ok()?;
            while buf.len() < size + 2 {
                if stream.read_buf(buf).await.ok()? == 0 {
                    return None;
                }
            }
            req.body.extend_from_slice(&buf.split_to(size));
            buf.advance(2);
            if size == 0 {
                break;
            }
        }
    }

    Some(req)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 3;
                    },
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    },
                }
            },
            b => {
                out.push(b);
                i += 1;
            },
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn http_response(status: u16, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
    let reason = if status == 200 { "OK" } else { "Error" };
    let mut out = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\n", body.len());
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

fn server_error(code: i32, message: &str) -> Vec<u8> {
    let body = format!("Code: {code}. DB::Exception: {message}");
    http_response(
        500,
        &[("X-Columnar-Exception-Code", code.to_string())],
        body.as_bytes(),
    )
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<State>>) {
    let mut buf = BytesMut::new();
    while let Some(req) = read_request(&mut stream, &mut buf).await {
        state.lock().unwrap().requests += 1;
        let response = handle(req, &state);
        if stream.write_all(&response).await.is_err() {
            return;
        }
    }
}

fn handle(req: Req, state: &Arc<Mutex<State>>) -> Vec<u8> {
    if req.method == "GET" {
        return match req.path.as_str() {
            "/ping" => http_response(200, &[], b"Ok."),
            _ => http_response(404, &[], b"not found"),
        };
    }

    // decode the request body into query text and external parts
    let body = match req.header("content-encoding") {
        Some(name) => {
            let method = Method::parse(name).expect("stub knows every method");
            decompress_all(method, &req.body)
        },
        None => req.body.clone(),
    };

    let (query, parts) = match req.header("content-type") {
        Some(ct) if ct.starts_with("multipart/form-data") => {
            let boundary = ct.split("boundary=").nth(1).expect("boundary").to_string();
            let parts = parse_multipart(&body, &boundary);
            let query = parts
                .iter()
                .find(|p| p.name == "query")
                .map(|p| String::from_utf8_lossy(&p.content).into_owned())
                .unwrap_or_default();
            (query, parts)
        },
        _ => (String::from_utf8_lossy(&body).into_owned(), Vec::new()),
    };

    let payload = route(&req, query.trim(), parts, state);

    // response compression negotiated via headers
    match (req.header("accept-encoding"), payload) {
        (Some(name), Payload::Ok(headers, body)) => {
            let method = Method::parse(name).expect("stub knows every method");
            let mut compressed = compress_all(method, &body);
            let mut headers = headers;
            if method != Method::None {
                headers.push(("Content-Encoding".to_string(), name.to_string()));
            } else {
                compressed = body;
            }
            let headers: Vec<(&str, String)> =
                headers.iter().map(|(n, v)| (n.as_str(), v.clone())).collect();
            http_response(200, &headers, &compressed)
        },
        (None, Payload::Ok(headers, body)) => {
            let headers: Vec<(&str, String)> =
                headers.iter().map(|(n, v)| (n.as_str(), v.clone())).collect();
            http_response(200, &headers, &body)
        },
        (_, Payload::Raw(raw)) => raw,
    }
}

enum Payload {
    /// 200 with extra headers and an uncompressed body.
    Ok(Vec<(String, String)>, Vec<u8>),
    /// Fully rendered response, no compression applied.
    Raw(Vec<u8>),
}

fn route(req: &Req, query: &str, parts: Vec<MultipartPart>, state: &Arc<Mutex<State>>) -> Payload {
    let session = req.param("session_id").map(str::to_string);

    // session_check demands the session already exists
    if let Some(id) = &session {
        let known = state.lock().unwrap().sessions.contains_key(id);
        if req.param("session_check") == Some("1") && !known {
            return Payload::Raw(server_error(372, "Session not found"));
        }
        state.lock().unwrap().sessions.entry(id.clone()).or_default();
    }

    if query == "select 1,2" {
        return Payload::Ok(Vec::new(), int_pair_body(&[(1, 2)]));
    }
    if query == "select 3,4" {
        return Payload::Ok(Vec::new(), int_pair_body(&[(3, 4)]));
    }
    if query == "SELECT 1" {
        return Payload::Ok(Vec::new(), b"1\n".to_vec());
    }
    if query == "select currentUser()" {
        let user = req
            .header("authorization")
            .and_then(|v| v.strip_prefix("Basic "))
            .and_then(|token| base64::engine::general_purpose::STANDARD.decode(token).ok())
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|cred| cred.split(':').next().map(str::to_string))
            .unwrap_or_default();
        let mut buf = BytesMut::new();
        header(&mut buf, &[("user", "String")]);
        put_string(&mut buf, &user);
        return Payload::Ok(Vec::new(), buf.to_vec());
    }
    if let Some(rest) = query.strip_prefix("create temporary table ") {
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let Some(id) = session else {
            return Payload::Raw(server_error(113, "temporary table outside a session"));
        };
        state.lock().unwrap().sessions.get_mut(&id).expect("created above").push(name);
        return Payload::Ok(Vec::new(), Vec::new());
    }
    if let Some(rest) = query.strip_prefix("select * from ") {
        let table = rest.trim();
        let known = session
            .as_ref()
            .and_then(|id| state.lock().unwrap().sessions.get(id).cloned())
            .is_some_and(|tables| tables.iter().any(|t| t == table));
        if !known {
            return Payload::Raw(server_error(60, "Table does not exist"));
        }
        let mut buf = BytesMut::new();
        header(&mut buf, &[("a", "String")]);
        put_string(&mut buf, "1");
        return Payload::Ok(Vec::new(), buf.to_vec());
    }
    if query.contains("inner join") {
        return Payload::Ok(Vec::new(), join_tables(req, parts));
    }
    if query.starts_with("insert into") {
        let summary =
            r#"{"read_rows":"1","read_bytes":"8","written_rows":"1","written_bytes":"8","total_rows_to_read":"0","elapsed_ns":"1000"}"#;
        return Payload::Ok(
            vec![("X-Columnar-Summary".to_string(), summary.to_string())],
            Vec::new(),
        );
    }
    if query == "select boom" {
        let mut body = int_pair_body(&[(1, 2)]);
        body.extend_from_slice(b"\nCode: 395. DB::Exception: boom mid stream");
        return Payload::Ok(Vec::new(), body);
    }
    if query == "select seq" {
        let off: i32 = req.param("param_off").and_then(|v| v.parse().ok()).unwrap_or(0);
        let rows: Vec<(i32, i32)> = (0..64).map(|i| (off, off + i)).collect();
        return Payload::Ok(Vec::new(), int_pair_body(&rows));
    }

    Payload::Ok(Vec::new(), Vec::new())
}

struct MultipartPart {
    name: String,
    headers: Vec<(String, String)>,
    content: Vec<u8>,
}

fn parse_multipart(body: &[u8], boundary: &str) -> Vec<MultipartPart> {
    let sep = format!("--{boundary}");
    let mut parts = Vec::new();

    let mut rest = body;
    loop {
        let Some(start) = find(rest, sep.as_bytes()) else { break };
        rest = &rest[start + sep.len()..];
        if rest.starts_with(b"--") {
            break;
        }
        let rest2 = &rest[2..]; // CRLF after the boundary
        let Some(head_end) = find(rest2, b"\r\n\r\n") else { break };
        let head = String::from_utf8_lossy(&rest2[..head_end]).into_owned();
        let content_start = head_end + 4;
        let Some(content_end) = find(&rest2[content_start..], sep.as_bytes()) else { break };
        // strip the CRLF that terminates the part body
        let content = rest2[content_start..content_start + content_end - 2].to_vec();

        let name = head
            .split("name=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap_or_default()
            .to_string();
        let headers = head
            .split("\r\n")
            .skip(1)
            .filter_map(|line| {
                let (n, v) = line.split_once(':')?;
                Some((n.trim().to_string(), v.trim().to_string()))
            })
            .collect();

        parts.push(MultipartPart { name, headers, content });
        rest = &rest2[content_start + content_end..];
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decompress_all(method: Method, data: &[u8]) -> Vec<u8> {
    let mut dec = Decompressor::new(method).unwrap();
    let mut out = Vec::new();
    out.extend_from_slice(&dec.feed(data).unwrap());
    out.extend_from_slice(&dec.finish().unwrap());
    out
}

fn compress_all(method: Method, data: &[u8]) -> Vec<u8> {
    let mut comp = Compressor::new(method, -1).unwrap();
    let mut out = Vec::new();
    out.extend_from_slice(&comp.write(data).unwrap());
    out.extend_from_slice(&comp.finish().unwrap());
    out
}

/// Join the uploaded external tables on their int column, returning the
/// matching rows of `x`.
fn join_tables(_req: &Req, parts: Vec<MultipartPart>) -> Vec<u8> {
    let mut x_rows: Vec<(i32, String)> = Vec::new();
    let mut y_keys: Vec<i32> = Vec::new();

    for part in parts {
        let encoding = part
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-encoding"))
            .map(|(_, v)| v.as_str());
        let content = match encoding {
            Some(name) => decompress_all(Method::parse(name).unwrap(), &part.content),
            None => part.content.clone(),
        };
        let text = String::from_utf8(content).unwrap();

        match part.name.as_str() {
            "x" => {
                // csv, columns (i Int32, s String)
                for line in text.lines().filter(|l| !l.is_empty()) {
                    let mut fields = line.split(',');
                    let i = fields.next().unwrap().parse().unwrap();
                    let s = fields.next().unwrap_or("").to_string();
                    x_rows.push((i, s));
                }
            },
            "y" => {
                // tsv, columns (s String, i Int32)
                for line in text.lines().filter(|l| !l.is_empty()) {
                    let mut fields = line.split('\t');
                    let _s = fields.next();
                    y_keys.push(fields.next().unwrap().parse().unwrap());
                }
            },
            _ => {},
        }
    }

    let mut buf = BytesMut::new();
    header(&mut buf, &[("i", "Int32"), ("s", "String")]);
    for (i, s) in x_rows.iter().filter(|(i, _)| y_keys.contains(i)) {
        buf.put_i32_le(*i);
        put_string(&mut buf, s);
    }
    buf.to_vec()
}

// ===== scenarios =====

fn client(stub: &Stub, backend: Backend) -> Client {
    Client::new(Config::parse(&stub.url()).unwrap().backend(backend)).unwrap()
}

async fn select_one_two(client: &Client) {
    let mut resp = client
        .request("select 1,2")
        .format(Format::RowBinaryWithNamesAndTypes)
        .execute()
        .await
        .unwrap();

    let mut count = 0;
    while let Some(record) = resp.next_record().await.unwrap() {
        assert_eq!(record.try_get::<_, i32>(0).unwrap(), 1);
        assert_eq!(record.try_get::<_, i32>(1).unwrap(), 2);
        count += 1;
    }
    assert_eq!(count, 1);
}

#[tokio::test]
async fn select_round_trip_both_backends() {
    let stub = Stub::start().await;
    select_one_two(&client(&stub, Backend::Tcp)).await;
    select_one_two(&client(&stub, Backend::Reqwest)).await;
}

#[tokio::test]
async fn connection_reused_after_full_drain() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    select_one_two(&client).await;
    select_one_two(&client).await;
    assert_eq!(stub.connections(), 1, "drained keep-alive connection must be reused");
}

#[tokio::test]
async fn early_close_aborts_connection() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    let mut resp = client.request("select seq").execute().await.unwrap();
    let first = resp.next_record().await.unwrap().unwrap();
    assert_eq!(first.try_get::<_, i32>(0).unwrap(), 0);
    resp.close();
    // closing twice is a no-op
    resp.close();
    drop(resp);

    select_one_two(&client).await;
    assert_eq!(stub.connections(), 2, "aborted connection must not be reused");
}

#[tokio::test]
async fn compressed_request_with_external_tables() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    for (method, level) in [(Method::Lz4, 3), (Method::Zstd, 9), (Method::Snappy, 1024)] {
        let compressed = compress_all(method, b"1,23\n4,56");

        let mut resp = client
            .request("select x.* from x inner join y on x.i = y.i")
            .compress_request(method, level)
            .external(
                ExternalTable::builder()
                    .name("x")
                    .columns("i Int32, s String")
                    .compression(method)
                    .format(Format::Csv)
                    .content(compressed)
                    .build()
                    .unwrap(),
            )
            .external(
                ExternalTable::builder()
                    .name("y")
                    .columns("s String, i Int32")
                    .format(Format::Tsv)
                    .content("32\t1\n43\t2\n54\t3\n65\t4")
                    .build()
                    .unwrap(),
            )
            .execute()
            .await
            .unwrap();

        let mut rows = Vec::new();
        while let Some(record) = resp.next_record().await.unwrap() {
            rows.push((
                record.try_get::<_, i32>(0).unwrap(),
                record.try_get::<_, i32>(1).unwrap(),
            ));
        }
        assert_eq!(rows, [(1, 23), (4, 56)], "{method} upload");
    }
}

#[tokio::test]
async fn response_decompression() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    for method in [Method::Lz4, Method::Zstd, Method::Gzip, Method::Deflate] {
        let mut resp = client
            .request("select 1,2")
            .compress_response(method)
            .execute()
            .await
            .unwrap();
        let record = resp.first_record().await.unwrap();
        assert_eq!(record.try_get::<_, i32>(0).unwrap(), 1, "{method} download");
        assert_eq!(record.try_get::<_, i32>(1).unwrap(), 2);
    }
}

#[tokio::test]
async fn session_state_persists_across_requests() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    let a = Manager::global().create_session_id();
    let b = Manager::global().create_session_id();
    assert_ne!(a, b);

    let req = client
        .request("create temporary table test_session(a String) engine=Memory as select '1'")
        .session(&a, true);

    req.clone().execute().await.unwrap().finish().await.unwrap();

    let mut resp = req
        .clone()
        .query("select * from test_session")
        .execute()
        .await
        .unwrap();
    let record = resp.first_record().await.unwrap();
    assert_eq!(record.try_get::<_, i32>(0).unwrap(), 1);

    assert_eq!(stub.sessions(), 1, "create-if-absent must create once and reuse");
}

#[tokio::test]
async fn session_check_rejects_unknown_session() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    let err = client
        .request("select 1,2")
        .session("cs-never-created", false)
        .execute()
        .await
        .unwrap_err();
    let colonna::ErrorKind::Server(server) = err.kind() else {
        panic!("expected server error, got {err}");
    };
    assert_eq!(server.code(), Some(372));
}

#[tokio::test]
async fn concurrent_requests_share_a_session_without_interleaving() {
    let stub = Stub::start().await;
    let session = Manager::global().create_session_id();

    let shared = client(&stub, Backend::Tcp);
    let mut handles = Vec::new();
    for off in 0..8 {
        let client = shared.clone();
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            let mut resp = client
                .request("select seq")
                .session(&session, true)
                .set("session_check", 0)
                .param("off", off)
                .execute()
                .await
                .unwrap();

            let mut i = 0;
            while let Some(record) = resp.next_record().await.unwrap() {
                assert_eq!(record.try_get::<_, i32>(0).unwrap(), off, "foreign record leaked in");
                assert_eq!(record.try_get::<_, i32>(1).unwrap(), off + i);
                i += 1;
            }
            assert_eq!(i, 64);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn ping_matrix() {
    let stub = Stub::start().await;

    let base = Config::parse(&stub.url()).unwrap().health_check(HealthCheck::Ping);

    let client = Client::new(base.clone().web_context("/")).unwrap();
    assert!(client.ping(Duration::from_secs(3)).await);

    let client = Client::new(base.clone().web_context("a/b")).unwrap();
    assert!(!client.ping(Duration::from_secs(3)).await);

    let client = Client::new(base.clone().web_context("a/b").remove_web_context()).unwrap();
    assert!(client.ping(Duration::from_secs(3)).await);

    // the two strategies legitimately disagree for the same server state
    let select_one = Config::parse(&stub.url())
        .unwrap()
        .web_context("a/b")
        .health_check(HealthCheck::SelectOne);
    let client = Client::new(select_one).unwrap();
    assert!(client.ping(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn ping_degrades_to_false_but_try_ping_errors() {
    // nothing listens here
    let config = Config::parse("http://127.0.0.1:1").unwrap().health_check(HealthCheck::Ping);
    let client = Client::new(config).unwrap();

    assert!(!client.ping(Duration::from_millis(500)).await);
    assert!(client.try_ping(Duration::from_millis(500)).await.is_err());
}

#[tokio::test]
async fn credentials_precedence() {
    let stub = Stub::start().await;
    let client = Client::new(
        Config::parse(&stub.url())
            .unwrap()
            .credentials("config-user", "pw"),
    )
    .unwrap();

    let mut resp = client.request("select currentUser()").execute().await.unwrap();
    assert_eq!(resp.first_record().await.unwrap().try_get::<_, String>(0).unwrap(), "config-user");

    let mut resp = client
        .request("select currentUser()")
        .credentials("scoped-user", "pw")
        .execute()
        .await
        .unwrap();
    assert_eq!(resp.first_record().await.unwrap().try_get::<_, String>(0).unwrap(), "scoped-user");

    // explicit header wins over everything: dba:dba
    let mut resp = client
        .request("select currentUser()")
        .credentials("scoped-user", "pw")
        .header("Authorization", "Basic ZGJhOmRiYQ==")
        .execute()
        .await
        .unwrap();
    assert_eq!(resp.first_record().await.unwrap().try_get::<_, String>(0).unwrap(), "dba");
}

#[tokio::test]
async fn mutation_summary() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    let summary = client
        .execute("insert into test_http_mutation select toString(number), number from numbers(1)")
        .await
        .unwrap();
    assert_eq!(summary.written_rows(), 1);
    assert_eq!(summary.read_rows(), 1);
}

#[tokio::test]
async fn embedded_error_after_streamed_records() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    let mut resp = client.request("select boom").execute().await.unwrap();

    // data streamed fine before the failure
    let first = resp.next_record().await.unwrap().unwrap();
    assert_eq!(first.try_get::<_, i32>(0).unwrap(), 1);

    let err = loop {
        match resp.next_record().await {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("stream must surface the embedded error"),
            Err(err) => break err,
        }
    };
    let colonna::ErrorKind::Server(server) = err.kind() else {
        panic!("expected server error, got {err}");
    };
    assert_eq!(server.code(), Some(395));

    // a second iteration attempt fails instead of restarting
    assert!(resp.next_record().await.is_err());
}

#[tokio::test]
async fn terminal_transaction_never_sends() {
    let stub = Stub::start().await;
    let client = client(&stub, Backend::Tcp);

    let tx = Manager::global().begin_transaction(Some(Duration::from_secs(10)));
    client
        .request("select 1,2")
        .transaction(Some(&tx))
        .execute()
        .await
        .unwrap()
        .finish()
        .await
        .unwrap();

    tx.commit().unwrap();
    let before = stub.requests();

    let err = client
        .request("select 1,2")
        .transaction(Some(&tx))
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), colonna::ErrorKind::Transaction(_)));
    assert_eq!(stub.requests(), before, "terminal transaction must not reach the wire");
}
