//! HTTP API: listen on the API port, parse requests with httparse, answer in JSON.
//!
//! One request per connection; every response carries `Connection: close`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use peerlink_core::{ListenerState, NetworkEngine};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const MAX_HEAD_LEN: usize = 64 * 1024;
const MAX_HEADERS: usize = 32;
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the API on an already-bound listener.
pub async fn serve(listener: TcpListener, engine: NetworkEngine, max_body: u64) -> io::Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, &engine, max_body).await {
                tracing::debug!(%remote, error = %e, "api connection failed");
            }
        });
    }
}

/// Bind `addr` and run the API.
pub async fn run_api(addr: SocketAddr, engine: NetworkEngine, max_body: u64) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");
    serve(listener, engine, max_body).await
}

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

struct Response {
    status: u16,
    content_type: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Response {
    fn ok() -> Self {
        Self {
            status: 200,
            content_type: "text/plain; charset=utf-8",
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(mut body) => {
                body.push(b'\n');
                Self {
                    status: 200,
                    content_type: "application/json",
                    headers: Vec::new(),
                    body,
                }
            }
            Err(e) => Self::error(500, &format!("encode response: {}", e)),
        }
    }

    fn error(status: u16, msg: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            headers: Vec::new(),
            body: format!("{}\n", msg).into_bytes(),
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "",
    }
}

#[derive(Serialize)]
struct PeerView {
    id: String,
    addrs: Vec<String>,
}

#[derive(Serialize)]
struct FileView {
    name: String,
    size: i64,
    from: String,
}

#[derive(Serialize)]
struct LocalView {
    addr: String,
}

#[derive(Serialize)]
struct HealthView {
    id: String,
    listener: &'static str,
}

#[derive(Deserialize)]
struct ConnectRequest {
    addr: String,
}

#[derive(Deserialize)]
struct BroadcastRequest {
    message: String,
}

async fn handle_client(mut client: TcpStream, engine: &NetworkEngine, max_body: u64) -> io::Result<()> {
    let response = match read_request(&mut client, max_body).await? {
        Ok(req) => {
            tracing::debug!(method = %req.method, path = %req.path, "api request");
            route(engine, req, max_body).await
        }
        Err(resp) => resp,
    };
    write_response(&mut client, response).await?;
    linger(client).await;
    Ok(())
}

/// Half-close and drain whatever the client still sends, so a rejected upload
/// reads our response instead of a reset.
async fn linger(mut client: TcpStream) {
    if client.shutdown().await.is_err() {
        return;
    }
    let mut sink = [0u8; 4096];
    let drain = async {
        while let Ok(n) = client.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
}

/// Read the head and body. The inner `Err` is a response to send back as-is.
async fn read_request(
    client: &mut TcpStream,
    max_body: u64,
) -> io::Result<Result<Request, Response>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let (method, target, head_len, content_length) = loop {
        let n = client.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = req.method.unwrap_or("").to_string();
                let target = req.path.unwrap_or("/").to_string();
                let mut content_length = 0u64;
                for h in req.headers.iter() {
                    if h.name.eq_ignore_ascii_case("Content-Length") {
                        let v = std::str::from_utf8(h.value).ok().map(str::trim);
                        match v.and_then(|v| v.parse::<u64>().ok()) {
                            Some(len) => content_length = len,
                            None => return Ok(Err(Response::error(400, "bad Content-Length"))),
                        }
                    }
                }
                break (method, target, head_len, content_length);
            }
            Ok(httparse::Status::Partial) if buf.len() < MAX_HEAD_LEN => continue,
            Ok(httparse::Status::Partial) => {
                return Ok(Err(Response::error(400, "request head too large")))
            }
            Err(e) => return Ok(Err(Response::error(400, &format!("bad request: {}", e)))),
        }
    };

    if content_length > max_body {
        return Ok(Err(Response::error(
            400,
            &format!("request body too large (max {} bytes)", max_body),
        )));
    }
    let mut body = buf.split_off(head_len);
    body.truncate(content_length as usize);
    let remaining = content_length as usize - body.len();
    if remaining > 0 {
        let start = body.len();
        body.resize(content_length as usize, 0);
        client.read_exact(&mut body[start..]).await?;
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), parse_query(q)),
        None => (target, Vec::new()),
    };
    Ok(Ok(Request {
        method,
        path,
        query,
        body,
    }))
}

async fn route(engine: &NetworkEngine, req: Request, max_body: u64) -> Response {
    let (method, path) = (req.method.clone(), req.path.clone());
    match (method.as_str(), path.as_str()) {
        ("GET", "/api/peers") => {
            let peers: Vec<PeerView> = engine
                .list_peers()
                .await
                .into_iter()
                .map(|p| PeerView {
                    id: p.id.to_string(),
                    addrs: p.addrs.iter().map(|a| a.to_string()).collect(),
                })
                .collect();
            Response::json(&peers)
        }
        ("GET", "/api/local") => Response::json(&LocalView {
            addr: engine.local_address(),
        }),
        ("POST", "/api/connect") => {
            let body: ConnectRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "bad connect request");
                    return Response::error(400, "Invalid request format");
                }
            };
            tracing::info!(addr = %body.addr, "connecting to peer");
            match engine.connect(&body.addr).await {
                Ok(_) => Response::ok(),
                Err(e) => Response::error(500, &e.to_string()),
            }
        }
        ("POST", "/api/broadcast") => {
            let body: BroadcastRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(e) => return Response::error(400, &e.to_string()),
            };
            match engine.broadcast(&body.message).await {
                Ok(()) => Response::ok(),
                Err(e) => Response::error(500, &e.to_string()),
            }
        }
        ("GET", "/api/messages") => Response::json(&engine.list_messages().await),
        ("POST", "/api/sendfile") => send_file(engine, req, max_body).await,
        ("GET", "/api/files") => {
            let files: Vec<FileView> = engine
                .list_files()
                .await
                .into_iter()
                .map(|f| FileView {
                    name: f.name,
                    size: f.size,
                    from: f.from,
                })
                .collect();
            Response::json(&files)
        }
        ("GET", "/api/download") => {
            let Some(name) = req.param("name") else {
                return Response::error(400, "File name is required");
            };
            match engine.file(name).await {
                Some(file) => Response {
                    status: 200,
                    content_type: "application/octet-stream",
                    headers: vec![("Content-Disposition", content_disposition(&file.name))],
                    body: file.data,
                },
                None => Response::error(404, "File not found"),
            }
        }
        ("GET", "/api/health") => {
            let listener = match engine.listener_state() {
                ListenerState::Running => "running",
                ListenerState::Stopped { .. } => "stopped",
            };
            Response::json(&HealthView {
                id: engine.local_id().to_string(),
                listener,
            })
        }
        (
            _,
            "/api/peers" | "/api/local" | "/api/connect" | "/api/broadcast" | "/api/messages"
            | "/api/sendfile" | "/api/files" | "/api/download" | "/api/health",
        ) => Response::error(405, "method not allowed"),
        _ => Response::error(404, "not found"),
    }
}

async fn send_file(engine: &NetworkEngine, req: Request, max_body: u64) -> Response {
    let Some(peer_id) = req.param("peerId").map(str::to_string) else {
        return Response::error(400, "Peer ID is required");
    };
    let Some(name) = req.param("name").map(str::to_string) else {
        return Response::error(400, "File name is required");
    };
    if req.body.len() as u64 > max_body {
        return Response::error(400, "File too large");
    }
    match engine.send_file(&peer_id, &name, req.body).await {
        Ok(()) => {
            tracing::info!(peer = %peer_id, %name, "file sent");
            Response::ok()
        }
        Err(e) => {
            tracing::warn!(peer = %peer_id, %name, error = %e, "file send failed");
            Response::error(500, &format!("Failed to send file: {}", e))
        }
    }
}

async fn write_response(client: &mut TcpStream, resp: Response) -> io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        resp.status,
        reason(resp.status),
        resp.content_type,
        resp.body.len()
    );
    for (name, value) in &resp.headers {
        // CR/LF in a value would end the header line early.
        let value = value.replace(['\r', '\n'], " ");
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    client.write_all(head.as_bytes()).await?;
    client.write_all(&resp.body).await?;
    client.flush().await
}

/// `attachment; filename="..."` for a peer-chosen name. Control characters
/// become `_`; quotes and backslashes are escaped.
fn content_disposition(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            c if c.is_control() => quoted.push('_'),
            c => quoted.push(c),
        }
    }
    format!("attachment; filename=\"{}\"", quoted)
}

/// Split `a=1&b=2` into decoded pairs. Malformed escapes are kept literally.
fn parse_query(q: &str) -> Vec<(String, String)> {
    q.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(k), percent_decode(v))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_decoding() {
        let q = parse_query("peerId=abc&name=my%20file.txt&empty=&flag");
        assert_eq!(q[0], ("peerId".to_string(), "abc".to_string()));
        assert_eq!(q[1], ("name".to_string(), "my file.txt".to_string()));
        assert_eq!(q[2], ("empty".to_string(), String::new()));
        assert_eq!(q[3], ("flag".to_string(), String::new()));
    }

    #[test]
    fn malformed_escapes_kept() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a%zzb"), "a%zzb");
        assert_eq!(percent_decode("a+b%2Bc"), "a b+c");
    }

    #[test]
    fn disposition_quotes_and_strips_controls() {
        assert_eq!(
            content_disposition("report.pdf"),
            r#"attachment; filename="report.pdf""#
        );
        assert_eq!(
            content_disposition("x\r\nSet-Cookie: a=1"),
            r#"attachment; filename="x__Set-Cookie: a=1""#
        );
        assert_eq!(
            content_disposition(r#"a"b\c;d"#),
            r#"attachment; filename="a\"b\\c;d""#
        );
    }

    #[test]
    fn empty_param_counts_as_missing() {
        let req = Request {
            method: "POST".into(),
            path: "/api/sendfile".into(),
            query: parse_query("peerId=&name=x"),
            body: Vec::new(),
        };
        assert!(req.param("peerId").is_none());
        assert_eq!(req.param("name"), Some("x"));
    }
}
