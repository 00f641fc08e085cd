//! A separately executed child process that owns one public port per device:
//! a pass-through HTTP proxy to the WDA URL, plus a `/screen` WebSocket
//! endpoint bridging an upstream MJPEG stream into binary frames.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Clone)]
pub struct ProxyTargets {
    pub wda_url: String,
    pub mjpeg_url: String,
}

#[derive(Clone)]
struct AppState {
    targets: Arc<ProxyTargets>,
    http: reqwest::Client,
}

pub fn router(targets: ProxyTargets) -> Router {
    let state = AppState {
        targets: Arc::new(targets),
        http: reqwest::Client::new(),
    };

    Router::new()
        .route("/screen", any(screen_handler))
        .fallback(any(proxy_handler))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, targets: ProxyTargets) -> anyhow::Result<()> {
    let app = router(targets);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn cors_headers() -> [(HeaderName, HeaderValue); 3] {
    [
        (
            HeaderName::from_static("access-control-allow-origin"),
            HeaderValue::from_static("*"),
        ),
        (
            HeaderName::from_static("access-control-allow-headers"),
            HeaderValue::from_static("x-requested-with"),
        ),
        (
            HeaderName::from_static("access-control-allow-methods"),
            HeaderValue::from_static("POST, GET, OPTIONS"),
        ),
    ]
}

async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    uri: axum::http::Uri,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        for (name, value) in cors_headers() {
            resp.headers_mut().insert(name, value);
        }
        return resp;
    }

    let url = format!("{}{}", state.targets.wda_url.trim_end_matches('/'), uri);
    let mut req = state.http.request(method, &url);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        req = req.header(name, value);
    }
    req = req.body(body.to_vec());

    let upstream = match req.send().await {
        Ok(r) => r,
        Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let bytes = upstream.bytes().await.unwrap_or_default();

    let mut resp = Response::builder().status(status);
    for (name, value) in upstream_headers.iter() {
        resp = resp.header(name, value);
    }
    let mut resp = resp.body(axum::body::Body::from(bytes)).unwrap_or_else(|_| {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    });

    resp.headers_mut()
        .insert(axum::http::header::CONNECTION, HeaderValue::from_static("close"));
    for (name, value) in cors_headers() {
        resp.headers_mut().insert(name, value);
    }
    resp
}

async fn screen_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let mjpeg_url = state.targets.mjpeg_url.clone();
    ws.on_upgrade(move |socket| bridge_mjpeg(socket, mjpeg_url))
}

async fn bridge_mjpeg(mut socket: WebSocket, mjpeg_url: String) {
    let mut reader = match MjpegReader::connect(&mjpeg_url).await {
        Ok(r) => r,
        Err(e) => {
            log::debug!("mjpeg connect failed: {e}");
            let _ = socket.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            frame = reader.next_frame() => {
                match frame {
                    Ok(bytes) => {
                        if socket.send(Message::Binary(bytes)).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => {
                        let _ = socket.close().await;
                        return;
                    }
                }
            }
            incoming = socket.recv() => {
                // Inbound messages are ignored; only a socket close matters.
                if incoming.is_none() {
                    return;
                }
            }
        }
    }
}

/// Raw TCP reader for an HTTP/1.0 MJPEG multipart stream: one `GET` request,
/// then a repeating `Content-Length` → blank line → N bytes cycle.
struct MjpegReader {
    stream: TcpStream,
}

impl MjpegReader {
    async fn connect(url: &str) -> anyhow::Result<Self> {
        let (host_port, path) = split_url(url)?;
        let mut stream = TcpStream::connect(&host_port).await?;
        let request = format!("GET {path} HTTP/1.0\r\nHost: {host_port}\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;

        // Consume the response headers up to the blank line.
        read_until(&mut stream, b"\r\n\r\n").await?;

        Ok(Self { stream })
    }

    async fn next_frame(&mut self) -> anyhow::Result<Vec<u8>> {
        loop {
            let line = read_until(&mut self.stream, b"\r\n").await?;
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end();
            if let Some(rest) = line.strip_prefix("Content-Length:") {
                let length: usize = rest.trim().parse()?;
                read_until(&mut self.stream, b"\r\n").await?;
                let mut buf = vec![0u8; length];
                self.stream.read_exact(&mut buf).await?;
                return Ok(buf);
            }
            // Boundary lines and other headers are discarded.
        }
    }
}

async fn read_until(stream: &mut TcpStream, delimiter: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        buf.push(byte[0]);
        if buf.ends_with(delimiter) {
            return Ok(buf);
        }
    }
}

fn split_url(url: &str) -> anyhow::Result<(String, String)> {
    let without_scheme = url
        .strip_prefix("http://")
        .ok_or_else(|| anyhow::anyhow!("only http:// mjpeg urls are supported"))?;
    let (host_port, path) = match without_scheme.find('/') {
        Some(idx) => (&without_scheme[..idx], &without_scheme[idx..]),
        None => (without_scheme, "/"),
    };
    Ok((host_port.to_string(), path.to_string()))
}

/// Freshly allocates a public port and spawns the standalone
/// `ios-provider-proxy` child process against it. Used on launch and by
/// cold-reset handlers; the caller owns terminating the previous instance.
pub async fn restart(targets: ProxyTargets) -> anyhow::Result<(SocketAddr, tokio::process::Child)> {
    let public_port = crate::ports::allocate()?;
    let addr: SocketAddr = ([127, 0, 0, 1], public_port).into();

    let exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("ios-provider-proxy")))
        .unwrap_or_else(|| std::path::PathBuf::from("ios-provider-proxy"));

    let child = tokio::process::Command::new(exe)
        .arg("--port")
        .arg(public_port.to_string())
        .arg("--wda-url")
        .arg(&targets.wda_url)
        .arg("--mjpeg-url")
        .arg(&targets.mjpeg_url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    Ok((addr, child))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_port_and_path() {
        let (host_port, path) = split_url("http://127.0.0.1:9100/mjpeg").unwrap();
        assert_eq!(host_port, "127.0.0.1:9100");
        assert_eq!(path, "/mjpeg");
    }

    #[test]
    fn defaults_to_root_path() {
        let (host_port, path) = split_url("http://127.0.0.1:9100").unwrap();
        assert_eq!(host_port, "127.0.0.1:9100");
        assert_eq!(path, "/");
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(split_url("ws://127.0.0.1:9100").is_err());
    }
}
