//! Client gateway.
//!
//! One TCP listener accepts websocket clients, with optional TLS
//! termination in front of the handshake. The handshake runs an Origin
//! check against `site_url` and the configured extra origins before the
//! connection reaches the hub layer. Alongside it, an optional UNIX
//! domain socket (mode 0600) serves newline-delimited JSON admin
//! commands that never transit the network listener.

use std::io::{BufReader, Cursor};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ServerConfig as RustlsConfig, version};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

use crate::config::TlsSettings;
use crate::error::{AppError, AppResult};
use crate::server::{App, Server};

/// Accepts client connections and spawns one task per websocket.
pub struct Gateway {
    srv: Arc<Server>,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    admin: Option<UnixListener>,
    redirect: Option<TcpListener>,
}

impl Gateway {
    /// Binds the websocket listener and, when configured, the admin
    /// socket. TLS material is loaded here so a bad certificate fails
    /// startup instead of the first connection.
    pub async fn bind(srv: Arc<Server>) -> AppResult<Self> {
        let cfg = srv.config().get();

        let listener = TcpListener::bind(cfg.service.listen_address)
            .await
            .map_err(|err| {
                AppError::internal(
                    "app.gateway.bind.failed.app_error",
                    format!("could not bind {}", cfg.service.listen_address),
                )
                .with_detail(err.to_string())
            })?;
        info!(address = %cfg.service.listen_address, tls = cfg.service.tls.is_some(), "gateway listening");

        let tls = match &cfg.service.tls {
            Some(settings) => Some(load_tls(settings)?),
            None => None,
        };

        let admin = match &cfg.service.unix_socket {
            Some(path) => Some(bind_admin_socket(path)?),
            None => None,
        };

        let redirect = match &cfg.service.tls {
            Some(settings) if settings.forward_80_to_443 => {
                let addr = SocketAddr::new(cfg.service.listen_address.ip(), 80);
                let listener = TcpListener::bind(addr).await.map_err(|err| {
                    AppError::internal(
                        "app.gateway.redirect.bind.app_error",
                        format!("could not bind the port 80 redirector on {addr}"),
                    )
                    .with_detail(err.to_string())
                })?;
                info!(%addr, "http redirector listening");
                Some(listener)
            }
            _ => None,
        };

        Ok(Self {
            srv,
            listener,
            tls,
            admin,
            redirect,
        })
    }

    /// Accepts until shutdown. Each connection gets its own tracked task;
    /// the accept loops themselves end with the shutdown signal.
    pub async fn run(self) {
        let shutdown = self.srv.shutdown_signal();
        let handshake_timeout =
            Duration::from_secs(self.srv.config().get().service.read_timeout_secs);

        if let Some(admin) = self.admin {
            let srv = self.srv.clone();
            self.srv.go(admin_loop(srv, admin));
        }
        if let Some(redirect) = self.redirect {
            let srv = self.srv.clone();
            self.srv.go(redirect_loop(srv, redirect));
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(error = %err, "gateway accept failed");
                    continue;
                }
            };

            let srv = self.srv.clone();
            let tls = self.tls.clone();
            self.srv.go(async move {
                let app = App::new(srv).with_ip(addr.ip().to_string());
                match tls {
                    Some(acceptor) => {
                        match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await
                        {
                            Ok(Ok(stream)) => serve_websocket(app, stream, handshake_timeout).await,
                            Ok(Err(err)) => debug!(%addr, error = %err, "tls handshake failed"),
                            Err(_) => debug!(%addr, "tls handshake timed out"),
                        }
                    }
                    None => serve_websocket(app, stream, handshake_timeout).await,
                }
            });
        }
        debug!("gateway accept loop stopped");
    }
}

/// Runs the websocket upgrade, then hands the stream to the hub layer.
/// The upgrade itself runs under the read timeout so a silent socket
/// cannot hold a task open.
async fn serve_websocket<S>(app: App, stream: S, handshake_timeout: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let allowed = {
        let cfg = app.config();
        allowed_origins(&cfg.service.site_url, &cfg.service.allowed_origins)
    };
    let check = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = req
            .headers()
            .get("Origin")
            .and_then(|value| value.to_str().ok());
        if origin_allowed(&allowed, origin) {
            return Ok(response);
        }
        warn!(origin = origin.unwrap_or(""), "websocket origin rejected");
        Err(http::Response::builder()
            .status(http::StatusCode::FORBIDDEN)
            .body(Some("origin not allowed".to_string()))
            .unwrap())
    };

    match tokio::time::timeout(handshake_timeout, accept_hdr_async(stream, check)).await {
        Ok(Ok(ws)) => crate::hub::run_connection(app, ws).await,
        Ok(Err(err)) => debug!(error = %err, "websocket handshake failed"),
        Err(_) => debug!("websocket handshake timed out"),
    }
}

/// The origin allowlist: the site URL plus the configured extras. Empty
/// means no check at all.
fn allowed_origins(site_url: &str, extra: &[String]) -> Vec<String> {
    let mut allowed = Vec::with_capacity(extra.len() + 1);
    if !site_url.is_empty() {
        allowed.push(site_url.trim_end_matches('/').to_string());
    }
    for origin in extra {
        allowed.push(origin.trim_end_matches('/').to_string());
    }
    allowed
}

/// Requests without an Origin header pass; native clients do not send
/// one. A configured `"*"` disables the check.
fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(origin) = origin else {
        return true;
    };
    let origin = origin.trim_end_matches('/');
    allowed.iter().any(|a| a == "*" || a == origin)
}

/// Builds the TLS acceptor with the configured minimum version. Requests
/// below the stack's 1.2 floor log a warning and clamp.
fn load_tls(settings: &TlsSettings) -> AppResult<TlsAcceptor> {
    let cert_file = std::fs::read(&settings.cert_path).map_err(|err| tls_error(err.to_string()))?;
    let mut cert_reader = BufReader::new(Cursor::new(cert_file));
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| tls_error(err.to_string()))?;
    if certs.is_empty() {
        return Err(tls_error(format!("no certificates in {}", settings.cert_path)));
    }

    let key_file = std::fs::read(&settings.key_path).map_err(|err| tls_error(err.to_string()))?;
    let mut key_reader = BufReader::new(Cursor::new(key_file));
    let key: PrivateKeyDer = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|err| tls_error(err.to_string()))?
        .ok_or_else(|| tls_error(format!("no private key in {}", settings.key_path)))?;

    if settings.min_version.below_supported_floor() {
        warn!(
            configured = settings.min_version.as_str(),
            "tls minimum version below the supported floor; using 1.2"
        );
    }
    let builder = if settings.min_version == crate::config::TlsMinVersion::V1_3 {
        RustlsConfig::builder_with_protocol_versions(&[&version::TLS13])
    } else {
        RustlsConfig::builder_with_protocol_versions(&[&version::TLS12, &version::TLS13])
    };
    let config = builder
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| tls_error(err.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn tls_error(detail: String) -> AppError {
    AppError::internal(
        "app.gateway.tls.invalid.app_error",
        "tls configuration could not be loaded",
    )
    .with_detail(detail)
}

/// Binds the admin socket and restricts it to the owning user.
fn bind_admin_socket(path: &str) -> AppResult<UnixListener> {
    // A stale socket file from a crashed process blocks the bind.
    if std::path::Path::new(path).exists() {
        let _ = std::fs::remove_file(path);
    }
    let listener = UnixListener::bind(path).map_err(|err| {
        AppError::internal(
            "app.gateway.admin_socket.bind.app_error",
            format!("could not bind admin socket {path}"),
        )
        .with_detail(err.to_string())
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|err| {
        AppError::internal(
            "app.gateway.admin_socket.perms.app_error",
            format!("could not restrict admin socket {path}"),
        )
        .with_detail(err.to_string())
    })?;
    info!(path, "admin socket listening");
    Ok(listener)
}

async fn admin_loop(srv: Arc<Server>, listener: UnixListener) {
    let shutdown = srv.shutdown_signal();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let srv2 = srv.clone();
                srv.go(admin_connection(srv2, stream));
            }
            Err(err) => warn!(error = %err, "admin socket accept failed"),
        }
    }
    debug!("admin socket loop stopped");
}

/// One admin client: one JSON command per line, one JSON reply per line.
async fn admin_connection(srv: Arc<Server>, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = tokio::io::BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let mut reply = dispatch_admin(&srv, &line).await.to_string();
        reply.push('\n');
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn dispatch_admin(srv: &Arc<Server>, line: &str) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => return fail(&format!("malformed command: {err}")),
    };
    let action = request["action"].as_str().unwrap_or("");
    match action {
        "set_busy" => {
            let seconds = request["seconds"].as_i64().unwrap_or(3600);
            srv.busy().set(seconds);
            info!(seconds, "server marked busy via admin socket");
            json!({"status": "OK", "expires_at": srv.busy().expires_at()})
        }
        "clear_busy" => {
            srv.busy().clear();
            info!("server busy flag cleared via admin socket");
            json!({"status": "OK"})
        }
        "get_busy" => {
            json!({
                "status": "OK",
                "busy": srv.busy().is_busy(),
                "expires_at": srv.busy().expires_at(),
            })
        }
        "ack_warn_metric" => {
            let Some(metric_id) = request["warn_metric_id"].as_str() else {
                return fail("warn_metric_id is required");
            };
            match App::new(srv.clone()).ack_warn_metric(metric_id).await {
                Ok(()) => json!({"status": "OK"}),
                Err(err) => json!({"status": "FAIL", "error": err.id()}),
            }
        }
        "reload_config" => match srv.config().reload() {
            Ok(()) => {
                info!("configuration reloaded via admin socket");
                json!({"status": "OK"})
            }
            Err(err) => fail(&format!("reload failed: {err}")),
        },
        "" => fail("action is required"),
        other => fail(&format!("unknown action {other}")),
    }
}

fn fail(message: &str) -> Value {
    json!({"status": "FAIL", "error": message})
}

async fn redirect_loop(srv: Arc<Server>, listener: TcpListener) {
    let shutdown = srv.shutdown_signal();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let Ok((stream, _)) = accepted else { continue };
        srv.go(async move {
            let _ = redirect_connection(stream).await;
        });
    }
    debug!("http redirector stopped");
}

/// Answers one plain-HTTP request with a 301 to the https origin. Enough
/// request parsing to recover the host and path; anything else closes.
async fn redirect_connection(mut stream: TcpStream) -> std::io::Result<()> {
    let mut head = [0u8; 2048];
    let n = stream.read(&mut head).await?;
    let head = String::from_utf8_lossy(&head[..n]);

    let path = head.split_whitespace().nth(1).unwrap_or("/");
    let host = head
        .lines()
        .find_map(|line| line.split_once(':').filter(|(k, _)| k.eq_ignore_ascii_case("host")))
        .map(|(_, v)| v.trim())
        .map(|v| v.split(':').next().unwrap_or(v))
        .unwrap_or("");

    let response = if host.is_empty() {
        "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n".to_string()
    } else {
        format!(
            "HTTP/1.1 301 Moved Permanently\r\nLocation: https://{host}{path}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        )
    };
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
