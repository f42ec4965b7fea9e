//! HTTP provisioning endpoint.
//!
//! [`route`] is a pure function from `(method, uri)` to an [`HttpResponse`]
//! so the whole API can be exercised on the host.  On the device,
//! [`start_server`] registers one `EspHttpServer` handler per route and
//! copies the response out; static assets are streamed from the SPIFFS
//! mount in 512-byte chunks.
//!
//! | Method | Path                      | Intake request      |
//! |--------|---------------------------|---------------------|
//! | GET    | `/api/wifi/status`        | `StatusQuery`       |
//! | GET    | `/api/wifi/saved`         | `ListSaved`         |
//! | GET    | `/api/wifi/scan`          | `Scan`              |
//! | POST   | `/api/wifi/connect`       | `ConnectExplicit`   |
//! | POST   | `/api/wifi/saved/connect` | `ConnectSaved`      |
//! | POST   | `/api/wifi/saved/delete`  | `Forget`            |

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use super::utils::{query_param, split_uri};
use crate::app::intake::{IntakeReply, IntakeRequest, Origin};
use crate::app::ports::ProvisioningApi;
use crate::error::Error;
use crate::store::record::{Secret, Ssid};

/// Mount point of the read-only asset volume.
pub const ASSET_ROOT: &str = "/spiffs";

/// Scan entries returned by `/api/wifi/scan`.
pub const SCAN_JSON_CAP: usize = 32;

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
const CHUNK_SIZE: usize = 512;

const JSON: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Bytes(Vec<u8>),
    /// Asset to stream; a missing file becomes a 500 at send time.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Body,
}

impl HttpResponse {
    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status: 200,
                content_type: JSON,
                body: Body::Bytes(body),
            },
            Err(_) => Self::error(500, "serialisation failed"),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        let body = serde_json::to_vec(&ErrorBody { error: message })
            .unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status,
            content_type: JSON,
            body: Body::Bytes(body),
        }
    }

    fn asset(root: &Path, name: &str, content_type: &'static str) -> Self {
        Self {
            status: 200,
            content_type,
            body: Body::File(root.join(name)),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// JSON bodies
// ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct OkBody {
    ok: bool,
}

#[derive(Serialize)]
struct StatusBody {
    connected: bool,
    state: u8,
    ssid: String,
    ip: String,
    rssi: i8,
    mode: &'static str,
}

#[derive(Serialize)]
struct Items<T> {
    items: Vec<T>,
}

#[derive(Serialize)]
struct ScanItem {
    index: usize,
    ssid: String,
    rssi: i8,
}

#[derive(Serialize)]
struct SavedItem {
    index: usize,
    ssid: String,
}

// ───────────────────────────────────────────────────────────────
// Router
// ───────────────────────────────────────────────────────────────

/// Paths the device server registers handlers for.
pub const ROUTES: &[(&str, HttpMethod)] = &[
    ("/", HttpMethod::Get),
    ("/index.html", HttpMethod::Get),
    ("/app.css", HttpMethod::Get),
    ("/app.js", HttpMethod::Get),
    ("/api/wifi/status", HttpMethod::Get),
    ("/api/wifi/saved", HttpMethod::Get),
    ("/api/wifi/scan", HttpMethod::Get),
    ("/api/wifi/connect", HttpMethod::Post),
    ("/api/wifi/saved/connect", HttpMethod::Post),
    ("/api/wifi/saved/delete", HttpMethod::Post),
];

pub fn route<A: ProvisioningApi + ?Sized>(
    method: HttpMethod,
    uri: &str,
    api: &A,
    asset_root: &Path,
) -> HttpResponse {
    let (path, query) = split_uri(uri);
    match (method, path) {
        (HttpMethod::Get, "/" | "/index.html") => {
            HttpResponse::asset(asset_root, "index.html", "text/html")
        }
        (HttpMethod::Get, "/app.css") => HttpResponse::asset(asset_root, "app.css", "text/css"),
        (HttpMethod::Get, "/app.js") => {
            HttpResponse::asset(asset_root, "app.js", "application/javascript")
        }
        (HttpMethod::Get, "/api/wifi/status") => status(api),
        (HttpMethod::Get, "/api/wifi/saved") => saved(api),
        (HttpMethod::Get, "/api/wifi/scan") => scan(api),
        (HttpMethod::Post, "/api/wifi/connect") => connect(api, query),
        (HttpMethod::Post, "/api/wifi/saved/connect") => {
            with_ssid(query, |ssid| api.submit(Origin::Http, IntakeRequest::ConnectSaved { ssid }))
        }
        (HttpMethod::Post, "/api/wifi/saved/delete") => {
            with_ssid(query, |ssid| api.submit(Origin::Http, IntakeRequest::Forget { ssid }))
        }
        _ => HttpResponse::error(404, "not found"),
    }
}

fn failure(e: Error) -> HttpResponse {
    warn!("HTTP: request failed: {}", e);
    HttpResponse::error(500, &e.to_string())
}

fn unexpected() -> HttpResponse {
    HttpResponse::error(500, "unexpected reply")
}

fn status<A: ProvisioningApi + ?Sized>(api: &A) -> HttpResponse {
    match api.submit(Origin::Http, IntakeRequest::StatusQuery) {
        Ok(IntakeReply::Status(s)) => {
            let connected = s.connected();
            let ssid = match (&s.ssid, connected) {
                (Some(ssid), true) => ssid.to_string(),
                _ => "-".to_string(),
            };
            let ip = match (s.ip, connected) {
                (Some(ip), true) => ip.to_string(),
                _ => "-".to_string(),
            };
            HttpResponse::json(&StatusBody {
                connected,
                state: s.state.code(),
                ssid,
                ip,
                rssi: s.rssi,
                mode: s.mode.as_str(),
            })
        }
        Ok(_) => unexpected(),
        Err(e) => failure(e),
    }
}

fn saved<A: ProvisioningApi + ?Sized>(api: &A) -> HttpResponse {
    match api.submit(Origin::Http, IntakeRequest::ListSaved) {
        Ok(IntakeReply::Saved(entries)) => HttpResponse::json(&Items {
            items: entries
                .iter()
                .map(|e| SavedItem {
                    index: e.index,
                    ssid: e.ssid.to_string(),
                })
                .collect(),
        }),
        Ok(_) => unexpected(),
        Err(e) => failure(e),
    }
}

fn scan<A: ProvisioningApi + ?Sized>(api: &A) -> HttpResponse {
    match api.submit(Origin::Http, IntakeRequest::Scan) {
        Ok(IntakeReply::Scan(snapshot)) => HttpResponse::json(&Items {
            items: snapshot
                .entries
                .iter()
                .take(SCAN_JSON_CAP)
                .enumerate()
                .map(|(index, e)| ScanItem {
                    index,
                    ssid: e.ssid.to_string(),
                    rssi: e.rssi,
                })
                .collect(),
        }),
        Ok(_) => unexpected(),
        Err(e) => failure(e),
    }
}

fn ack(result: crate::error::Result<IntakeReply>) -> HttpResponse {
    match result {
        Ok(IntakeReply::Ack) => HttpResponse::json(&OkBody { ok: true }),
        Ok(_) => unexpected(),
        Err(e) => failure(e),
    }
}

fn required_ssid(query: &str) -> Result<Ssid, HttpResponse> {
    let raw = query_param(query, "ssid")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HttpResponse::error(400, "missing ssid"))?;
    Ssid::from_peer(&raw).map_err(|_| HttpResponse::error(400, "invalid ssid"))
}

fn with_ssid<F>(query: &str, submit: F) -> HttpResponse
where
    F: FnOnce(Ssid) -> crate::error::Result<IntakeReply>,
{
    match required_ssid(query) {
        Ok(ssid) => ack(submit(ssid)),
        Err(resp) => resp,
    }
}

fn connect<A: ProvisioningApi + ?Sized>(api: &A, query: &str) -> HttpResponse {
    let ssid = match required_ssid(query) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let secret = match query_param(query, "password").filter(|p| !p.is_empty()) {
        None => None,
        Some(raw) => match Secret::from_peer(&raw) {
            Ok(s) => Some(s),
            Err(_) => return HttpResponse::error(400, "invalid password"),
        },
    };
    info!("HTTP: connect to '{}' requested", ssid);
    ack(api.submit(Origin::Http, IntakeRequest::ConnectExplicit { ssid, secret }))
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF server
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod server {
    use std::fs::File;
    use std::io::Read as _;
    use std::path::Path;

    use embedded_svc::http::Method;
    use embedded_svc::io::Write;
    use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
    use esp_idf_svc::io::EspIOError;
    use log::{info, warn};

    use super::{Body, CHUNK_SIZE, HttpMethod, HttpResponse, ROUTES, route};
    use crate::app::ports::ProvisioningApi;

    fn respond(req: Request<&mut EspHttpConnection<'_>>, resp: HttpResponse) -> Result<(), EspIOError> {
        let headers = [("Content-Type", resp.content_type), ("Cache-Control", "no-cache")];
        match resp.body {
            Body::Bytes(bytes) => {
                req.into_response(resp.status, None, &headers)?.write_all(&bytes)?;
            }
            Body::File(path) => match File::open(&path) {
                Ok(mut file) => {
                    let mut out = req.into_response(200, None, &headers)?;
                    let mut buf = [0u8; CHUNK_SIZE];
                    loop {
                        match file.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => out.write_all(&buf[..n])?,
                            Err(e) => {
                                warn!("HTTP: read {} failed: {}", path.display(), e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("HTTP: open {} failed: {}", path.display(), e);
                    req.into_status_response(500)?.write_all(b"Failed to read file")?;
                }
            },
        }
        Ok(())
    }

    /// Start the server and register every route in [`ROUTES`].
    pub fn start_server<A>(port: u16, api: &'static A) -> Result<EspHttpServer<'static>, EspIOError>
    where
        A: ProvisioningApi + Sync,
    {
        let conf = Configuration {
            http_port: port,
            stack_size: 8 * 1024,
            max_uri_handlers: ROUTES.len() + 2,
            ..Default::default()
        };
        let mut server = EspHttpServer::new(&conf)?;

        for &(path, method) in ROUTES {
            let native = match method {
                HttpMethod::Get => Method::Get,
                HttpMethod::Post => Method::Post,
            };
            server.fn_handler::<EspIOError, _>(path, native, move |req| {
                let uri = req.uri().to_string();
                let resp = route(method, &uri, api, Path::new(super::ASSET_ROOT));
                respond(req, resp)
            })?;
        }

        info!("HTTP: listening on port {}", port);
        Ok(server)
    }
}

#[cfg(target_os = "espidf")]
pub use server::start_server;
