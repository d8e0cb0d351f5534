use std::fs::File;
use std::io::BufReader;
use std::sync::OnceLock;

use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;
use tracing::{info, warn};

pub mod jwt;

pub use jwt::JwtManager;

/// Service name under which the control plane is exposed; pageserver configs
/// point their `control_plane_api` at this service in the operator namespace.
pub const SERVICE_NAME: &str = "control-plane";

/// Cert/key the control-plane listener serves when TLS is enabled.
pub const TLS_CERT_PATH: &str = "/etc/control-plane/certs/tls.crt";
pub const TLS_KEY_PATH: &str = "/etc/control-plane/certs/tls.key";

const HTTP_PORT: u16 = 9090;
const HTTPS_PORT: u16 = 9443;

/// Facts about the running control-plane listener, computed once at server
/// construction. Renderers read these through [`service_facts`]; the only
/// mutation after publication is never — a failed TLS setup downgrades the
/// facts before they are published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceFacts {
    pub tls_enabled: bool,
}

impl ServiceFacts {
    pub fn scheme(&self) -> &'static str {
        if self.tls_enabled {
            "https"
        } else {
            "http"
        }
    }

    pub fn port(&self) -> u16 {
        if self.tls_enabled {
            HTTPS_PORT
        } else {
            HTTP_PORT
        }
    }
}

impl Default for ServiceFacts {
    fn default() -> Self {
        ServiceFacts { tls_enabled: false }
    }
}

static FACTS: OnceLock<ServiceFacts> = OnceLock::new();

/// Facts of the control-plane listener; plain HTTP until a server has been
/// constructed.
pub fn service_facts() -> ServiceFacts {
    FACTS.get().copied().unwrap_or_default()
}

/// Companion HTTP server issuing JWT tokens for the data plane.
///
/// Lifecycle is construct, bind, stop: certificate loading happens in
/// [`ControlPlaneServer::new`], and the `actix` server handle returned by
/// `bind` stops idempotently from any path.
pub struct ControlPlaneServer {
    tls: Option<rustls::ServerConfig>,
    jwt: web::Data<JwtManager>,
}

impl ControlPlaneServer {
    /// Builds the server and publishes the service facts. When TLS is
    /// requested but the cert/key cannot be loaded, the server downgrades to
    /// plain HTTP on the HTTP port and records a warning; subsequent
    /// [`service_facts`] reads observe the downgraded values.
    pub fn new(enable_tls: bool, cert_path: &str, key_path: &str, jwt: JwtManager) -> Self {
        let tls = if enable_tls {
            match load_tls_config(cert_path, key_path) {
                Ok(config) => {
                    info!("TLS enabled for control plane server, cert {cert_path}");
                    Some(config)
                }
                Err(e) => {
                    warn!("failed to load control plane TLS material, falling back to HTTP: {e}");
                    None
                }
            }
        } else {
            None
        };

        let facts = ServiceFacts {
            tls_enabled: tls.is_some(),
        };
        FACTS.get_or_init(|| facts);

        ControlPlaneServer {
            tls,
            jwt: web::Data::new(jwt),
        }
    }

    /// Binds the listener and returns the running server. Stop it through
    /// `Server::handle()`.
    pub fn bind(self) -> std::io::Result<actix_web::dev::Server> {
        let facts = service_facts();
        let addr = format!("0.0.0.0:{}", facts.port());
        info!("starting control plane server on {addr} ({})", facts.scheme());

        let jwt = self.jwt.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(jwt.clone())
                .service(healthz)
                .service(issue_token)
        })
        .shutdown_timeout(5);

        let server = match self.tls {
            Some(config) => server.bind_rustls_0_23(addr, config)?,
            None => server.bind(addr)?,
        };

        Ok(server.run())
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> anyhow::Result<rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;

    Ok(rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?)
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().json("ok")
}

#[derive(Deserialize)]
struct TokenRequest {
    subject: String,
    #[serde(default)]
    claims: Option<std::collections::BTreeMap<String, serde_json::Value>>,
}

#[post("/token")]
async fn issue_token(jwt: web::Data<JwtManager>, req: web::Json<TokenRequest>) -> impl Responder {
    match jwt.generate_token(&req.subject, req.claims.clone()) {
        Ok(token) => HttpResponse::Ok().json(serde_json::json!({ "token": token })),
        Err(e) => HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facts_follow_the_tls_flag() {
        let http = ServiceFacts { tls_enabled: false };
        assert_eq!(http.scheme(), "http");
        assert_eq!(http.port(), 9090);

        let https = ServiceFacts { tls_enabled: true };
        assert_eq!(https.scheme(), "https");
        assert_eq!(https.port(), 9443);
    }

    #[test]
    fn missing_cert_files_fail_the_tls_load() {
        assert!(load_tls_config("/does/not/exist.crt", "/does/not/exist.key").is_err());
    }
}
