//! Connection method resolution
//!
//! Each connection method is a row in a requirement table. The same
//! requirement checks that validate a descriptor also fill in the session
//! options, so every method goes through one code path.

use crate::config::{ConnectionMethod, DeviceDescriptor, ManagerSection};
use crate::fleet::session::Session;
use crate::transport::{Credentials, SessionOptions, TlsMaterial};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Why a descriptor could not be turned into a session
#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("Unknown connection method: {0}")]
    UnknownMethod(String),
    #[error("{method} requires a username and password")]
    MissingCredentials { method: ConnectionMethod },
    #[error("{method} requires an access token")]
    MissingAccessToken { method: ConnectionMethod },
    #[error("{method} requires a {kind} file, not found at '{path}'")]
    MissingCertificate {
        method: ConnectionMethod,
        kind: CertificateKind,
        path: String,
    },
    #[error("Failed to load TLS material from '{path}': {reason}")]
    TlsMaterial { path: String, reason: String },
}

/// Certificate file roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKind {
    CaCert,
    ClientCert,
    ClientKey,
}

impl std::fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateKind::CaCert => f.write_str("CA certificate"),
            CertificateKind::ClientCert => f.write_str("client certificate"),
            CertificateKind::ClientKey => f.write_str("client key"),
        }
    }
}

/// What a connection method demands of its descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Requirements {
    pub credentials: bool,
    pub ca: bool,
    pub client_pair: bool,
    pub token: bool,
}

impl Requirements {
    /// The requirement table
    pub fn for_method(method: ConnectionMethod) -> Self {
        let none = Self::default();
        match method {
            ConnectionMethod::Basic => none,
            ConnectionMethod::BasicWithUserCredential => Self {
                credentials: true,
                ..none
            },
            ConnectionMethod::BasicTls => Self { ca: true, ..none },
            ConnectionMethod::BasicTlsWithUserCredential => Self {
                credentials: true,
                ca: true,
                ..none
            },
            ConnectionMethod::Mtls => Self {
                ca: true,
                client_pair: true,
                ..none
            },
            ConnectionMethod::MtlsWithUserCredential => Self {
                credentials: true,
                ca: true,
                client_pair: true,
                ..none
            },
            ConnectionMethod::Thingsboard => Self { token: true, ..none },
        }
    }
}

/// Turns descriptors into ready-to-connect sessions
#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    keep_alive: Duration,
    connect_timeout: Duration,
}

impl ConnectionResolver {
    pub fn new(manager: &ManagerSection) -> Self {
        Self {
            keep_alive: manager.keep_alive(),
            connect_timeout: manager.connect_timeout(),
        }
    }

    /// Validate the descriptor for its method and build a fresh session
    ///
    /// Nothing touches the network; TLS files are read from disk.
    pub fn resolve(&self, descriptor: &DeviceDescriptor) -> Result<Arc<Session>, ResolveError> {
        let method = descriptor
            .connection_method
            .method()
            .ok_or_else(|| ResolveError::UnknownMethod(descriptor.connection_method.to_string()))?;

        info!(dev_id = %descriptor.dev_id, "Connection method is {}", method);

        let options = self.build_options(descriptor, method)?;
        Ok(Session::new(Arc::new(descriptor.clone()), method, options))
    }

    fn build_options(
        &self,
        descriptor: &DeviceDescriptor,
        method: ConnectionMethod,
    ) -> Result<SessionOptions, ResolveError> {
        let requirements = Requirements::for_method(method);
        let mut options =
            SessionOptions::new(descriptor.client_id(), &descriptor.endpoint, descriptor.port);
        options.keep_alive = self.keep_alive;
        options.connect_timeout = self.connect_timeout;

        if requirements.credentials {
            let username = non_empty(descriptor.username.as_deref());
            let password = non_empty(descriptor.password.as_deref());
            let (Some(username), Some(password)) = (username, password) else {
                return Err(ResolveError::MissingCredentials { method });
            };
            options.credentials = Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            });
        }

        if requirements.token {
            let token = non_empty(descriptor.access_token.as_deref())
                .ok_or(ResolveError::MissingAccessToken { method })?;
            options.credentials = Some(Credentials {
                username: token.to_string(),
                password: String::new(),
            });
        }

        if requirements.ca {
            // Check every file before reading any so the error names the first missing one
            let ca_path = require_file(method, CertificateKind::CaCert, descriptor.ca_cert_path())?;
            let client_paths = if requirements.client_pair {
                Some((
                    require_file(
                        method,
                        CertificateKind::ClientCert,
                        descriptor.client_cert_path(),
                    )?,
                    require_file(
                        method,
                        CertificateKind::ClientKey,
                        descriptor.client_key_path(),
                    )?,
                ))
            } else {
                None
            };

            let client_auth = match client_paths {
                Some((cert, key)) => Some((read_pem(&cert)?, read_pem(&key)?)),
                None => None,
            };
            options.tls = Some(TlsMaterial {
                ca: read_pem(&ca_path)?,
                client_auth,
            });
        }

        debug!(
            dev_id = %descriptor.dev_id,
            client_id = %options.client_id,
            tls = options.tls.is_some(),
            credentials = options.credentials.is_some(),
            "Resolved session options"
        );
        Ok(options)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn require_file(
    method: ConnectionMethod,
    kind: CertificateKind,
    path: Option<PathBuf>,
) -> Result<PathBuf, ResolveError> {
    match path {
        Some(path) if path.is_file() => Ok(path),
        other => Err(ResolveError::MissingCertificate {
            method,
            kind,
            path: other
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }),
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ResolveError> {
    let bytes = std::fs::read(path).map_err(|e| ResolveError::TlsMaterial {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if bytes.is_empty() {
        return Err(ResolveError::TlsMaterial {
            path: path.display().to_string(),
            reason: "file is empty".to_string(),
        });
    }
    Ok(bytes)
}
