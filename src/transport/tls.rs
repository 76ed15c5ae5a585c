//! TLS bootstrap for the remote API
//!
//! Certificate material is resolved once per process into an immutable
//! [`TransportConfig`]:
//!
//! | cert + key | CA  | `--tls` | result                                       |
//! |------------|-----|---------|----------------------------------------------|
//! | yes        | no  | any     | TLS, local identity, peer not verified       |
//! | yes        | yes | any     | TLS, local identity, peer must chain to CA   |
//! | only one   | any | any     | fatal: cert and key go together              |
//! | no         | yes | any     | fatal: mutual auth needs a local identity    |
//! | no         | no  | yes     | TLS, no identity, system roots (client only) |
//! | no         | no  | no      | plaintext                                    |
//!
//! `--tlsverify` without a CA is fatal as well. Any unreadable or unparsable
//! file aborts startup.

use crate::error::{Result, RuneError};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// TLS-related command-line inputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Use TLS even without certificate material
    pub tls: bool,
    /// Require the peer to present a certificate signed by the CA
    pub verify: bool,
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl TlsOptions {
    /// Whether any TLS input was given
    pub fn requested(&self) -> bool {
        self.tls || self.verify || self.ca.is_some() || self.cert.is_some() || self.key.is_some()
    }

    /// Check how the inputs combine, without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        let has_identity = match (&self.cert, &self.key) {
            (Some(_), Some(_)) => true,
            (None, None) => false,
            _ => {
                return Err(RuneError::InvalidConfig(
                    "TLS enabled but certificate/key missing: need both --tlscert and --tlskey".into(),
                ))
            }
        };
        if self.ca.is_some() && !has_identity {
            return Err(RuneError::InvalidConfig(
                "--tlscacert requires --tlscert and --tlskey for mutual authentication".into(),
            ));
        }
        if self.verify && self.ca.is_none() {
            return Err(RuneError::InvalidConfig(
                "--tlsverify requires --tlscacert".into(),
            ));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the listening side's rule: any TLS
    /// input requires a local certificate and key.
    pub fn validate_server(&self) -> Result<()> {
        self.validate()?;
        if self.requested() && (self.cert.is_none() || self.key.is_none()) {
            return Err(RuneError::InvalidConfig(
                "serving TLS requires --tlscert and --tlskey".into(),
            ));
        }
        Ok(())
    }
}

/// Local certificate chain and its private key
struct Identity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

/// Resolved TLS identity and trust material, immutable once loaded
pub struct TransportConfig {
    identity: Option<Identity>,
    roots: Option<Arc<RootCertStore>>,
    verify_peer: bool,
}

impl TransportConfig {
    /// Resolve the options into a configuration, or `None` for plaintext.
    pub fn load(options: &TlsOptions) -> Result<Option<Self>> {
        options.validate()?;
        if !options.requested() {
            debug!("no TLS material given, remote API runs in the clear");
            return Ok(None);
        }

        let identity = match (&options.cert, &options.key) {
            (Some(cert), Some(key)) => Some(load_identity(cert, key)?),
            _ => None,
        };
        let roots = match &options.ca {
            Some(ca) => Some(Arc::new(load_roots(ca)?)),
            None => None,
        };
        let verify_peer = roots.is_some();

        info!(
            identity = identity.is_some(),
            verify_peer,
            "TLS transport configured"
        );
        Ok(Some(Self {
            identity,
            roots,
            verify_peer,
        }))
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub fn verifies_peer(&self) -> bool {
        self.verify_peer
    }

    /// CA certificates peers must chain to, when verifying
    pub fn trusted_roots(&self) -> Option<&RootCertStore> {
        self.roots.as_deref()
    }

    /// Server-side configuration; requires a local identity.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let identity = self.identity.as_ref().ok_or_else(|| {
            RuneError::Tls("serving TLS requires --tlscert and --tlskey".into())
        })?;

        let builder =
            ServerConfig::builder_with_provider(provider()).with_safe_default_protocol_versions()?;
        let builder = match (&self.roots, self.verify_peer) {
            (Some(roots), true) => {
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::clone(roots), provider())
                        .build()
                        .map_err(|e| RuneError::Tls(format!("client verifier: {}", e)))?;
                builder.with_client_cert_verifier(verifier)
            }
            _ => builder.with_no_client_auth(),
        };

        let config = builder.with_single_cert(identity.chain.clone(), identity.key.clone_key())?;
        Ok(Arc::new(config))
    }

    /// Client-side configuration.
    ///
    /// Trusts only the CA when one was loaded, the bundled WebPKI roots
    /// otherwise; presents the local identity when there is one.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let roots = match &self.roots {
            Some(roots) => Arc::clone(roots),
            None => Arc::new(RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            }),
        };

        let builder = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots);
        let config = match &self.identity {
            Some(identity) => {
                builder.with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())?
            }
            None => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("identity", &self.identity.as_ref().map(|i| i.chain.len()))
            .field("roots", &self.roots.as_ref().map(|r| r.len()))
            .field("verify_peer", &self.verify_peer)
            .finish()
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| RuneError::Tls(format!("couldn't read {} {}: {}", what, path.display(), e)))?;
    Ok(BufReader::new(file))
}

fn load_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, what)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RuneError::Tls(format!("couldn't parse {} {}: {}", what, path.display(), e)))?;
    if certs.is_empty() {
        return Err(RuneError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_identity(cert: &Path, key: &Path) -> Result<Identity> {
    let chain = load_certs(cert, "certificate")?;

    let mut reader = open(key, "key")?;
    let key_der = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| RuneError::Tls(format!("couldn't parse key {}: {}", key.display(), e)))?
        .ok_or_else(|| RuneError::Tls(format!("no private key found in {}", key.display())))?;

    // Reject key types the provider can't sign with now rather than at the first handshake.
    provider()
        .key_provider
        .load_private_key(key_der.clone_key())
        .map_err(|e| RuneError::Tls(format!("unusable key {}: {}", key.display(), e)))?;

    debug!(cert = %cert.display(), key = %key.display(), "loaded X509 key pair");
    Ok(Identity {
        chain,
        key: key_der,
    })
}

fn load_roots(ca: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca, "CA certificate")? {
        roots
            .add(cert)
            .map_err(|e| RuneError::Tls(format!("invalid CA certificate {}: {}", ca.display(), e)))?;
    }
    debug!(ca = %ca.display(), count = roots.len(), "loaded trusted roots");
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
    use rustls::pki_types::ServerName;
    use std::io;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::{TlsAcceptor, TlsConnector};

    struct Authority {
        cert: Certificate,
        key: KeyPair,
    }

    impl Authority {
        fn new(name: &str) -> Self {
            let key = KeyPair::generate().unwrap();
            let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.distinguished_name.push(DnType::CommonName, name);
            let cert = params.self_signed(&key).unwrap();
            Self { cert, key }
        }

        fn issue(&self, name: &str) -> (String, String) {
            let key = KeyPair::generate().unwrap();
            let mut params =
                CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
                    .unwrap();
            params.distinguished_name.push(DnType::CommonName, name);
            let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
            (cert.pem(), key.serialize_pem())
        }
    }

    struct Fixtures {
        dir: TempDir,
    }

    impl Fixtures {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn write(&self, name: &str, contents: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }

        fn ca(&self, name: &str, authority: &Authority) -> PathBuf {
            self.write(name, &authority.cert.pem())
        }

        fn pair(&self, prefix: &str, authority: &Authority) -> (PathBuf, PathBuf) {
            let (cert, key) = authority.issue(prefix);
            (
                self.write(&format!("{}.crt", prefix), &cert),
                self.write(&format!("{}.key", prefix), &key),
            )
        }
    }

    fn options(cert: Option<&PathBuf>, key: Option<&PathBuf>, ca: Option<&PathBuf>) -> TlsOptions {
        TlsOptions {
            cert: cert.cloned(),
            key: key.cloned(),
            ca: ca.cloned(),
            ..TlsOptions::default()
        }
    }

    async fn handshake(server: Arc<ServerConfig>, client: Arc<ClientConfig>) -> io::Result<()> {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let acceptor = TlsAcceptor::from(server);
        let connector = TlsConnector::from(client);
        let name = ServerName::try_from("localhost").unwrap();

        let serve = async move {
            let mut stream = acceptor.accept(server_io).await?;
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            stream.write_all(b"pong").await?;
            stream.flush().await
        };
        let call = async move {
            let mut stream = connector.connect(name, client_io).await?;
            stream.write_all(b"ping").await?;
            stream.flush().await?;
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            assert_eq!(&buf, b"pong");
            Ok(())
        };

        let joined = tokio::time::timeout(Duration::from_secs(5), async {
            let (served, called) = tokio::join!(serve, call);
            served.and(called)
        });
        joined
            .await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "handshake timed out")))
    }

    #[test]
    fn test_no_material_is_plaintext() {
        assert!(TransportConfig::load(&TlsOptions::default()).unwrap().is_none());
    }

    #[test]
    fn test_explicit_tls_without_material() {
        let options = TlsOptions {
            tls: true,
            ..TlsOptions::default()
        };
        let config = TransportConfig::load(&options).unwrap().unwrap();
        assert!(!config.has_identity());
        assert!(!config.verifies_peer());
        assert!(config.client_config().is_ok());
        assert!(matches!(config.server_config(), Err(RuneError::Tls(_))));
    }

    #[test]
    fn test_cert_and_key_without_ca() {
        let fixtures = Fixtures::new();
        let ca = Authority::new("Rune Test CA");
        let (cert, key) = fixtures.pair("server", &ca);

        let config = TransportConfig::load(&options(Some(&cert), Some(&key), None))
            .unwrap()
            .unwrap();
        assert!(config.has_identity());
        assert!(!config.verifies_peer());
        assert!(config.trusted_roots().is_none());
        assert!(config.server_config().is_ok());
    }

    #[test]
    fn test_full_triple_verifies_peer() {
        let fixtures = Fixtures::new();
        let ca = Authority::new("Rune Test CA");
        let ca_path = fixtures.ca("ca.crt", &ca);
        let (cert, key) = fixtures.pair("server", &ca);

        let config = TransportConfig::load(&options(Some(&cert), Some(&key), Some(&ca_path)))
            .unwrap()
            .unwrap();
        assert!(config.has_identity());
        assert!(config.verifies_peer());
        assert_eq!(config.trusted_roots().unwrap().len(), 1);
    }

    #[test]
    fn test_ca_without_identity_is_fatal() {
        let fixtures = Fixtures::new();
        let ca = Authority::new("Rune Test CA");
        let ca_path = fixtures.ca("ca.crt", &ca);
        let (cert, key) = fixtures.pair("server", &ca);

        for opts in [
            options(None, None, Some(&ca_path)),
            options(Some(&cert), None, Some(&ca_path)),
            options(None, Some(&key), Some(&ca_path)),
        ] {
            assert!(matches!(
                TransportConfig::load(&opts),
                Err(RuneError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_half_pair_is_fatal() {
        let cert = PathBuf::from("/nonexistent/server.crt");
        let err = TransportConfig::load(&options(Some(&cert), None, None)).unwrap_err();
        assert!(err.to_string().contains("certificate/key missing"));
    }

    #[test]
    fn test_verify_without_ca_is_fatal() {
        let options = TlsOptions {
            verify: true,
            ..TlsOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_server_needs_identity_for_tls() {
        let bare = TlsOptions {
            tls: true,
            ..TlsOptions::default()
        };
        assert!(bare.validate().is_ok());
        assert!(matches!(
            bare.validate_server(),
            Err(RuneError::InvalidConfig(_))
        ));

        let cert = PathBuf::from("server.crt");
        let key = PathBuf::from("server.key");
        assert!(options(Some(&cert), Some(&key), None).validate_server().is_ok());
        assert!(TlsOptions::default().validate_server().is_ok());
    }

    #[test]
    fn test_unreadable_or_garbage_files_are_fatal() {
        let fixtures = Fixtures::new();
        let missing = fixtures.dir.path().join("missing.crt");
        let garbage = fixtures.write("garbage.pem", "not a certificate\n");

        let err = TransportConfig::load(&options(Some(&missing), Some(&garbage), None)).unwrap_err();
        assert!(matches!(err, RuneError::Tls(_)));

        let err = TransportConfig::load(&options(Some(&garbage), Some(&garbage), None)).unwrap_err();
        assert!(err.to_string().contains("no certificates found"));

        let ca = Authority::new("Rune Test CA");
        let (cert, _key) = fixtures.pair("server", &ca);
        let err = TransportConfig::load(&options(Some(&cert), Some(&garbage), None)).unwrap_err();
        assert!(err.to_string().contains("no private key found"));
    }

    #[tokio::test]
    async fn test_trust_set_accepts_only_the_loaded_ca() {
        let fixtures = Fixtures::new();
        let ca = Authority::new("Rune Test CA");
        let rogue = Authority::new("Rogue CA");
        let ca_path = fixtures.ca("ca.crt", &ca);
        let (server_cert, server_key) = fixtures.pair("server", &ca);
        let (client_cert, client_key) = fixtures.pair("client", &ca);
        let (rogue_cert, rogue_key) = fixtures.pair("rogue", &rogue);

        let server = TransportConfig::load(&options(Some(&server_cert), Some(&server_key), Some(&ca_path)))
            .unwrap()
            .unwrap()
            .server_config()
            .unwrap();

        let trusted = TransportConfig::load(&options(Some(&client_cert), Some(&client_key), Some(&ca_path)))
            .unwrap()
            .unwrap()
            .client_config()
            .unwrap();
        handshake(Arc::clone(&server), trusted).await.unwrap();

        let untrusted = TransportConfig::load(&options(Some(&rogue_cert), Some(&rogue_key), Some(&ca_path)))
            .unwrap()
            .unwrap()
            .client_config()
            .unwrap();
        assert!(handshake(Arc::clone(&server), untrusted).await.is_err());
    }

    #[tokio::test]
    async fn test_server_without_ca_accepts_any_client() {
        let fixtures = Fixtures::new();
        let ca = Authority::new("Rune Test CA");
        let rogue = Authority::new("Rogue CA");
        let ca_path = fixtures.ca("ca.crt", &ca);
        let (server_cert, server_key) = fixtures.pair("server", &ca);
        let (rogue_cert, rogue_key) = fixtures.pair("rogue", &rogue);

        let server = TransportConfig::load(&options(Some(&server_cert), Some(&server_key), None))
            .unwrap()
            .unwrap()
            .server_config()
            .unwrap();
        let client = TransportConfig::load(&options(Some(&rogue_cert), Some(&rogue_key), Some(&ca_path)))
            .unwrap()
            .unwrap()
            .client_config()
            .unwrap();
        handshake(server, client).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_rejects_server_outside_ca() {
        let fixtures = Fixtures::new();
        let ca = Authority::new("Rune Test CA");
        let rogue = Authority::new("Rogue CA");
        let ca_path = fixtures.ca("ca.crt", &ca);
        let (rogue_cert, rogue_key) = fixtures.pair("rogue-server", &rogue);
        let (client_cert, client_key) = fixtures.pair("client", &ca);

        let server = TransportConfig::load(&options(Some(&rogue_cert), Some(&rogue_key), None))
            .unwrap()
            .unwrap()
            .server_config()
            .unwrap();
        let client = TransportConfig::load(&options(Some(&client_cert), Some(&client_key), Some(&ca_path)))
            .unwrap()
            .unwrap()
            .client_config()
            .unwrap();
        assert!(handshake(server, client).await.is_err());
    }
}
