//! TLS client configuration from pairing material
//!
//! The device presents a certificate signed by the root in the pairing
//! record, not by any public CA, and identifies itself by nothing a name
//! check could use. Trust comes from both sides holding the pairing record,
//! so server-certificate validation is disabled; handshake signatures are
//! still checked so the session keys belong to whoever holds the certificate.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use il_protocol::PairRecord;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
    ServerName, UnixTime,
};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Result, TlsError};
use crate::stream::BoxedStream;

/// Accepts any server certificate, verifies handshake signatures
#[derive(Debug)]
struct PairedDeviceVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PairedDeviceVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a client config presenting the pairing record's host identity
pub fn client_config(record: &PairRecord) -> Result<Arc<ClientConfig>, TlsError> {
    if record.host_certificate.is_empty() {
        return Err(TlsError::MissingMaterial("host certificate"));
    }
    if record.host_private_key.is_empty() {
        return Err(TlsError::MissingMaterial("host private key"));
    }

    let certs = load_certificates(&record.host_certificate)?;
    let key = load_private_key(&record.host_private_key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PairedDeviceVerifier {
        provider: Arc::clone(&provider),
    };

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(certs, key)?;

    Ok(Arc::new(config))
}

/// Run a client handshake over `stream`
///
/// On failure the stream has been consumed and dropped, which closes it.
pub async fn connect(stream: BoxedStream, record: &PairRecord) -> Result<TlsStream<BoxedStream>> {
    let config = client_config(record)?;
    let connector = TlsConnector::from(config);

    // An IP server name suppresses SNI; the device ignores it anyway
    let server_name = ServerName::from(IpAddr::V4(Ipv4Addr::LOCALHOST));

    match connector.connect(server_name, stream).await {
        Ok(tls) => {
            tracing::debug!("TLS handshake complete");
            Ok(tls)
        }
        Err(e) => {
            tracing::warn!(error = %e, "TLS handshake failed");
            Err(TlsError::Handshake(e).into())
        }
    }
}

/// Split a buffer into its PEM blocks
fn pem_blocks(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>, TlsError> {
    let text =
        std::str::from_utf8(data).map_err(|_| TlsError::InvalidPem("not UTF-8".to_string()))?;

    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("-----BEGIN ") {
        let after = &rest[start..];
        let end_marker = after
            .find("-----END ")
            .ok_or_else(|| TlsError::InvalidPem("unterminated block".to_string()))?;
        let line_end = after[end_marker..]
            .find('\n')
            .map(|i| end_marker + i + 1)
            .unwrap_or(after.len());

        let block = after[..line_end].trim_end();
        let (label, der) = pem_rfc7468::decode_vec(block.as_bytes())
            .map_err(|e| TlsError::InvalidPem(e.to_string()))?;
        blocks.push((label.to_string(), der));

        rest = &after[line_end..];
    }

    if blocks.is_empty() {
        return Err(TlsError::InvalidPem("no PEM block found".to_string()));
    }
    Ok(blocks)
}

/// DER certificates from the `CERTIFICATE` blocks of a PEM buffer
pub fn load_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<_> = pem_blocks(pem)?
        .into_iter()
        .filter(|(label, _)| label == "CERTIFICATE")
        .map(|(_, der)| CertificateDer::from(der))
        .collect();

    if certs.is_empty() {
        return Err(TlsError::InvalidPem("no CERTIFICATE block".to_string()));
    }
    Ok(certs)
}

fn load_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    let (label, der) = pem_blocks(pem)?
        .into_iter()
        .next()
        .ok_or_else(|| TlsError::InvalidPem("no key block".to_string()))?;

    match label.as_str() {
        "RSA PRIVATE KEY" => Ok(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(der))),
        "PRIVATE KEY" => Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der))),
        "EC PRIVATE KEY" => Ok(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der))),
        other => Err(TlsError::UnsupportedKey(other.to_string())),
    }
}
