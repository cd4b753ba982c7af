//! Pairing record inspection

use anyhow::{Context, Result};
use il_core::tls::load_certificates;
use il_core::{DeviceConnector, LinkContext};
use il_protocol::{PairRecord, Udid};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::output::{format_pair_record, print_json};

/// The non-secret parts of a pairing record
#[derive(Debug, Clone, Serialize)]
pub struct PairRecordSummary {
    pub udid: String,
    pub host_id: String,
    pub system_buid: String,
    pub wifi_mac_address: String,
    pub escrow_bag_len: usize,
    pub host_certificate_sha256: Option<String>,
    pub device_certificate_sha256: Option<String>,
}

impl PairRecordSummary {
    pub fn from_record(udid: &Udid, record: &PairRecord) -> Self {
        Self {
            udid: udid.to_string(),
            host_id: record.host_id.clone(),
            system_buid: record.system_buid.clone(),
            wifi_mac_address: record.wifi_mac_address.clone(),
            escrow_bag_len: record.escrow_bag.len(),
            host_certificate_sha256: fingerprint(&record.host_certificate),
            device_certificate_sha256: fingerprint(&record.device_certificate),
        }
    }
}

/// SHA-256 of the first certificate in a PEM buffer
fn fingerprint(pem: &[u8]) -> Option<String> {
    let certs = load_certificates(pem).ok()?;
    let der: &[u8] = certs.first()?.as_ref();
    Some(hex::encode(Sha256::digest(der)))
}

/// Show the pairing record usbmuxd holds for the selected device
///
/// Private keys are never printed. With `pem`, the host certificate is
/// printed as stored.
pub async fn pair_record_command(ctx: &LinkContext, pem: bool, json: bool) -> Result<()> {
    let udid = ctx.select_device().await.context("No device selected")?;
    let record = ctx
        .pair_record(&udid)
        .await
        .with_context(|| format!("No pairing record for {}", udid))?;

    if pem {
        print!("{}", String::from_utf8_lossy(&record.host_certificate));
        return Ok(());
    }

    let summary = PairRecordSummary::from_record(&udid, &record);
    if json {
        print_json(&summary)?;
    } else {
        print!("{}", format_pair_record(&summary));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_without_certificates() {
        let record = PairRecord {
            host_id: "HOST".to_string(),
            escrow_bag: vec![1, 2, 3],
            ..Default::default()
        };
        let summary = PairRecordSummary::from_record(&Udid::new("DEADBEEF"), &record);
        assert_eq!(summary.udid, "DEADBEEF");
        assert_eq!(summary.escrow_bag_len, 3);
        assert!(summary.host_certificate_sha256.is_none());
        assert!(summary.device_certificate_sha256.is_none());
    }

    #[test]
    fn test_fingerprint_of_pem_certificate() {
        // Any DER body works; only the PEM framing is parsed
        let pem = b"-----BEGIN CERTIFICATE-----\nAQIDBA==\n-----END CERTIFICATE-----\n";
        let expected = hex::encode(Sha256::digest([1u8, 2, 3, 4]));
        assert_eq!(fingerprint(pem), Some(expected));
    }

    #[test]
    fn test_summary_serializes_without_secrets() {
        let record = PairRecord {
            host_private_key: b"secret".to_vec(),
            root_private_key: b"secret".to_vec(),
            ..Default::default()
        };
        let json =
            serde_json::to_string(&PairRecordSummary::from_record(&Udid::new("X"), &record))
                .unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("private"));
    }
}
