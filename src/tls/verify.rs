use std::path::Path;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use x509_parser::extensions::{GeneralName, ParsedExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub dns_names: Vec<String>,
    pub not_after: OffsetDateTime,
}

/// Reads the leaf certificate of a PEM file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub async fn inspect_certificate(path: &Path) -> Result<CertificateInfo> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_certificate(&contents)
}

/// # Errors
/// Returns an error if the bytes are not a PEM encoded X.509 certificate.
pub fn parse_certificate(pem_bytes: &[u8]) -> Result<CertificateInfo> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem_bytes)
        .map_err(|e| anyhow::anyhow!("Failed to parse PEM certificate: {e}"))?;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse X509 certificate: {e}"))?;

    let mut dns_names = Vec::new();
    for extension in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns_name) = name {
                    dns_names.push((*dns_name).to_string());
                }
            }
        }
    }
    Ok(CertificateInfo {
        dns_names,
        not_after: cert.validity().not_after.to_datetime(),
    })
}

/// Fails unless every name in `expected` appears among the SANs.
///
/// # Errors
/// Returns an error listing the missing names.
pub fn ensure_covers(info: &CertificateInfo, expected: &[&str]) -> Result<()> {
    if info.dns_names.is_empty() {
        anyhow::bail!("Certificate has no DNS subject alternative names");
    }
    let missing: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|name| !info.dns_names.iter().any(|dns| dns == name))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!(
            "Certificate does not cover {} (has {})",
            missing.join(", "),
            info.dns_names.join(", ")
        );
    }
    Ok(())
}
