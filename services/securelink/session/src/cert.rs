//! Human-readable certificate summaries for logging.

use x509_parser::extensions::GeneralName;

use crate::error::LinkError;

/// The parts of a certificate worth logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// DNS names from the subject alternative name extension
    pub dns_names: Vec<String>,
    /// End of validity, seconds since the Unix epoch
    pub not_after: i64,
}

/// Summarise a DER encoded certificate
pub fn describe_certificate(der: &[u8]) -> Result<CertificateInfo, LinkError> {
    let (_remaining, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| LinkError::Certificate(format!("{:?}", e)))?;

    let mut dns_names = Vec::new();
    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for general_name in &san_ext.value.general_names {
            if let GeneralName::DNSName(name) = general_name {
                dns_names.push(name.to_string());
            }
        }
    }

    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        dns_names,
        not_after: cert.validity().not_after.timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestPki;

    #[test]
    fn test_describe_leaf() {
        let pki = TestPki::new(&["localhost", "link.internal"]);
        let info = describe_certificate(&pki.leaf_der).unwrap();
        assert_eq!(info.subject, "CN=localhost");
        assert_eq!(info.issuer, "CN=securelink test ca");
        assert_eq!(info.dns_names, vec!["localhost", "link.internal"]);
        assert!(info.not_after > 0);
    }

    #[test]
    fn test_describe_garbage() {
        let err = describe_certificate(b"not der").unwrap_err();
        assert!(matches!(err, LinkError::Certificate(_)));
    }
}
