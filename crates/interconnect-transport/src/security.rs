use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// TLS settings handed to a [`TransportFactory`](crate::TransportFactory).
///
/// The protocol engine never inspects these; they are carried to whichever
/// factory performs the TLS handshake. Field names follow the JSON shape
/// used by existing configuration files.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Path to the local certificate (PKCS#12 bundle).
    pub certificate_path: Option<String>,
    /// Password protecting the certificate bundle. Redacted in debug output.
    pub certificate_password: Option<String>,
    /// Whether the remote certificate is checked against the whitelists below.
    pub validate_remote_certificate: bool,
    /// Subject attribute sets a remote certificate may match.
    pub allowed_certificates: Vec<CertificateAttributes>,
    /// Issuer attribute sets a remote certificate's issuer may match.
    pub allowed_issuers: Vec<CertificateAttributes>,
}

impl SecurityConfig {
    /// Parse a configuration from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decide whether a remote certificate with the given subject and issuer
    /// attributes is acceptable.
    ///
    /// Validation disabled permits everything. Each whitelist is only
    /// consulted when it is non-empty.
    pub fn authorizes(
        &self,
        subject: &CertificateAttributes,
        issuer: &CertificateAttributes,
    ) -> bool {
        if !self.validate_remote_certificate {
            return true;
        }
        if !self.allowed_issuers.is_empty() && !issuer.matches_any(&self.allowed_issuers) {
            tracing::warn!("remote certificate failed issuer validation");
            return false;
        }
        if !self.allowed_certificates.is_empty() && !subject.matches_any(&self.allowed_certificates)
        {
            tracing::warn!("remote certificate failed subject validation");
            return false;
        }
        true
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("SecurityConfig");
        dbg.field("certificate_path", &self.certificate_path);
        if let Some(password) = &self.certificate_password {
            dbg.field(
                "certificate_password",
                &format_args!("<redacted:{} bytes>", password.len()),
            );
        } else {
            dbg.field("certificate_password", &Option::<String>::None);
        }
        dbg.field(
            "validate_remote_certificate",
            &self.validate_remote_certificate,
        )
        .field("allowed_certificates", &self.allowed_certificates)
        .field("allowed_issuers", &self.allowed_issuers)
        .finish()
    }
}

/// Distinguished-name attributes of a certificate subject or issuer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CertificateAttributes {
    #[serde(rename = "cn")]
    pub common_name: Option<String>,
    #[serde(rename = "ou")]
    pub organisational_units: Vec<String>,
    #[serde(rename = "o")]
    pub organisation: Option<String>,
}

impl CertificateAttributes {
    /// Parse a distinguished-name string such as `CN=host, OU=ops, O=Example`.
    ///
    /// Values are trimmed; interior whitespace is kept. Keys other than
    /// `CN`, `OU` and `O` are ignored, as are segments without `=`.
    pub fn parse(dn: &str) -> Self {
        let mut attributes = Self::default();

        for segment in dn.split(',') {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim().to_ascii_uppercase().as_str() {
                "CN" => attributes.common_name = Some(value),
                "OU" => attributes.organisational_units.push(value),
                "O" => attributes.organisation = Some(value),
                _ => {}
            }
        }

        attributes
    }

    /// Number of attributes present. Empty names do not count.
    pub fn count(&self) -> usize {
        let mut total = self.organisational_units.len();
        if self.common_name.as_deref().is_some_and(|cn| !cn.is_empty()) {
            total += 1;
        }
        if self.organisation.as_deref().is_some_and(|o| !o.is_empty()) {
            total += 1;
        }
        total
    }

    /// True if every attribute of at least one whitelist entry is present
    /// in `self`, compared case-insensitively.
    pub fn matches_any(&self, whitelist: &[CertificateAttributes]) -> bool {
        whitelist.iter().any(|expected| {
            let mut matched = 0;

            if let Some(cn) = expected.common_name.as_deref().filter(|cn| !cn.is_empty()) {
                if eq_ignore_case(Some(cn), self.common_name.as_deref()) {
                    matched += 1;
                }
            }

            matched += expected
                .organisational_units
                .iter()
                .filter(|required| {
                    self.organisational_units
                        .iter()
                        .any(|ou| ou.to_lowercase() == required.to_lowercase())
                })
                .count();

            if let Some(o) = expected.organisation.as_deref().filter(|o| !o.is_empty()) {
                if eq_ignore_case(Some(o), self.organisation.as_deref()) {
                    matched += 1;
                }
            }

            matched == expected.count()
        })
    }
}

fn eq_ignore_case(left: Option<&str>, right: Option<&str>) -> bool {
    match (left, right) {
        (Some(l), Some(r)) => l.to_lowercase() == r.to_lowercase(),
        _ => false,
    }
}
