//! Throwaway certificate authority for test registries
//!
//! Produces a self-signed CA whose certificate doubles as the serving
//! certificate for a single DNS name. Nothing here is meant to protect real
//! traffic; it only has to be trusted by the system under test.

use chrono::{Datelike, NaiveDate, Utc};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};

use crate::{Error, Result};

/// Organization written into generated subjects
pub const ORGANIZATION: &str = "Company, INC.";
/// Country written into generated subjects
pub const COUNTRY: &str = "US";
/// Years a generated CA stays valid
pub const VALIDITY_YEARS: i32 = 10;

const SERIAL: u64 = 2019;

/// PEM-encoded CA certificate and its private key
#[derive(Clone, Debug)]
pub struct CaBundle {
    /// CA certificate, also valid as a serving certificate for the DNS name
    pub cert_pem: String,
    /// PKCS#8 private key
    pub key_pem: String,
}

/// Generate a self-signed CA for `dns_name`
pub fn generate(dns_name: &str) -> Result<CaBundle> {
    validate_dns_name(dns_name)?;
    let san = Ia5String::try_from(dns_name.to_string())
        .map_err(|e| Error::certificate(format!("invalid DNS name {:?}: {}", dns_name, e)))?;

    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(dns_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn.push(DnType::CountryName, DnValue::Utf8String(COUNTRY.to_string()));
    params.distinguished_name = dn;
    params.subject_alt_names = vec![SanType::DnsName(san)];
    params.serial_number = Some(SerialNumber::from(SERIAL));

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];

    let (not_before, not_after) = validity(Utc::now().date_naive());
    params.not_before = rcgen::date_time_ymd(
        not_before.year(),
        not_before.month() as u8,
        not_before.day() as u8,
    );
    params.not_after = rcgen::date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );

    let key_pair = KeyPair::generate()
        .map_err(|e| Error::certificate(format!("failed to generate CA key: {}", e)))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::certificate(format!("failed to create CA cert: {}", e)))?;

    Ok(CaBundle {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Validity window starting on `today`.
///
/// A start on February 29th ends on March 1st when the end year has no leap
/// day.
fn validity(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let end_year = today.year() + VALIDITY_YEARS;
    let end = NaiveDate::from_ymd_opt(end_year, today.month(), today.day())
        .or_else(|| NaiveDate::from_ymd_opt(end_year, 3, 1))
        .unwrap_or(today);
    (today, end)
}

fn validate_dns_name(dns_name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::certificate(format!("invalid DNS name {:?}: {}", dns_name, reason));

    if dns_name.is_empty() {
        return Err(invalid("empty"));
    }
    if dns_name.len() > 253 {
        return Err(invalid("longer than 253 characters"));
    }
    for label in dns_name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid("labels must be 1-63 characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels must not start or end with '-'"));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(invalid("only letters, digits and '-' are allowed"));
        }
    }
    Ok(())
}
