//! Certificate Template Module
//!
//! Turns a validated [`CertificateProfile`] into an unsigned X.509 v3
//! `TBSCertificate` for either a self-signed root or an intermediate CA.
//!
//! # PKI Hierarchy Position
//! ```text
//! Root CA (self-signed)          CertificateDataType::RootCA
//!   └── Intermediate CA          CertificateDataType::IntermediateCA
//! ```
//!
//! # Certificate Properties
//! - **Version**: X.509v3
//! - **Serial Number**: 128 random bits from the HSM, forced positive
//! - **Subject**: C, O, CN from the profile
//! - **Validity**: UTCTime before 2050, GeneralizedTime from 2050
//! - **Basic Constraints**: CA=true, pathlen=1 (root) or pathlen=0 (intermediate), critical
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature, critical
//! - **Subject Key Identifier**: SHA-1 of the subject public key bits
//! - **Authority Key Identifier**: issuer's subject key identifier (intermediate only)
//! - **Authority Info Access**: OCSP and/or caIssuers URLs, when configured
//! - **CRL Distribution Points**: when a CRL URL is configured

use crate::algorithms::SignatureAlgorithm;
use crate::error::CeremonyError;
use crate::validation::CertificateProfile;
use chrono::{DateTime, Datelike, Utc};
use const_oid::db::rfc4519::{COMMON_NAME, COUNTRY_NAME, ORGANIZATION_NAME};
use const_oid::db::rfc5280::{
    ID_AD_CA_ISSUERS, ID_AD_OCSP, ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_BASIC_CONSTRAINTS,
    ID_CE_CRL_DISTRIBUTION_POINTS, ID_CE_KEY_USAGE, ID_CE_SUBJECT_KEY_IDENTIFIER,
    ID_PE_AUTHORITY_INFO_ACCESS,
};
use const_oid::ObjectIdentifier;
use std::time::Duration;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::der::asn1::{Any, Ia5String, OctetString, SetOfVec};
use x509_cert::der::{Encode, ErrorKind, Tag};
use x509_cert::ext::pkix::crl::dp::DistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AccessDescription, AuthorityInfoAccessSyntax, AuthorityKeyIdentifier, BasicConstraints,
    CrlDistributionPoints, KeyUsage, KeyUsages, SubjectKeyIdentifier,
};
use x509_cert::ext::Extension;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};

const ROOT_CA_PATH_LENGTH: u8 = 1;
const INTERMEDIATE_CA_PATH_LENGTH: u8 = 0;
const UTC_TIME_MAX_YEAR: i32 = 2049;

/// Earliest and latest years a validity timestamp can be encoded for
pub const VALIDITY_MIN_YEAR: i32 = 1970;
pub const VALIDITY_MAX_YEAR: i32 = 9999;

/// Length in bytes of a certificate serial number
pub const SERIAL_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateDataType {
    RootCA,
    IntermediateCA,
}

impl CertificateDataType {
    fn path_length(self) -> u8 {
        match self {
            CertificateDataType::RootCA => ROOT_CA_PATH_LENGTH,
            CertificateDataType::IntermediateCA => INTERMEDIATE_CA_PATH_LENGTH,
        }
    }
}

/// The issuing CA as seen by the certificate being built
#[derive(Debug, Clone)]
pub struct IssuerContext {
    pub name: Name,
    pub public_key: SubjectPublicKeyInfoOwned,
}

/// Unsigned certificate plus the algorithm it must be signed with
#[derive(Debug, Clone)]
pub struct CertificateTemplate {
    pub tbs: TbsCertificate,
    pub signature_algorithm: SignatureAlgorithm,
}

/// Turn random bytes into a positive, non-zero serial of the same length
pub fn serial_from_random(mut bytes: Vec<u8>) -> Vec<u8> {
    if let Some(first) = bytes.first_mut() {
        *first &= 0x7f;
        if *first == 0 {
            *first = 1;
        }
    }
    bytes
}

/// AlgorithmIdentifier for the certificate signature
pub fn signature_algorithm_identifier(algorithm: SignatureAlgorithm) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: algorithm.oid(),
        // RSA PKCS#1 v1.5 carries explicit NULL parameters, ECDSA carries none.
        parameters: algorithm.is_rsa().then(Any::null),
    }
}

/// SHA-1 over the subjectPublicKey bits (RFC 5280 section 4.2.1.2, method 1)
pub fn key_identifier(spki: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
    openssl::sha::sha1(spki.subject_public_key.raw_bytes()).to_vec()
}

fn attribute(
    oid: ObjectIdentifier,
    tag: Tag,
    value: &str,
) -> Result<RelativeDistinguishedName, CeremonyError> {
    let atv = AttributeTypeAndValue {
        oid,
        value: Any::new(tag, value.as_bytes().to_vec())?,
    };
    Ok(RelativeDistinguishedName(SetOfVec::try_from(vec![atv])?))
}

/// Subject name `C=<country>, O=<organization>, CN=<common name>`
pub fn subject_name(profile: &CertificateProfile) -> Result<Name, CeremonyError> {
    Ok(RdnSequence(vec![
        attribute(COUNTRY_NAME, Tag::PrintableString, &profile.country)?,
        attribute(ORGANIZATION_NAME, Tag::Utf8String, &profile.organization)?,
        attribute(COMMON_NAME, Tag::Utf8String, &profile.common_name)?,
    ]))
}

fn encode_time(timestamp: &DateTime<Utc>) -> Result<Time, CeremonyError> {
    let secs = u64::try_from(timestamp.timestamp())
        .map_err(|_| x509_cert::der::Error::from(ErrorKind::DateTime))?;
    let since_epoch = Duration::from_secs(secs);
    if timestamp.year() <= UTC_TIME_MAX_YEAR {
        Ok(Time::UtcTime(
            x509_cert::der::asn1::UtcTime::from_unix_duration(since_epoch)?,
        ))
    } else {
        Ok(Time::GeneralTime(
            x509_cert::der::asn1::GeneralizedTime::from_unix_duration(since_epoch)?,
        ))
    }
}

fn extension(
    oid: ObjectIdentifier,
    critical: bool,
    value: &impl Encode,
) -> Result<Extension, CeremonyError> {
    Ok(Extension {
        extn_id: oid,
        critical,
        extn_value: OctetString::new(value.to_der()?)?,
    })
}

fn uri(url: &str) -> Result<GeneralName, CeremonyError> {
    Ok(GeneralName::UniformResourceIdentifier(Ia5String::new(url)?))
}

/// Builder for unsigned CA certificates
///
/// # Required Fields
/// - `subject_public_key` - SubjectPublicKeyInfo of the key being certified
/// - `serial` - serial number bytes, see [`serial_from_random`]
/// - `issuer` - required for intermediates; a root is its own issuer
///
/// # Examples
/// ```rust,ignore
/// let template = CertificateTemplateBuilder::new(&profile, CertificateDataType::IntermediateCA)
///     .subject_public_key(subject_spki)
///     .issuer(issuer_context)
///     .serial(serial)
///     .build()?;
/// ```
pub struct CertificateTemplateBuilder<'a> {
    profile: &'a CertificateProfile,
    cert_type: CertificateDataType,
    subject_public_key: Option<SubjectPublicKeyInfoOwned>,
    issuer: Option<IssuerContext>,
    serial: Vec<u8>,
}

impl<'a> CertificateTemplateBuilder<'a> {
    pub fn new(profile: &'a CertificateProfile, cert_type: CertificateDataType) -> Self {
        Self {
            profile,
            cert_type,
            subject_public_key: None,
            issuer: None,
            serial: Vec::new(),
        }
    }

    pub fn subject_public_key(mut self, spki: SubjectPublicKeyInfoOwned) -> Self {
        self.subject_public_key = Some(spki);
        self
    }

    /// Set the issuing CA (ignored for a root, which issues itself)
    pub fn issuer(mut self, issuer: IssuerContext) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn serial(mut self, serial: Vec<u8>) -> Self {
        self.serial = serial;
        self
    }

    fn extensions(
        &self,
        subject: &SubjectPublicKeyInfoOwned,
        issuer: Option<&IssuerContext>,
    ) -> Result<Vec<Extension>, CeremonyError> {
        let profile = self.profile;
        let mut extensions = vec![
            extension(
                ID_CE_BASIC_CONSTRAINTS,
                true,
                &BasicConstraints {
                    ca: true,
                    path_len_constraint: Some(self.cert_type.path_length()),
                },
            )?,
            extension(
                ID_CE_KEY_USAGE,
                true,
                &KeyUsage(
                    KeyUsages::KeyCertSign | KeyUsages::CRLSign | KeyUsages::DigitalSignature,
                ),
            )?,
            extension(
                ID_CE_SUBJECT_KEY_IDENTIFIER,
                false,
                &SubjectKeyIdentifier(OctetString::new(key_identifier(subject))?),
            )?,
        ];

        if let Some(issuer) = issuer {
            extensions.push(extension(
                ID_CE_AUTHORITY_KEY_IDENTIFIER,
                false,
                &AuthorityKeyIdentifier {
                    key_identifier: Some(OctetString::new(key_identifier(&issuer.public_key))?),
                    authority_cert_issuer: None,
                    authority_cert_serial_number: None,
                },
            )?);
        }

        let mut access = Vec::new();
        if let Some(url) = &profile.ocsp_url {
            access.push(AccessDescription {
                access_method: ID_AD_OCSP,
                access_location: uri(url)?,
            });
        }
        if let Some(url) = &profile.issuer_url {
            access.push(AccessDescription {
                access_method: ID_AD_CA_ISSUERS,
                access_location: uri(url)?,
            });
        }
        if !access.is_empty() {
            extensions.push(extension(
                ID_PE_AUTHORITY_INFO_ACCESS,
                false,
                &AuthorityInfoAccessSyntax(access),
            )?);
        }

        if let Some(url) = &profile.crl_url {
            extensions.push(extension(
                ID_CE_CRL_DISTRIBUTION_POINTS,
                false,
                &CrlDistributionPoints(vec![DistributionPoint {
                    distribution_point: Some(DistributionPointName::FullName(vec![uri(url)?])),
                    reasons: None,
                    crl_issuer: None,
                }]),
            )?);
        }

        Ok(extensions)
    }

    /// Build the unsigned certificate
    ///
    /// # Errors
    /// Returns an error if the subject key or serial is missing, an intermediate
    /// has no issuer, or any field cannot be DER encoded.
    pub fn build(self) -> Result<CertificateTemplate, CeremonyError> {
        let subject_public_key = self.subject_public_key.clone().ok_or_else(|| {
            CeremonyError::InvalidPublicKey("no subject public key".to_string())
        })?;
        if self.serial.is_empty() {
            return Err(x509_cert::der::Error::from(ErrorKind::Length {
                tag: Tag::Integer,
            })
            .into());
        }

        let subject = subject_name(self.profile)?;
        let issuer = match self.cert_type {
            CertificateDataType::RootCA => None,
            CertificateDataType::IntermediateCA => Some(self.issuer.clone().ok_or_else(|| {
                CeremonyError::InvalidPublicKey(
                    "intermediate certificate has no issuer".to_string(),
                )
            })?),
        };
        let issuer_name = issuer
            .as_ref()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| subject.clone());

        let extensions = self.extensions(&subject_public_key, issuer.as_ref())?;
        let algorithm = self.profile.signature_algorithm;

        let tbs = TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(&self.serial)?,
            signature: signature_algorithm_identifier(algorithm),
            issuer: issuer_name,
            validity: Validity {
                not_before: encode_time(&self.profile.not_before)?,
                not_after: encode_time(&self.profile.not_after)?,
            },
            subject,
            subject_public_key_info: subject_public_key,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(extensions),
        };

        Ok(CertificateTemplate {
            tbs,
            signature_algorithm: algorithm,
        })
    }
}
