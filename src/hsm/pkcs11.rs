//! PKCS#11 implementation of the HSM session adapter, built on `cryptoki`

use super::{
    prompt_pin, HsmModule, HsmSession, KeyPairHandles, PublicKeyMaterial, SessionTarget,
    SignMechanism,
};
use crate::algorithms::{EcdsaCurve, HashAlgorithm, KeySpec};
use crate::error::{HsmError, HsmResult};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as Pkcs11Failure, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::{AuthPin, Ulong};
use x509_cert::der::asn1::{ObjectIdentifier, OctetString};
use x509_cert::der::{Decode, Encode};

const RSA_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// Vendor PKCS#11 library, loaded once per session
#[derive(Debug, Default, Clone, Copy)]
pub struct Pkcs11Module;

/// A logged-in R/W session
///
/// Field order matters: the session closes before the library is finalised.
pub struct Pkcs11Session {
    session: Session,
    slot: u64,
    _ctx: Pkcs11,
}

impl HsmModule for Pkcs11Module {
    type Session = Pkcs11Session;

    fn open_session(&self, target: &SessionTarget<'_>) -> HsmResult<Pkcs11Session> {
        let module = target.module.display().to_string();
        let ctx = Pkcs11::new(target.module).map_err(|e| HsmError::InitFailed {
            module: module.clone(),
            reason: e.to_string(),
        })?;
        ctx.initialize(CInitializeArgs::OsThreads)
            .map_err(|e| HsmError::InitFailed {
                module: module.clone(),
                reason: e.to_string(),
            })?;

        let slot = ctx
            .get_slots_with_token()
            .map_err(|e| HsmError::Pkcs11Error(format!("Failed to get slots: {}", e)))?
            .into_iter()
            .find(|s| s.id() == target.slot)
            .ok_or(HsmError::SlotNotFound(target.slot))?;

        let session = ctx
            .open_rw_session(slot)
            .map_err(|e| HsmError::Pkcs11Error(format!("Failed to open session: {}", e)))?;

        let prompted;
        let pin = match target.pin {
            Some(pin) => pin,
            None => {
                prompted = prompt_pin(target.slot)?;
                &prompted
            }
        };
        let auth_pin = AuthPin::new(pin.expose().to_string());
        session
            .login(UserType::User, Some(&auth_pin))
            .map_err(login_error)?;

        tracing::info!(
            target: "ceremony::hsm",
            module = %module,
            slot = target.slot,
            "PKCS#11 session opened"
        );

        Ok(Pkcs11Session {
            session,
            slot: target.slot,
            _ctx: ctx,
        })
    }
}

fn login_error(e: Pkcs11Failure) -> HsmError {
    match e {
        Pkcs11Failure::Pkcs11(RvError::PinIncorrect) => HsmError::InvalidPin,
        Pkcs11Failure::Pkcs11(RvError::PinLocked) => HsmError::PinLocked,
        other => HsmError::Pkcs11Error(format!("Login failed: {}", other)),
    }
}

impl Pkcs11Session {
    fn find(&self, template: &[Attribute]) -> HsmResult<Vec<ObjectHandle>> {
        self.session
            .find_objects(template)
            .map_err(|e| HsmError::Pkcs11Error(format!("Failed to find objects: {}", e)))
    }

    fn attributes(
        &self,
        handle: ObjectHandle,
        types: &[AttributeType],
    ) -> HsmResult<Vec<Attribute>> {
        self.session
            .get_attributes(handle, types)
            .map_err(|e| HsmError::Pkcs11Error(format!("Failed to read key attributes: {}", e)))
    }

    fn rsa_public_key(&self, handle: ObjectHandle) -> HsmResult<PublicKeyMaterial> {
        let mut modulus = None;
        let mut public_exponent = None;
        for attr in self.attributes(
            handle,
            &[AttributeType::Modulus, AttributeType::PublicExponent],
        )? {
            match attr {
                Attribute::Modulus(m) => modulus = Some(m),
                Attribute::PublicExponent(e) => public_exponent = Some(e),
                _ => {}
            }
        }
        match (modulus, public_exponent) {
            (Some(modulus), Some(public_exponent)) => Ok(PublicKeyMaterial::Rsa {
                modulus,
                public_exponent,
            }),
            _ => Err(HsmError::InvalidKeyFormat(
                "RSA public key is missing its modulus or exponent".to_string(),
            )),
        }
    }

    fn ec_public_key(&self, handle: ObjectHandle) -> HsmResult<PublicKeyMaterial> {
        let mut params = None;
        let mut point = None;
        for attr in self.attributes(handle, &[AttributeType::EcParams, AttributeType::EcPoint])? {
            match attr {
                Attribute::EcParams(p) => params = Some(p),
                Attribute::EcPoint(p) => point = Some(p),
                _ => {}
            }
        }
        let (Some(params), Some(point)) = (params, point) else {
            return Err(HsmError::InvalidKeyFormat(
                "EC public key is missing its parameters or point".to_string(),
            ));
        };

        let oid = ObjectIdentifier::from_der(&params)
            .map_err(|e| HsmError::InvalidKeyFormat(format!("EC parameters: {}", e)))?;
        let curve = [
            EcdsaCurve::P224,
            EcdsaCurve::P256,
            EcdsaCurve::P384,
            EcdsaCurve::P521,
        ]
        .into_iter()
        .find(|c| c.oid() == oid)
        .ok_or_else(|| HsmError::InvalidKeyFormat(format!("unsupported curve {}", oid)))?;

        Ok(PublicKeyMaterial::Ec {
            curve,
            point: unwrap_ec_point(&point, curve)?,
        })
    }
}

/// `CKA_EC_POINT` is a DER OCTET STRING holding the SEC1 point; some tokens
/// return the bare point instead.
fn unwrap_ec_point(value: &[u8], curve: EcdsaCurve) -> HsmResult<Vec<u8>> {
    let uncompressed_len = 1 + 2 * curve.scalar_len();
    if value.len() == uncompressed_len && value[0] == 0x04 {
        return Ok(value.to_vec());
    }
    let octets = OctetString::from_der(value)
        .map_err(|e| HsmError::InvalidKeyFormat(format!("EC point: {}", e)))?;
    let point = octets.as_bytes();
    if point.len() != uncompressed_len || point[0] != 0x04 {
        return Err(HsmError::InvalidKeyFormat(
            "EC point is not an uncompressed point".to_string(),
        ));
    }
    Ok(point.to_vec())
}

impl HsmSession for Pkcs11Session {
    type Handle = ObjectHandle;

    fn generate_key_pair(
        &self,
        label: &str,
        spec: &KeySpec,
    ) -> HsmResult<KeyPairHandles<ObjectHandle>> {
        let label_bytes = label.as_bytes().to_vec();
        let existing = self.find(&[
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Label(label_bytes.clone()),
        ])?;
        if !existing.is_empty() {
            return Err(HsmError::LabelExists(label.to_string()));
        }

        let (mechanism, mut pub_template) = match spec {
            KeySpec::Rsa { mod_length } => (
                Mechanism::RsaPkcsKeyPairGen,
                vec![
                    Attribute::ModulusBits(Ulong::from(u64::from(mod_length.bits()))),
                    Attribute::PublicExponent(RSA_PUBLIC_EXPONENT.to_vec()),
                ],
            ),
            KeySpec::Ecdsa { curve } => {
                let ec_params = curve
                    .oid()
                    .to_der()
                    .map_err(|e| HsmError::KeyGenerationFailed(e.to_string()))?;
                (
                    Mechanism::EccKeyPairGen,
                    vec![Attribute::EcParams(ec_params)],
                )
            }
        };
        pub_template.extend([
            Attribute::Label(label_bytes.clone()),
            Attribute::Token(true),
            Attribute::Verify(true),
        ]);
        let priv_template = vec![
            Attribute::Label(label_bytes),
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Sign(true),
            Attribute::Extractable(false),
        ];

        tracing::debug!(
            target: "ceremony::hsm",
            slot = self.slot,
            %spec,
            label,
            "generating key pair"
        );
        let (public, private) = self
            .session
            .generate_key_pair(&mechanism, &pub_template, &priv_template)
            .map_err(|e| HsmError::KeyGenerationFailed(e.to_string()))?;

        Ok(KeyPairHandles { public, private })
    }

    fn public_key(&self, handle: ObjectHandle) -> HsmResult<PublicKeyMaterial> {
        let key_type = self
            .attributes(handle, &[AttributeType::KeyType])?
            .into_iter()
            .find_map(|attr| match attr {
                Attribute::KeyType(kt) => Some(kt),
                _ => None,
            })
            .ok_or_else(|| HsmError::InvalidKeyFormat("key has no CKA_KEY_TYPE".to_string()))?;

        if key_type == KeyType::RSA {
            self.rsa_public_key(handle)
        } else if key_type == KeyType::EC {
            self.ec_public_key(handle)
        } else {
            Err(HsmError::InvalidKeyFormat(format!(
                "unsupported key type {:?}",
                key_type
            )))
        }
    }

    fn set_key_id(&self, pair: &KeyPairHandles<ObjectHandle>, id: &[u8]) -> HsmResult<()> {
        for handle in [pair.public, pair.private] {
            self.session
                .update_attributes(handle, &[Attribute::Id(id.to_vec())])
                .map_err(|e| HsmError::Pkcs11Error(format!("Failed to set key ID: {}", e)))?;
        }
        Ok(())
    }

    fn find_private_key(&self, label: &str, id: &[u8]) -> HsmResult<ObjectHandle> {
        let objects = self.find(&[
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Label(label.as_bytes().to_vec()),
            Attribute::Id(id.to_vec()),
        ])?;
        match objects.as_slice() {
            [handle] => Ok(*handle),
            [] => Err(HsmError::KeyNotFound {
                label: label.to_string(),
                id: hex::encode(id),
            }),
            _ => Err(HsmError::AmbiguousKey {
                label: label.to_string(),
                id: hex::encode(id),
                count: objects.len(),
            }),
        }
    }

    fn sign(
        &self,
        key: ObjectHandle,
        mechanism: SignMechanism,
        data: &[u8],
    ) -> HsmResult<Vec<u8>> {
        let mechanism = match mechanism {
            SignMechanism::RsaPkcs(HashAlgorithm::Sha256) => Mechanism::Sha256RsaPkcs,
            SignMechanism::RsaPkcs(HashAlgorithm::Sha384) => Mechanism::Sha384RsaPkcs,
            SignMechanism::RsaPkcs(HashAlgorithm::Sha512) => Mechanism::Sha512RsaPkcs,
            SignMechanism::Ecdsa => Mechanism::Ecdsa,
        };
        self.session
            .sign(&mechanism, key, data)
            .map_err(|e| HsmError::SigningFailed(e.to_string()))
    }

    fn random_bytes(&self, len: usize) -> HsmResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.session
            .generate_random_slice(&mut buf)
            .map_err(|e| HsmError::Pkcs11Error(format!("Failed to generate random bytes: {}", e)))?;
        Ok(buf)
    }
}

impl Drop for Pkcs11Session {
    fn drop(&mut self) {
        if let Err(e) = self.session.logout() {
            tracing::debug!(target: "ceremony::hsm", slot = self.slot, "logout failed: {}", e);
        }
    }
}
