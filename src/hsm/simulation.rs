//! In-memory software token for tests
//!
//! Keys are ordinary openssl keys held in process memory. The token state is
//! shared between every session opened from the same [`SoftHsm`], so a key
//! generated by one ceremony can be used by the next, as on a real device.

use super::{
    HsmModule, HsmSession, KeyPairHandles, PublicKeyMaterial, SessionTarget, SignMechanism,
};
use crate::algorithms::{EcdsaCurve, KeySpec};
use crate::error::{HsmError, HsmResult};
use openssl::bn::BigNumContext;
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::ecdsa::EcdsaSig;
use openssl::pkey::{Id, PKey, Private};
use openssl::rand::rand_bytes;
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectClass {
    PublicKey,
    PrivateKey,
}

struct SoftObject {
    class: ObjectClass,
    label: String,
    id: Vec<u8>,
    key: PKey<Private>,
}

#[derive(Default)]
struct SoftToken {
    objects: Vec<SoftObject>,
    sessions_opened: usize,
}

/// A software token in one slot, protected by a PIN
#[derive(Clone)]
pub struct SoftHsm {
    slot: u64,
    pin: String,
    token: Rc<RefCell<SoftToken>>,
    corrupt_signatures: Rc<Cell<bool>>,
}

pub struct SoftSession {
    token: Rc<RefCell<SoftToken>>,
    corrupt_signatures: Rc<Cell<bool>>,
}

impl SoftHsm {
    pub fn new(slot: u64, pin: &str) -> Self {
        Self {
            slot,
            pin: pin.to_string(),
            token: Rc::new(RefCell::new(SoftToken::default())),
            corrupt_signatures: Rc::new(Cell::new(false)),
        }
    }

    pub fn sessions_opened(&self) -> usize {
        self.token.borrow().sessions_opened
    }

    pub fn private_key_count(&self) -> usize {
        self.token
            .borrow()
            .objects
            .iter()
            .filter(|o| o.class == ObjectClass::PrivateKey)
            .count()
    }

    /// Make every subsequent signature invalid
    pub fn corrupt_signatures(&self) {
        self.corrupt_signatures.set(true);
    }
}

impl HsmModule for SoftHsm {
    type Session = SoftSession;

    fn open_session(&self, target: &SessionTarget<'_>) -> HsmResult<SoftSession> {
        self.token.borrow_mut().sessions_opened += 1;
        if target.slot != self.slot {
            return Err(HsmError::SlotNotFound(target.slot));
        }
        // No terminal in tests: the interactive prompt of the PKCS#11 module
        // is not simulated.
        match target.pin {
            None => return Err(HsmError::PinRequired),
            Some(pin) if pin.expose() != self.pin => return Err(HsmError::InvalidPin),
            Some(_) => {}
        }
        Ok(SoftSession {
            token: Rc::clone(&self.token),
            corrupt_signatures: Rc::clone(&self.corrupt_signatures),
        })
    }
}

fn generate_key(spec: &KeySpec) -> Result<PKey<Private>, openssl::error::ErrorStack> {
    match spec {
        KeySpec::Rsa { mod_length } => PKey::from_rsa(Rsa::generate(mod_length.bits())?),
        KeySpec::Ecdsa { curve } => {
            let group = EcGroup::from_curve_name(curve.nid())?;
            PKey::from_ec_key(EcKey::generate(&group)?)
        }
    }
}

fn public_material(key: &PKey<Private>) -> Result<PublicKeyMaterial, HsmError> {
    let invalid = |e: openssl::error::ErrorStack| HsmError::InvalidKeyFormat(e.to_string());
    let id = key.id();
    if id == Id::RSA {
        let rsa = key.rsa().map_err(invalid)?;
        Ok(PublicKeyMaterial::Rsa {
            modulus: rsa.n().to_vec(),
            public_exponent: rsa.e().to_vec(),
        })
    } else if id == Id::EC {
        let ec = key.ec_key().map_err(invalid)?;
        let curve = ec
            .group()
            .curve_name()
            .and_then(EcdsaCurve::from_nid)
            .ok_or_else(|| HsmError::InvalidKeyFormat("unnamed curve".to_string()))?;
        let mut ctx = BigNumContext::new().map_err(invalid)?;
        let point = ec
            .public_key()
            .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
            .map_err(invalid)?;
        Ok(PublicKeyMaterial::Ec { curve, point })
    } else {
        Err(HsmError::InvalidKeyFormat(format!(
            "unsupported key type {:?}",
            id
        )))
    }
}

fn sign_with(
    key: &PKey<Private>,
    mechanism: SignMechanism,
    data: &[u8],
) -> Result<Vec<u8>, openssl::error::ErrorStack> {
    match mechanism {
        SignMechanism::RsaPkcs(hash) => {
            let mut signer = Signer::new(hash.message_digest(), key)?;
            signer.update(data)?;
            signer.sign_to_vec()
        }
        SignMechanism::Ecdsa => {
            let ec = key.ec_key()?;
            let width = ec
                .group()
                .curve_name()
                .and_then(EcdsaCurve::from_nid)
                .map(|c| c.scalar_len())
                .unwrap_or(32) as i32;
            let sig = EcdsaSig::sign(data, &ec)?;
            let mut raw = sig.r().to_vec_padded(width)?;
            raw.extend(sig.s().to_vec_padded(width)?);
            Ok(raw)
        }
    }
}

impl HsmSession for SoftSession {
    type Handle = usize;

    fn generate_key_pair(&self, label: &str, spec: &KeySpec) -> HsmResult<KeyPairHandles<usize>> {
        let mut token = self.token.borrow_mut();
        if token
            .objects
            .iter()
            .any(|o| o.class == ObjectClass::PrivateKey && o.label == label)
        {
            return Err(HsmError::LabelExists(label.to_string()));
        }
        let key = generate_key(spec).map_err(|e| HsmError::KeyGenerationFailed(e.to_string()))?;
        let public = token.objects.len();
        for class in [ObjectClass::PublicKey, ObjectClass::PrivateKey] {
            token.objects.push(SoftObject {
                class,
                label: label.to_string(),
                id: Vec::new(),
                key: key.clone(),
            });
        }
        Ok(KeyPairHandles {
            public,
            private: public + 1,
        })
    }

    fn public_key(&self, handle: usize) -> HsmResult<PublicKeyMaterial> {
        let token = self.token.borrow();
        let object = token
            .objects
            .get(handle)
            .ok_or_else(|| HsmError::Pkcs11Error(format!("invalid object handle {}", handle)))?;
        public_material(&object.key)
    }

    fn set_key_id(&self, pair: &KeyPairHandles<usize>, id: &[u8]) -> HsmResult<()> {
        let mut token = self.token.borrow_mut();
        for handle in [pair.public, pair.private] {
            let object = token
                .objects
                .get_mut(handle)
                .ok_or_else(|| HsmError::Pkcs11Error(format!("invalid object handle {}", handle)))?;
            object.id = id.to_vec();
        }
        Ok(())
    }

    fn find_private_key(&self, label: &str, id: &[u8]) -> HsmResult<usize> {
        let token = self.token.borrow();
        let matches: Vec<usize> = token
            .objects
            .iter()
            .enumerate()
            .filter(|(_, o)| o.class == ObjectClass::PrivateKey && o.label == label && o.id == id)
            .map(|(handle, _)| handle)
            .collect();
        match matches.as_slice() {
            [handle] => Ok(*handle),
            [] => Err(HsmError::KeyNotFound {
                label: label.to_string(),
                id: hex::encode(id),
            }),
            _ => Err(HsmError::AmbiguousKey {
                label: label.to_string(),
                id: hex::encode(id),
                count: matches.len(),
            }),
        }
    }

    fn sign(&self, key: usize, mechanism: SignMechanism, data: &[u8]) -> HsmResult<Vec<u8>> {
        let token = self.token.borrow();
        let object = token
            .objects
            .get(key)
            .filter(|o| o.class == ObjectClass::PrivateKey)
            .ok_or_else(|| HsmError::SigningFailed(format!("{} is not a private key", key)))?;
        let mut signature = sign_with(&object.key, mechanism, data)
            .map_err(|e| HsmError::SigningFailed(e.to_string()))?;
        if self.corrupt_signatures.get() {
            if let Some(last) = signature.last_mut() {
                *last ^= 0xff;
            }
        }
        Ok(signature)
    }

    fn random_bytes(&self, len: usize) -> HsmResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        rand_bytes(&mut buf).map_err(|e| HsmError::Pkcs11Error(e.to_string()))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::RsaModLength;
    use crate::hsm::Pin;
    use std::path::Path;

    fn target(pin: &Pin) -> SessionTarget<'_> {
        SessionTarget {
            module: Path::new("softhsm"),
            slot: 0,
            pin: Some(pin),
        }
    }

    #[test]
    fn test_wrong_pin_rejected() {
        let hsm = SoftHsm::new(0, "1234");
        let pin = Pin::new("0000".to_string());
        assert!(matches!(
            hsm.open_session(&target(&pin)),
            Err(HsmError::InvalidPin)
        ));
    }

    #[test]
    fn test_label_collision() {
        let hsm = SoftHsm::new(0, "1234");
        let pin = Pin::new("1234".to_string());
        let session = hsm.open_session(&target(&pin)).unwrap();
        let spec = KeySpec::Rsa {
            mod_length: RsaModLength::Bits2048,
        };
        session.generate_key_pair("root", &spec).unwrap();
        assert!(matches!(
            session.generate_key_pair("root", &spec),
            Err(HsmError::LabelExists(label)) if label == "root"
        ));
    }

    #[test]
    fn test_find_requires_label_and_id() {
        let hsm = SoftHsm::new(0, "1234");
        let pin = Pin::new("1234".to_string());
        let session = hsm.open_session(&target(&pin)).unwrap();
        let spec = KeySpec::Ecdsa {
            curve: EcdsaCurve::P256,
        };
        let pair = session.generate_key_pair("intermediate", &spec).unwrap();
        session.set_key_id(&pair, &[1, 2, 3, 4]).unwrap();

        assert_eq!(
            session
                .find_private_key("intermediate", &[1, 2, 3, 4])
                .unwrap(),
            pair.private
        );
        assert!(matches!(
            session.find_private_key("intermediate", &[9, 9, 9, 9]),
            Err(HsmError::KeyNotFound { .. })
        ));
        assert!(matches!(
            session.find_private_key("other", &[1, 2, 3, 4]),
            Err(HsmError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_ec_public_key_is_uncompressed() {
        let hsm = SoftHsm::new(0, "1234");
        let pin = Pin::new("1234".to_string());
        let session = hsm.open_session(&target(&pin)).unwrap();
        let spec = KeySpec::Ecdsa {
            curve: EcdsaCurve::P384,
        };
        let pair = session.generate_key_pair("k", &spec).unwrap();
        let PublicKeyMaterial::Ec { curve, point } = session.public_key(pair.public).unwrap()
        else {
            panic!("expected an EC key");
        };
        assert_eq!(curve, EcdsaCurve::P384);
        assert_eq!(point.len(), 97);
        assert_eq!(point[0], 0x04);
    }
}
