//! Token PIN handling using the secrecy crate
//!
//! The PIN is kept in a [`SecretString`]: it is zeroized on drop, never shows
//! up in `Debug` output and is only reachable through an explicit expose call.

use crate::error::{HsmError, HsmResult};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// User PIN for a PKCS#11 token
pub struct Pin {
    secret: SecretString,
}

impl Pin {
    pub fn new(pin: String) -> Self {
        Self {
            secret: SecretString::new(pin),
        }
    }

    pub(crate) fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pin").field("secret", &"<redacted>").finish()
    }
}

/// Ask the operator for the PIN of `slot` without echoing it
pub fn prompt_pin(slot: u64) -> HsmResult<Pin> {
    let pin = rpassword::prompt_password(format!("Enter PIN for HSM slot {}: ", slot))?;
    if pin.is_empty() {
        return Err(HsmError::PinRequired);
    }
    Ok(Pin::new(pin))
}
