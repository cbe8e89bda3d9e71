#![forbid(unsafe_code)]

use crate::keys::{IdentityKeyPair, IdentityPublicKey, PUBLIC_KEY_SIZE};
use crate::{Error, Result};

pub const SIGNATURE_SIZE: usize = 64;
const HEADER_LEN: usize = PUBLIC_KEY_SIZE + SIGNATURE_SIZE;

/// Sign `msg` and frame it as `pk || sig || msg`.
pub fn seal_signed(key: &IdentityKeyPair, msg: &[u8]) -> Vec<u8> {
    let sig = key.sign(msg);
    let mut out = Vec::with_capacity(HEADER_LEN + msg.len());
    out.extend_from_slice(key.public_key().as_bytes());
    out.extend_from_slice(&sig);
    out.extend_from_slice(msg);
    out
}

/// Verify a `pk || sig || msg` envelope, returning the signer and the payload.
pub fn open_signed(signed: &[u8]) -> Result<(IdentityPublicKey, &[u8])> {
    if signed.len() < HEADER_LEN {
        return Err(Error::Signature);
    }
    let mut pk_bytes = [0u8; PUBLIC_KEY_SIZE];
    pk_bytes.copy_from_slice(&signed[..PUBLIC_KEY_SIZE]);
    let signer = IdentityPublicKey::from_bytes(&pk_bytes).map_err(|_| Error::Signature)?;
    let mut sig_bytes = [0u8; SIGNATURE_SIZE];
    sig_bytes.copy_from_slice(&signed[PUBLIC_KEY_SIZE..HEADER_LEN]);
    let msg = &signed[HEADER_LEN..];
    signer.verify(msg, &sig_bytes)?;
    Ok((signer, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open() -> Result<()> {
        let kp = IdentityKeyPair::generate()?;
        let sealed = seal_signed(&kp, b"descriptor");
        let (signer, msg) = open_signed(&sealed)?;
        assert_eq!(signer, kp.public_key());
        assert_eq!(msg, b"descriptor");
        Ok(())
    }

    #[test]
    fn tampered_payload_fails() -> Result<()> {
        let kp = IdentityKeyPair::generate()?;
        let mut sealed = seal_signed(&kp, b"descriptor");
        if let Some(last) = sealed.last_mut() {
            *last ^= 0x01;
        }
        assert_eq!(open_signed(&sealed).unwrap_err(), Error::Signature);
        assert_eq!(open_signed(&sealed[..10]).unwrap_err(), Error::Signature);
        Ok(())
    }
}
