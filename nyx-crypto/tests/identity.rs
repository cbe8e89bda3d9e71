#![forbid(unsafe_code)]

use std::collections::HashSet;

use nyx_crypto::{IdentityKeyPair, IdentityPublicKey, LinkPublicKey};
use proptest::prelude::*;

#[test]
fn keys_serialize_as_text() -> Result<(), Box<dyn std::error::Error>> {
    let kp = IdentityKeyPair::generate()?;
    let pk = kp.public_key();
    let json = serde_json::to_string(&pk)?;
    assert_eq!(json, format!("\"{}\"", pk.to_text()));
    let back: IdentityPublicKey = serde_json::from_str(&json)?;
    assert_eq!(back, pk);

    let link: LinkPublicKey = serde_json::from_str(&serde_json::to_string(&pk.to_link_key())?)?;
    assert_eq!(link, pk.to_link_key());
    Ok(())
}

#[test]
fn bad_text_is_a_serde_error() {
    let res = serde_json::from_str::<IdentityPublicKey>("\"not base64!\"");
    assert!(res.is_err());
}

proptest! {
    #[test]
    fn seeds_map_to_stable_identities(seed in any::<[u8; 32]>()) {
        let a = IdentityKeyPair::from_seed(&seed);
        let b = IdentityKeyPair::from_seed(&seed);
        prop_assert_eq!(a.public_key(), b.public_key());
        prop_assert_eq!(a.public_key().to_link_key(), b.public_key().to_link_key());
    }

    #[test]
    fn byte_equality_drives_hashing(seeds in proptest::collection::vec(any::<[u8; 32]>(), 1..12)) {
        let distinct: HashSet<[u8; 32]> = seeds.iter().copied().collect();
        let keys: HashSet<IdentityPublicKey> =
            seeds.iter().map(|s| IdentityKeyPair::from_seed(s).public_key()).collect();
        prop_assert_eq!(keys.len(), distinct.len());
    }
}
