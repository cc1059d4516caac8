//! Proposal ordering and algorithm selection for the SECIO handshake.

use std::cmp::Ordering;

use crate::error::CryptoError;
use crate::hash::sha256;

/// Decide whose preference list wins.
///
/// Compares `SHA256(remote_pub ‖ local_nonce)` with
/// `SHA256(local_pub ‖ remote_nonce)`. `Greater` means the local list is
/// scanned first, `Less` the remote one. Identical digests mean both
/// proposals came from the same peer.
pub fn order(
    local_pub: &[u8],
    local_nonce: &[u8],
    remote_pub: &[u8],
    remote_nonce: &[u8],
) -> Result<Ordering, CryptoError> {
    let oh1 = sha256(&[remote_pub, local_nonce].concat());
    let oh2 = sha256(&[local_pub, remote_nonce].concat());
    match oh1.cmp(&oh2) {
        Ordering::Equal => Err(CryptoError::TalkingToSelf),
        other => Ok(other),
    }
}

/// Split a comma-joined preference list, ignoring blanks.
pub fn split_list(list: &str) -> Vec<&str> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Pick the first entry of the winning list that the other list also has.
pub fn select_best(
    order: Ordering,
    local: &str,
    remote: &str,
    what: &'static str,
) -> Result<String, CryptoError> {
    let (first, second) = match order {
        Ordering::Less => (split_list(remote), split_list(local)),
        _ => (split_list(local), split_list(remote)),
    };
    first
        .into_iter()
        .find(|candidate| second.contains(candidate))
        .map(str::to_string)
        .ok_or(CryptoError::NoAgreement(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_antisymmetric() {
        let (pa, na) = (b"alice-key".as_slice(), b"alice-nonce".as_slice());
        let (pb, nb) = (b"bob-key".as_slice(), b"bob-nonce".as_slice());
        let a_view = order(pa, na, pb, nb).unwrap();
        let b_view = order(pb, nb, pa, na).unwrap();
        assert_eq!(a_view, b_view.reverse());
    }

    #[test]
    fn test_order_detects_self() {
        let result = order(b"key", b"nonce", b"key", b"nonce");
        assert!(matches!(result, Err(CryptoError::TalkingToSelf)));
    }

    #[test]
    fn test_select_best_follows_order() {
        let local = "AES-256,AES-128,Blowfish";
        let remote = "Blowfish,AES-128";
        assert_eq!(
            select_best(Ordering::Greater, local, remote, "cipher").unwrap(),
            "AES-128"
        );
        assert_eq!(
            select_best(Ordering::Less, local, remote, "cipher").unwrap(),
            "Blowfish"
        );
    }

    #[test]
    fn test_both_sides_agree() {
        let alice = "SHA256,SHA512";
        let bob = "SHA512,SHA256";
        let from_alice = select_best(Ordering::Greater, alice, bob, "hash").unwrap();
        let from_bob = select_best(Ordering::Less, bob, alice, "hash").unwrap();
        assert_eq!(from_alice, from_bob);
    }

    #[test]
    fn test_no_agreement() {
        let result = select_best(Ordering::Greater, "P-256", "X25519", "exchange");
        assert!(matches!(result, Err(CryptoError::NoAgreement("exchange"))));
    }

    #[test]
    fn test_split_list_ignores_blanks() {
        assert_eq!(split_list("a, b,,c"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }
}
