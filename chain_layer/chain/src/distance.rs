//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The fork-choice "distance" rule.
//!
//! A proposer's distance from a reference hash is the absolute difference
//! between the low 160 bits of the hash and the proposer's 20-byte address
//! key, as 160-bit unsigned integers. Chains of equal length are ordered by
//! the sum of per-link distances; smaller wins. This yields a deterministic,
//! stateless leader ordering at every height.

use std::cmp::Ordering;

use bywise_common_types::{Address, Hash};
use ethnum::U256;

fn u256_from_low160(hash: &Hash) -> U256 {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(&hash.low160());
    U256::from_be_bytes(bytes)
}

fn u256_from_key160(key: [u8; 20]) -> U256 {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(&key);
    U256::from_be_bytes(bytes)
}

/// `|low160(reference) − key160(proposer)|`
pub fn distance(reference: &Hash, proposer: &Address) -> U256 {
    let h = u256_from_low160(reference);
    let a = u256_from_key160(proposer.key160());
    if h >= a {
        h - a
    } else {
        a - h
    }
}

/// The proposer closest to the reference hash wins; ties resolve to the
/// lexicographically smaller address so the order stays total.
pub fn compare_addresses<'a>(reference: &Hash, a: &'a Address, b: &'a Address) -> &'a Address {
    let da = distance(reference, a);
    let db = distance(reference, b);
    match da.cmp(&db) {
        Ordering::Less => a,
        Ordering::Greater => b,
        Ordering::Equal => {
            if a <= b {
                a
            } else {
                b
            }
        },
    }
}

/// Sum of per-link distances for a chain suffix. Each link pairs a block's
/// parent hash with its proposer.
pub fn chain_distance(links: &[(Hash, Address)]) -> U256 {
    links
        .iter()
        .fold(U256::ZERO, |acc, (hash, proposer)| acc + distance(hash, proposer))
}

/// Orders two suffixes of equal length: smaller summed distance first, then
/// the lexicographically smaller tip hash.
pub fn compare_chains(
    a_links: &[(Hash, Address)],
    a_tip: &Hash,
    b_links: &[(Hash, Address)],
    b_tip: &Hash,
) -> Ordering {
    chain_distance(a_links)
        .cmp(&chain_distance(b_links))
        .then_with(|| a_tip.cmp(b_tip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_with_low(value: u128) -> Hash {
        Hash::from_hex(&format!("{:064x}", value)).unwrap()
    }

    fn addr_with_key(value: u128) -> Address {
        let mut key = [0u8; 20];
        key[4..].copy_from_slice(&value.to_be_bytes());
        Address::from_key160("MU", key)
    }

    #[test]
    fn distance_is_absolute_difference() {
        let reference = hash_with_low(1000);
        assert_eq!(distance(&reference, &addr_with_key(1100)), U256::from(100u32));
        assert_eq!(distance(&reference, &addr_with_key(1200)), U256::from(200u32));
        assert_eq!(distance(&reference, &addr_with_key(900)), U256::from(100u32));
        assert_eq!(distance(&reference, &addr_with_key(800)), U256::from(200u32));
        assert_eq!(distance(&reference, &addr_with_key(1000)), U256::ZERO);
    }

    #[test]
    fn closer_address_wins() {
        let reference = hash_with_low(1000);
        let near = addr_with_key(1100);
        let far = addr_with_key(1300);
        assert_eq!(compare_addresses(&reference, &near, &far), &near);
        assert_eq!(compare_addresses(&reference, &far, &near), &near);
    }

    #[test]
    fn equidistant_addresses_resolve_deterministically() {
        let reference = hash_with_low(1000);
        let below = addr_with_key(900);
        let above = addr_with_key(1100);
        let winner = compare_addresses(&reference, &below, &above);
        assert_eq!(winner, compare_addresses(&reference, &above, &below));
    }

    #[test]
    fn chain_distance_sums_links() {
        let h = hash_with_low(1000);
        let a = addr_with_key(1100);
        let b = addr_with_key(1200);
        // [A, A, B] vs [A, B, B] on the same reference hash
        let sum_a = chain_distance(&[(h, a.clone()), (h, a.clone()), (h, b.clone())]);
        let sum_b = chain_distance(&[(h, a.clone()), (h, b.clone()), (h, b.clone())]);
        assert_eq!(sum_a, U256::from(400u32));
        assert_eq!(sum_b, U256::from(500u32));
        assert_eq!(
            compare_chains(
                &[(h, a.clone()), (h, a.clone()), (h, b.clone())],
                &hash_with_low(1),
                &[(h, a), (h, b.clone()), (h, b)],
                &hash_with_low(2)
            ),
            Ordering::Less
        );
    }

    #[test]
    fn equal_distance_ties_break_on_tip_hash() {
        let h = hash_with_low(1000);
        let a = addr_with_key(1100);
        let links = [(h, a)];
        assert_eq!(
            compare_chains(&links, &hash_with_low(1), &links, &hash_with_low(2)),
            Ordering::Less
        );
        assert_eq!(
            compare_chains(&links, &hash_with_low(2), &links, &hash_with_low(1)),
            Ordering::Greater
        );
    }
}
