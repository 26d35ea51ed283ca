//! Conversions between opaque byte strings and arbitrary-precision integers,
//! plus the modular helpers the blind-signature engine needs.
//!
//! Byte encoding is big-endian and minimal-length throughout; zero encodes to
//! a single zero byte.

use num_bigint_dig::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};

/// Encodes each integer as big-endian minimal-length bytes.
#[must_use]
pub fn to_bytes_list(values: &[BigUint]) -> Vec<Vec<u8>> {
    values.iter().map(BigUint::to_bytes_be).collect()
}

/// Decodes a list of big-endian byte strings back into integers.
#[must_use]
pub fn from_bytes_list(bytes: &[Vec<u8>]) -> Vec<BigUint> {
    bytes
        .iter()
        .map(|b| BigUint::from_bytes_be(b))
        .collect()
}

/// Whether `gcd(a, b) == 1`.
#[must_use]
pub fn coprime(a: &BigUint, b: &BigUint) -> bool {
    let mut x = a.clone();
    let mut y = b.clone();
    while !y.is_zero() {
        let r = &x % &y;
        x = y;
        y = r;
    }
    x.is_one()
}

/// Multiplicative inverse of `value` modulo `modulus`, or `None` when the two
/// are not coprime. Extended Euclid over signed integers.
#[must_use]
pub fn mod_inverse(value: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    if modulus.is_zero() {
        return None;
    }
    let modulus_int = BigInt::from_biguint(Sign::Plus, modulus.clone());
    let mut r = modulus_int.clone();
    let mut new_r = BigInt::from_biguint(Sign::Plus, value % modulus);
    let mut t = BigInt::zero();
    let mut new_t = BigInt::one();

    while !new_r.is_zero() {
        let quotient = &r / &new_r;
        let next_t = &t - &quotient * &new_t;
        t = std::mem::replace(&mut new_t, next_t);
        let next_r = &r - &quotient * &new_r;
        r = std::mem::replace(&mut new_r, next_r);
    }

    if !r.is_one() {
        return None;
    }
    if t.sign() == Sign::Minus {
        t += modulus_int;
    }
    t.to_biguint()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn test_bytes_round_trip() {
        let values = vec![big(0), big(1), big(255), big(256), big(u64::MAX)];
        let bytes = to_bytes_list(&values);
        assert_eq!(bytes[1], vec![1]);
        assert_eq!(bytes[3], vec![1, 0]);
        assert_eq!(from_bytes_list(&bytes), values);
    }

    #[test]
    fn test_mod_inverse_known_values() {
        // 3 * 4 = 12 ≡ 1 (mod 11)
        assert_eq!(mod_inverse(&big(3), &big(11)), Some(big(4)));
        // 2 has no inverse modulo 4
        assert_eq!(mod_inverse(&big(2), &big(4)), None);
        // inverse of a reduced residue
        let inv = mod_inverse(&big(1234), &big(5003)).expect("coprime");
        assert_eq!((big(1234) * inv) % big(5003), big(1));
    }

    #[test]
    fn test_coprime() {
        assert!(coprime(&big(15), &big(28)));
        assert!(!coprime(&big(15), &big(25)));
        assert!(coprime(&big(1), &big(100)));
    }
}
