//! RSA-blind-signature PSI engine (De Cristofaro & Tsudik).
//!
//! Pure with respect to sessions: the engine holds key material and the two
//! configured hash functions, nothing else. The host carries the private
//! exponent; the client receives `(n, e)` in-band during key exchange.
//!
//! For an identifier `m` the host publishes `t = H2(H1(m)^d mod n)`. The
//! client submits `y = H1(m) · r^e mod n`, receives the blind signature
//! `z = y^d mod n` and unblinds to `H2(z · r⁻¹ mod n) = H2(H1(m)^d mod n)`,
//! so equal identifiers collide on their final digests and nothing else is
//! revealed.

use num_bigint_dig::BigUint;
use num_traits::{ToPrimitive, Zero};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;

use crate::bigint;
use crate::error::{Error, Result};
use crate::hash::HashKind;

/// Default modulus size in bits.
pub const DEFAULT_KEY_BITS: usize = 4096;

#[derive(Debug, Clone)]
enum KeyMaterial {
    None,
    Public { n: BigUint, e: BigUint },
    Private { n: BigUint, e: BigUint, d: BigUint },
}

/// The blind-signature engine. One per process, configured at startup.
#[derive(Debug, Clone)]
pub struct RsaBlindEngine {
    first_hash: HashKind,
    second_hash: HashKind,
    keys: KeyMaterial,
}

impl RsaBlindEngine {
    /// Creates an engine without key material. The host calls
    /// [`generate_keypair`](Self::generate_keypair) next; the client waits for
    /// [`set_public_key`](Self::set_public_key) during key exchange.
    #[must_use]
    pub fn new(first_hash: HashKind, second_hash: HashKind) -> Self {
        Self {
            first_hash,
            second_hash,
            keys: KeyMaterial::None,
        }
    }

    /// Generates a fresh RSA keypair. Host-side, once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGen`] when the platform RNG or the prime search
    /// fails.
    pub fn generate_keypair(&mut self, bits: usize) -> Result<()> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::KeyGen(e.to_string()))?;
        self.keys = KeyMaterial::Private {
            n: key.n().clone(),
            e: key.e().clone(),
            d: key.d().clone(),
        };
        Ok(())
    }

    /// Installs the host's public key on the client. Idempotent; the runtime
    /// guards against re-keying after the exchange completed.
    pub fn set_public_key(&mut self, n: &[u8], e: u64) {
        self.keys = KeyMaterial::Public {
            n: BigUint::from_bytes_be(n),
            e: BigUint::from(e),
        };
    }

    /// Whether key exchange has completed (always true on the host).
    #[must_use]
    pub fn has_public_key(&self) -> bool {
        !matches!(self.keys, KeyMaterial::None)
    }

    /// The public half `(n, e)` for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPublicKey`] before key material exists.
    pub fn public_key(&self) -> Result<(Vec<u8>, i64)> {
        let (n, e) = self.public_parts()?;
        let exponent = e
            .to_i64()
            .ok_or_else(|| Error::KeyGen("public exponent does not fit in 64 bits".into()))?;
        Ok((n.to_bytes_be(), exponent))
    }

    /// Host-side offline phase: `t_i = H2(H1(id_i)^d mod n)` in input order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPrivateKey`] on a client-side engine.
    pub fn host_offline_hash(&self, ids: &[String]) -> Result<Vec<Vec<u8>>> {
        let (n, d) = self.private_parts()?;
        Ok(ids
            .iter()
            .map(|id| {
                let h = BigUint::from_bytes_be(&self.first_hash.sum(id.as_bytes()));
                self.second_hash.sum(&h.modpow(d, n).to_bytes_be())
            })
            .collect())
    }

    /// Client-side blinding: for each identifier draws `r` uniformly from
    /// `[1, n)` with `gcd(r, n) == 1` and returns
    /// `y_i = H1(id_i) · r_i^e mod n` with the paired factors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPublicKey`] before key exchange and
    /// [`Error::Rng`] when the platform random source fails.
    pub fn client_blinding(&self, ids: &[String]) -> Result<(Vec<BigUint>, Vec<BigUint>)> {
        let (n, e) = self.public_parts()?;
        let mut blinded = Vec::with_capacity(ids.len());
        let mut factors = Vec::with_capacity(ids.len());
        for id in ids {
            let h = BigUint::from_bytes_be(&self.first_hash.sum(id.as_bytes()));
            let r = draw_blinding_factor(n)?;
            blinded.push((h * r.modpow(e, n)) % n);
            factors.push(r);
        }
        Ok((blinded, factors))
    }

    /// Host-side blind signing: `z_i = y_i^d mod n`. Purely algebraic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPrivateKey`] on a client-side engine.
    pub fn host_blind_signing(&self, blinded: &[BigUint]) -> Result<Vec<BigUint>> {
        let (n, d) = self.private_parts()?;
        Ok(blinded.iter().map(|y| y.modpow(d, n)).collect())
    }

    /// Client-side unblinding: `t_i = H2(z_i · r_i⁻¹ mod n)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchLengthMismatch`] when the batches do not pair up
    /// and [`Error::NonInvertibleBlindingFactor`] when a stored factor shares
    /// a factor with `n`.
    pub fn client_unblinding(
        &self,
        signatures: &[BigUint],
        factors: &[BigUint],
    ) -> Result<Vec<Vec<u8>>> {
        if signatures.len() != factors.len() {
            return Err(Error::BatchLengthMismatch {
                signatures: signatures.len(),
                factors: factors.len(),
            });
        }
        let (n, _) = self.public_parts()?;
        signatures
            .iter()
            .zip(factors)
            .map(|(z, r)| {
                let inverse = bigint::mod_inverse(r, n)
                    .ok_or(Error::NonInvertibleBlindingFactor)?;
                Ok(self.second_hash.sum(&((z * inverse) % n).to_bytes_be()))
            })
            .collect()
    }

    /// Raw RSA: `x^e mod n`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPublicKey`] before key material exists.
    pub fn encrypt(&self, x: &BigUint) -> Result<BigUint> {
        let (n, e) = self.public_parts()?;
        Ok(x.modpow(e, n))
    }

    /// Raw RSA: `x^d mod n`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPrivateKey`] on a client-side engine.
    pub fn decrypt(&self, x: &BigUint) -> Result<BigUint> {
        let (n, d) = self.private_parts()?;
        Ok(x.modpow(d, n))
    }

    fn public_parts(&self) -> Result<(&BigUint, &BigUint)> {
        match &self.keys {
            KeyMaterial::Public { n, e } | KeyMaterial::Private { n, e, .. } => Ok((n, e)),
            KeyMaterial::None => Err(Error::MissingPublicKey),
        }
    }

    fn private_parts(&self) -> Result<(&BigUint, &BigUint)> {
        match &self.keys {
            KeyMaterial::Private { n, d, .. } => Ok((n, d)),
            _ => Err(Error::MissingPrivateKey),
        }
    }
}

/// Index pairs `(i, j)` with `ta[i] == tb[j]`. Used by local tests; the
/// runtime compares through the KV's `hash_id_map` instead.
#[must_use]
pub fn compare(ta: &[Vec<u8>], tb: &[Vec<u8>]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, a) in ta.iter().enumerate() {
        for (j, b) in tb.iter().enumerate() {
            if a == b {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// Uniform draw from `[1, n)`, rejecting zero and the (negligible) candidates
/// sharing a factor with `n`.
fn draw_blinding_factor(n: &BigUint) -> Result<BigUint> {
    let bytes = n.to_bytes_be();
    let top = bytes[0];
    loop {
        let mut buf = vec![0u8; bytes.len()];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| Error::Rng(e.to_string()))?;
        // Mask the leading byte down to the modulus width so most draws land
        // below n on the first attempt.
        buf[0] &= 0xff_u8 >> top.leading_zeros();
        let candidate = BigUint::from_bytes_be(&buf);
        if candidate.is_zero() || candidate >= *n {
            continue;
        }
        if bigint::coprime(&candidate, n) {
            return Ok(candidate);
        }
    }
}
