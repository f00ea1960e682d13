//! Ed25519 signing and verification.
//!
//! The verifier comes in two shapes: a one-shot `verify` for complete
//! buffers, and a streaming `VerifyCtx` that pre-loads `R || A` into the
//! hash state so a parser can forward signed-region bytes exactly once
//! without ever buffering them. Metadata verification uses the streaming
//! form; manifest signing uses `sign` with the device key.

use crypto::curve::Point;
use crypto::scalar::Scalar;
use crypto::sha512::{self, Sha512};

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SECRET_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

/// SHA-512 of the seed with the RFC 8032 clamp on the lower half; the
/// upper half seeds the deterministic nonce.
fn expand_key(secret: &[u8; SECRET_KEY_SIZE]) -> [u8; 64] {
    let mut expanded = sha512::digest(secret);
    expanded[0] &= 0xf8;
    expanded[31] &= 0x7f;
    expanded[31] |= 0x40;
    expanded
}

/// Derive the packed public key from a 32-byte seed.
pub fn public_key(secret: &[u8; SECRET_KEY_SIZE]) -> [u8; PUBLIC_KEY_SIZE] {
    let expanded = expand_key(secret);
    let mut a = [0u8; 32];
    a.copy_from_slice(&expanded[..32]);
    Point::base().smult(&a).pack()
}

/// Deterministic signature over `message`.
pub fn sign(secret: &[u8; SECRET_KEY_SIZE], public: &[u8; PUBLIC_KEY_SIZE], message: &[u8])
            -> [u8; SIGNATURE_SIZE] {
    let expanded = expand_key(secret);

    // r = H(prefix || M) mod l, R = rB
    let mut hash = Sha512::new();
    hash.update(&expanded[32..]);
    hash.update(message);
    let r = Scalar::from_bytes(&hash.finish());
    let r_packed = Point::base().smult(&r.0).pack();

    // k = H(R || A || M) mod l
    let mut hash = Sha512::new();
    hash.update(&r_packed);
    hash.update(public);
    hash.update(message);
    let k = Scalar::from_bytes(&hash.finish());

    // S = r + k a mod l
    let a = Scalar::from_bytes(&expanded[..32]);
    let s = k.mul(&a).add(&r);

    let mut signature = [0u8; SIGNATURE_SIZE];
    signature[..32].copy_from_slice(&r_packed);
    signature[32..].copy_from_slice(&s.0);
    signature
}

/// An in-flight signature verification. The challenge hash runs over
/// `R || A || M`; `new` loads the fixed 64-byte prefix and `update` streams
/// the message.
pub struct VerifyCtx {
    hash:      Sha512,
    signature: [u8; SIGNATURE_SIZE],
    public:    [u8; PUBLIC_KEY_SIZE],
}

impl VerifyCtx {
    pub fn new(signature: &[u8; SIGNATURE_SIZE], public: &[u8; PUBLIC_KEY_SIZE]) -> VerifyCtx {
        let mut hash = Sha512::new();
        hash.update(&signature[..32]);
        hash.update(public);
        VerifyCtx { hash: hash, signature: *signature, public: *public }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hash.update(data);
    }

    /// Accept iff `SB = R + kA` with both sides compared in packed form.
    pub fn finish(self) -> bool {
        let k = Scalar::from_bytes(&self.hash.finish());

        let mut s = [0u8; 32];
        s.copy_from_slice(&self.signature[32..]);
        let lhs = Point::base().smult(&s).pack();

        let (a, a_ok) = Point::try_unpack(&self.public);
        let mut r_packed = [0u8; 32];
        r_packed.copy_from_slice(&self.signature[..32]);
        let (r, r_ok) = Point::try_unpack(&r_packed);

        let rhs = a.smult(&k.0).add(&r).pack();
        (a_ok & r_ok) == 1 && lhs == rhs
    }
}

/// One-shot verification of a complete buffer.
pub fn verify(public: &[u8; PUBLIC_KEY_SIZE], message: &[u8], signature: &[u8; SIGNATURE_SIZE])
              -> bool {
    let mut ctx = VerifyCtx::new(signature, public);
    ctx.update(message);
    ctx.finish()
}
