//! Arithmetic in GF(2^255 - 19), the coordinate field of Ed25519.
//!
//! Elements are 32-byte little-endian magnitudes. Operations keep values
//! only loosely reduced (below 2^255 plus a small excess, so the top byte
//! never exceeds 128); `normalize` produces the unique canonical value
//! below the modulus and is applied before packing or comparing. No branch
//! or memory access depends on operand values; selection is bitmask-based.

/// p - 2, the inversion exponent, little-endian.
const P_MINUS_2: [u8; 32] = [
    0xeb, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f,
];

/// (p + 3) / 8, the square-root exponent, little-endian.
const SQRT_EXP: [u8; 32] = [
    0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x0f,
];

/// sqrt(-1) mod p.
const SQRT_M1: FieldElem = FieldElem([
    0xb0, 0xa0, 0x0e, 0x4a, 0x27, 0x1b, 0xee, 0xc4,
    0x78, 0xe4, 0x2f, 0xad, 0x06, 0x18, 0x43, 0x2f,
    0xa7, 0xd7, 0xfb, 0x3d, 0x99, 0x00, 0x4d, 0x2b,
    0x0b, 0xdf, 0xc1, 0x4f, 0x80, 0x24, 0x83, 0x2b,
]);

/// The derived equality compares representations and is only meaningful on
/// normalized values; use `ct_eq` everywhere a secret could be involved.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FieldElem(pub [u8; 32]);

impl FieldElem {
    pub const ZERO: FieldElem = FieldElem([0; 32]);

    pub const ONE: FieldElem = FieldElem([
        1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]);

    /// Constant-time choice: `condition` must be 0 or 1; returns `zero`
    /// when 0 and `one` when 1.
    pub fn select(zero: &FieldElem, one: &FieldElem, condition: u8) -> FieldElem {
        let mask = condition.wrapping_neg();
        let mut r = [0u8; 32];
        for i in 0..32 {
            r[i] = zero.0[i] ^ (mask & (one.0[i] ^ zero.0[i]));
        }
        FieldElem(r)
    }

    /// Fully reduce into the canonical range `[0, p)`.
    pub fn normalize(&self) -> FieldElem {
        let mut x = self.0;

        // Fold the top bit back down with 2^255 = 19 (mod p).
        let mut c = (x[31] >> 7) as u16 * 19;
        x[31] &= 127;
        for i in 0..32 {
            c += x[i] as u16;
            x[i] = c as u8;
            c >>= 8;
        }

        // The value is now below 2p. Subtract p and keep the difference
        // unless it underflowed.
        let mut minusp = [0u8; 32];
        let mut c: u16 = 19;
        for i in 0..31 {
            c += x[i] as u16;
            minusp[i] = c as u8;
            c >>= 8;
        }
        c = (c + x[31] as u16).wrapping_sub(128);
        minusp[31] = c as u8;

        let underflow = ((c >> 15) & 1) as u8;
        FieldElem::select(&FieldElem(minusp), &FieldElem(x), underflow)
    }

    pub fn add(&self, other: &FieldElem) -> FieldElem {
        let mut r = [0u8; 32];
        let mut c: u16 = 0;
        for i in 0..32 {
            c >>= 8;
            c += self.0[i] as u16 + other.0[i] as u16;
            r[i] = c as u8;
        }
        r[31] &= 127;
        fold(&mut r, (c >> 7) as u32 * 19)
    }

    /// `self + 2p - other`, keeping the chain unsigned throughout. Both
    /// operands must be loosely reduced (top byte at most 128), which every
    /// operation here maintains and the point decoder enforces.
    pub fn sub(&self, other: &FieldElem) -> FieldElem {
        let mut r = [0u8; 32];
        let mut c: u32 = 218;
        for i in 0..31 {
            c += 65280 + self.0[i] as u32 - other.0[i] as u32;
            r[i] = c as u8;
            c >>= 8;
        }
        c = (c + self.0[31] as u32).wrapping_sub(other.0[31] as u32);
        r[31] = (c & 127) as u8;
        fold(&mut r, (c >> 7) * 19)
    }

    /// `2p - self`.
    pub fn neg(&self) -> FieldElem {
        FieldElem::ZERO.sub(self)
    }

    pub fn mul(&self, other: &FieldElem) -> FieldElem {
        let mut r = [0u8; 32];
        let mut c: u32 = 0;
        for i in 0..32 {
            c >>= 8;
            for j in 0..(i + 1) {
                c += self.0[j] as u32 * other.0[i - j] as u32;
            }
            for j in (i + 1)..32 {
                c += self.0[j] as u32 * other.0[i + 32 - j] as u32 * 38;
            }
            r[i] = c as u8;
        }
        r[31] &= 127;
        fold(&mut r, (c >> 7) * 19)
    }

    pub fn sq(&self) -> FieldElem {
        self.mul(self)
    }

    /// Exponentiation by a fixed public exponent, square-and-multiply over
    /// 255 bits. The exponent pattern is public; only operand values are
    /// secret, and those flow through constant-time multiplies.
    fn pow(&self, exponent: &[u8; 32]) -> FieldElem {
        let mut r = FieldElem::ONE;
        for i in (0..255).rev() {
            r = r.sq();
            if (exponent[i >> 3] >> (i & 7)) & 1 == 1 {
                r = r.mul(self);
            }
        }
        r
    }

    /// Multiplicative inverse via Fermat: `self^(p-2)`.
    pub fn invert(&self) -> FieldElem {
        self.pow(&P_MINUS_2)
    }

    /// One of the square roots of `self`, if `self` is a quadratic
    /// residue. The other root is the negation. Callers must square the
    /// result and compare to detect non-residues.
    pub fn sqrt(&self) -> FieldElem {
        let candidate = self.pow(&SQRT_EXP);
        let square_matches = candidate.sq().ct_eq(self);
        let adjusted = candidate.mul(&SQRT_M1);
        FieldElem::select(&adjusted, &candidate, square_matches)
    }

    /// Constant-time equality of the canonical forms: 1 when equal, 0
    /// otherwise.
    pub fn ct_eq(&self, other: &FieldElem) -> u8 {
        let a = self.normalize();
        let b = other.normalize();
        let mut sum: u8 = 0;
        for i in 0..32 {
            sum |= a.0[i] ^ b.0[i];
        }
        sum |= sum >> 4;
        sum |= sum >> 2;
        sum |= sum >> 1;
        (sum ^ 1) & 1
    }

    /// Low bit of the canonical form; the x-coordinate sign carried in the
    /// packed point encoding.
    pub fn parity(&self) -> u8 {
        self.normalize().0[0] & 1
    }
}

/// Carry-propagate `carry * 2^0` through `r` after the top bit of the
/// accumulator has been folded with 2^255 = 19 (mod p).
fn fold(r: &mut [u8; 32], carry: u32) -> FieldElem {
    let mut c = carry;
    for i in 0..32 {
        c += r[i] as u32;
        r[i] = c as u8;
        c >>= 8;
    }
    FieldElem(*r)
}
