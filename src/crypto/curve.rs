//! Point arithmetic on the Ed25519 twisted Edwards curve
//! `-x^2 + y^2 = 1 + d x^2 y^2`.
//!
//! Points are held in extended projective coordinates `(X:Y:T:Z)` with
//! `T = XY/Z`. The addition law is the unified extended-coordinates
//! formula, which is complete on this curve (a = -1 is square, d is not),
//! so doubling and adding the neutral element need no special cases.

use crypto::field::FieldElem;

/// The curve constant d = -121665/121666 mod p.
const ED25519_D: FieldElem = FieldElem([
    0xa3, 0x78, 0x59, 0x13, 0xca, 0x4d, 0xeb, 0x75,
    0xab, 0xd8, 0x41, 0x41, 0x4d, 0x0a, 0x70, 0x00,
    0x98, 0xe8, 0x79, 0x77, 0x79, 0x40, 0xc7, 0x8c,
    0x73, 0xfe, 0x6f, 0x2b, 0xee, 0x6c, 0x03, 0x52,
]);

/// Affine x of the fixed base point.
const BASE_X: FieldElem = FieldElem([
    0x1a, 0xd5, 0x25, 0x8f, 0x60, 0x2d, 0x56, 0xc9,
    0xb2, 0xa7, 0x25, 0x95, 0x60, 0xc7, 0x2c, 0x69,
    0x5c, 0xdc, 0xd6, 0xfd, 0x31, 0xe2, 0xa4, 0xc0,
    0xfe, 0x53, 0x6e, 0xcd, 0xd3, 0x36, 0x69, 0x21,
]);

/// Affine y of the fixed base point, 4/5 mod p.
const BASE_Y: FieldElem = FieldElem([
    0x58, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66,
    0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66,
    0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66,
    0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66,
]);

#[derive(Clone, Copy, Debug)]
pub struct Point {
    x: FieldElem,
    y: FieldElem,
    t: FieldElem,
    z: FieldElem,
}

impl Point {
    /// The group identity `(0:1:0:1)`.
    pub fn neutral() -> Point {
        Point { x: FieldElem::ZERO, y: FieldElem::ONE, t: FieldElem::ZERO, z: FieldElem::ONE }
    }

    /// The fixed base point.
    pub fn base() -> Point {
        Point::from_affine(BASE_X, BASE_Y)
    }

    fn from_affine(x: FieldElem, y: FieldElem) -> Point {
        Point { x: x, y: y, t: x.mul(&y), z: FieldElem::ONE }
    }

    fn select(zero: &Point, one: &Point, condition: u8) -> Point {
        Point {
            x: FieldElem::select(&zero.x, &one.x, condition),
            y: FieldElem::select(&zero.y, &one.y, condition),
            t: FieldElem::select(&zero.t, &one.t, condition),
            z: FieldElem::select(&zero.z, &one.z, condition),
        }
    }

    /// Unified extended-coordinates addition with k = 2d.
    pub fn add(&self, other: &Point) -> Point {
        let k = ED25519_D.add(&ED25519_D);

        let a = self.y.sub(&self.x).mul(&other.y.sub(&other.x));
        let b = self.y.add(&self.x).mul(&other.y.add(&other.x));
        let c = self.t.mul(&other.t).mul(&k);
        let d = {
            let zz = self.z.mul(&other.z);
            zz.add(&zz)
        };

        let e = b.sub(&a);
        let f = d.sub(&c);
        let g = d.add(&c);
        let h = b.add(&a);

        Point {
            x: e.mul(&f),
            y: g.mul(&h),
            t: e.mul(&h),
            z: f.mul(&g),
        }
    }

    pub fn double(&self) -> Point {
        self.add(self)
    }

    /// Constant-time scalar multiplication: a full 256-bit double-and-add
    /// ladder with bitmask selection, no early exit.
    pub fn smult(&self, e: &[u8; 32]) -> Point {
        let mut r = Point::neutral();
        for i in (0..256).rev() {
            let bit = (e[i >> 3] >> (i & 7)) & 1;
            r = r.double();
            let s = r.add(self);
            r = Point::select(&r, &s, bit);
        }
        r
    }

    /// Canonical 32-byte encoding: the affine y with the sign of x in the
    /// top bit of the final byte.
    pub fn pack(&self) -> [u8; 32] {
        let zi = self.z.invert();
        let x = self.x.mul(&zi);
        let y = self.y.mul(&zi);

        let mut packed = y.normalize().0;
        packed[31] |= x.parity() << 7;
        packed
    }

    /// Decode a packed point. The second return value is 1 on success and
    /// 0 when the encoding does not name a curve point (the recovered
    /// x^2 = (y^2 - 1)/(d y^2 + 1) has no square root).
    pub fn try_unpack(packed: &[u8; 32]) -> (Point, u8) {
        let parity = packed[31] >> 7;
        let mut y_bytes = *packed;
        y_bytes[31] &= 127;
        let y = FieldElem(y_bytes);

        let yy = y.sq();
        let u = yy.sub(&FieldElem::ONE);
        let v = ED25519_D.mul(&yy).add(&FieldElem::ONE);
        let xx = u.mul(&v.invert());

        let root = xx.sqrt();
        let ok = root.sq().ct_eq(&xx);

        let other = root.neg();
        let x = FieldElem::select(&root, &other, root.parity() ^ parity);

        (Point::from_affine(x, y), ok)
    }
}
