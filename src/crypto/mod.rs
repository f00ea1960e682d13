pub mod curve;
pub mod ed25519;
pub mod field;
pub mod scalar;
pub mod sha512;

pub use self::ed25519::{VerifyCtx, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE};
pub use self::sha512::{Sha512, SHA512_BLOCK_SIZE, SHA512_HASH_SIZE};
