pub mod error;
pub mod time;
pub mod tuf;

pub use self::error::Error;
pub use self::time::UptaneTime;
pub use self::tuf::{Attack, HashMethod, HashValue, InstallationState, Key, KeyId,
                    KeyType, Role, RoleMeta, Root, Signature, Targets};
