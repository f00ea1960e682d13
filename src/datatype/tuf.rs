use hex::{FromHex, ToHex};
use std::fmt::{self, Display, Formatter};

use datatype::{Error, UptaneTime};


/// Most keys a root may carry in its key table.
pub const ROOT_MAX_KEYS: usize = 16;
/// Most key ids a single role quorum may list.
pub const ROLE_MAX_KEYS: usize = 16;
/// Most hash entries kept for a single target.
pub const TARGETS_MAX_HASHES: usize = 4;
/// Longest accepted target name in bytes.
pub const TARGETS_MAX_NAME_LENGTH: usize = 63;


/// The two metadata roles a partial-verification secondary knows about.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Root,
    Targets,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Role::Root    => write!(f, "root"),
            Role::Targets => write!(f, "targets"),
        }
    }
}


#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyType {
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl KeyType {
    /// Match a metadata key/method type string, case-insensitively.
    pub fn from_bytes(s: &[u8]) -> Option<KeyType> {
        if s.eq_ignore_ascii_case(b"ed25519") {
            Some(KeyType::Ed25519)
        } else {
            None
        }
    }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            KeyType::Ed25519 => write!(f, "ed25519"),
        }
    }
}


/// The identity of a metadata key: the SHA-256 digest of its canonical
/// upstream serialization. The agent never recomputes it, only compares by
/// value and renders it as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub [u8; 32]);

impl KeyId {
    /// Decode from the hex form used on the wire. Exactly 64 hex digits,
    /// either case.
    pub fn from_hex_bytes(hex: &[u8]) -> Result<KeyId, Error> {
        if hex.len() != 64 {
            return Err(Error::Parse(format!("key id must be 64 hex chars, got {}", hex.len())));
        }
        let bytes = Vec::from_hex(hex)?;
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(KeyId(id))
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "KeyId({})", self)
    }
}


/// A public key from the root's key table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Key {
    pub keytype: KeyType,
    pub keyid:   KeyId,
    pub public:  [u8; 32],
}


/// Quorum definition for one role: a signature threshold plus the key ids
/// allowed to contribute toward it.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RoleMeta {
    pub threshold: u32,
    pub keyids:    Vec<KeyId>,
}


/// The trusted root metadata: version, expiry, the shared key table and
/// the quorums for the root and targets roles. Replaced wholesale when a
/// new root passes dual-quorum verification.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Root {
    pub version:      u32,
    pub expires:      UptaneTime,
    pub root_role:    RoleMeta,
    pub targets_role: RoleMeta,
    pub keys:         Vec<Key>,
}

impl Root {
    pub fn key(&self, id: &KeyId) -> Option<&Key> {
        self.keys.iter().find(|key| key.keyid == *id)
    }

    pub fn threshold(&self, role: Role) -> u32 {
        match role {
            Role::Root    => self.root_role.threshold,
            Role::Targets => self.targets_role.threshold,
        }
    }

    /// The resolved keys of a role's quorum. Ids that do not resolve in the
    /// key table are dropped; they can never contribute a valid signature.
    pub fn role_keys(&self, role: Role) -> Vec<Key> {
        let meta = match role {
            Role::Root    => &self.root_role,
            Role::Targets => &self.targets_role,
        };
        meta.keyids.iter().filter_map(|id| self.key(id).cloned()).collect()
    }
}


#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HashMethod {
    Sha512,
}

impl HashMethod {
    pub fn from_bytes(s: &[u8]) -> Option<HashMethod> {
        if s.eq_ignore_ascii_case(b"sha512") {
            Some(HashMethod::Sha512)
        } else {
            None
        }
    }

    pub fn digest_len(&self) -> usize {
        match *self {
            HashMethod::Sha512 => 64,
        }
    }
}

impl Display for HashMethod {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            HashMethod::Sha512 => write!(f, "sha512"),
        }
    }
}


/// A digest committed to by targets metadata.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HashValue {
    pub method: HashMethod,
    pub value:  Vec<u8>,
}


/// The slice of targets metadata that concerns this ECU: the single image
/// assigned to it, if any.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Targets {
    pub version: i32,
    pub expires: UptaneTime,
    pub name:    String,
    pub hashes:  Vec<HashValue>,
    pub length:  u32,
}

impl Targets {
    pub fn hash(&self, method: HashMethod) -> Option<&HashValue> {
        self.hashes.iter().find(|hash| hash.method == method)
    }
}


/// The reason code for the most recent rejected metadata or image. Reported
/// upstream in the next version manifest.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Attack {
    None,
    RootThreshold,
    TargetsThreshold,
    RootVersion,
    TargetsVersion,
    RootExpired,
    TargetsExpired,
    RootLarge,
    TargetsLarge,
    ImageHash,
    ImageLarge,
}

impl Attack {
    /// The `attacks_detected` wording the director expects.
    pub fn description(&self) -> &'static str {
        match *self {
            Attack::None             => "",
            Attack::RootThreshold    => "Failed threshold for root metadata",
            Attack::TargetsThreshold => "Failed threshold for targets metadata",
            Attack::RootVersion      => "Root rollback attempted",
            Attack::TargetsVersion   => "Targets rollback attempted",
            Attack::RootExpired      => "Root metadata has expired",
            Attack::TargetsExpired   => "Targets metadata has expired",
            Attack::RootLarge        => "Root metadata size exceeds the limit",
            Attack::TargetsLarge     => "Targets metadata size exceeds the limit",
            Attack::ImageHash        => "Firmware image hash verification failed",
            Attack::ImageLarge       => "Firmware image length mismatch",
        }
    }
}


/// What is installed on this ECU, plus the latest attack verdict. The two
/// facts are independent: recording an attack never clears the firmware
/// fields, and a successful install resets the attack to `None`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InstallationState {
    pub firmware_name:   String,
    pub firmware_hash:   HashValue,
    pub firmware_length: u32,
    pub attack:          Attack,
}

impl InstallationState {
    /// A record carrying no firmware facts yet, used when an attack is
    /// observed before anything was ever installed.
    pub fn empty() -> InstallationState {
        InstallationState {
            firmware_name:   "".into(),
            firmware_hash:   HashValue { method: HashMethod::Sha512, value: Vec::new() },
            firmware_length: 0,
            attack:          Attack::None,
        }
    }
}


/// One entry of a `signatures` array as rendered into the version manifest.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Signature {
    pub keyid:  String,
    pub method: KeyType,
    pub sig:    String,
}


#[cfg(test)]
mod tests {
    use super::*;


    #[test]
    fn keyid_hex_round_trip() {
        let hex = "982daae1f8bc4c81e259112c0baaf3ca49a20bac172044ec735868ec98c3f406";
        let id = KeyId::from_hex_bytes(hex.as_bytes()).expect("decode");
        assert_eq!(id.to_string(), hex);
        let upper = hex.to_uppercase();
        assert_eq!(KeyId::from_hex_bytes(upper.as_bytes()).expect("upper"), id);
    }

    #[test]
    fn keyid_rejects_bad_lengths() {
        assert!(KeyId::from_hex_bytes(b"982d").is_err());
        assert!(KeyId::from_hex_bytes(&[b'a'; 63]).is_err());
        assert!(KeyId::from_hex_bytes(&[b'g'; 64]).is_err());
    }

    #[test]
    fn role_keys_drop_unresolved_ids() {
        let key = Key { keytype: KeyType::Ed25519, keyid: KeyId([1; 32]), public: [9; 32] };
        let root = Root {
            version: 1,
            expires: UptaneTime::new(3021, 1, 1, 0, 0, 0),
            root_role: RoleMeta { threshold: 1, keyids: vec![KeyId([1; 32]), KeyId([2; 32])] },
            targets_role: RoleMeta { threshold: 1, keyids: vec![KeyId([2; 32])] },
            keys: vec![key],
        };
        assert_eq!(root.role_keys(Role::Root), vec![key]);
        assert!(root.role_keys(Role::Targets).is_empty());
    }

    #[test]
    fn method_strings_are_case_insensitive() {
        assert_eq!(KeyType::from_bytes(b"ED25519"), Some(KeyType::Ed25519));
        assert_eq!(KeyType::from_bytes(b"rsa"), None);
        assert_eq!(HashMethod::from_bytes(b"Sha512"), Some(HashMethod::Sha512));
        assert_eq!(HashMethod::from_bytes(b"sha256"), None);
    }
}
