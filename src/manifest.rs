use base64;
use hex::ToHex;
use json;
use std::collections::BTreeMap;

use crypto::ed25519;
use datatype::{Error, Signature};
use state::State;

/// Both timeserver fields carry the epoch until a timeserver exists.
const EPOCH: &'static str = "1970-01-01T00:00:00Z";


/// The `signed` body of an `ecu_version_manifest` entry. Field order is
/// the serialization order; the signature covers the exact bytes written.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuVersion {
    pub attacks_detected:         String,
    pub ecu_serial:               String,
    pub installed_image:          TufImage,
    pub previous_timeserver_time: String,
    pub timeserver_time:          String,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct TufImage {
    pub filepath: String,
    pub fileinfo: TufMeta,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct TufMeta {
    pub hashes: BTreeMap<String, String>,
    pub length: u64,
}


/// Render and sign the current installation state.
///
/// Fills two caller-owned buffers: `signed_buf` receives the serialized
/// `signed` object and `signatures_buf` the serialized `signatures` array.
/// The caller splices them into the outer envelope, keeping the signed
/// bytes untouched so the director can hash the exact region it receives.
pub fn write_manifest<S: State>(state: &S, signed_buf: &mut Vec<u8>, signatures_buf: &mut Vec<u8>)
                                -> Result<(), Error> {
    let record = state.installation_state();

    let mut hashes = BTreeMap::new();
    let (filepath, length) = match record {
        Some(record) => {
            hashes.insert(record.firmware_hash.method.to_string(),
                          record.firmware_hash.value.to_hex());
            (record.firmware_name.clone(), record.firmware_length as u64)
        }
        None => {
            hashes.insert("nohash".to_string(), "".to_string());
            ("noimage".to_string(), 0)
        }
    };

    let version = EcuVersion {
        attacks_detected: record.map(|record| record.attack.description().to_string())
            .unwrap_or_else(String::new),
        ecu_serial: state.ecu_serial().to_string(),
        installed_image: TufImage {
            filepath: filepath,
            fileinfo: TufMeta { hashes: hashes, length: length },
        },
        previous_timeserver_time: EPOCH.to_string(),
        timeserver_time:          EPOCH.to_string(),
    };

    signed_buf.clear();
    signed_buf.extend_from_slice(&json::to_vec(&version)?);

    let (key, secret) = state.device_key();
    let signature = ed25519::sign(secret, &key.public, signed_buf);
    let entry = Signature {
        keyid:  key.keyid.to_string(),
        method: key.keytype,
        sig:    base64::encode(&signature[..]),
    };

    signatures_buf.clear();
    signatures_buf.extend_from_slice(&json::to_vec(&vec![entry])?);
    trace!("manifest rendered: {} signed bytes", signed_buf.len());
    Ok(())
}


#[cfg(test)]
mod tests {
    use hex::FromHex;

    use datatype::{Attack, HashMethod, HashValue, InstallationState, Key, KeyId, KeyType};
    use state::MemoryState;
    use super::*;


    const SEED: [u8; 32] = [0x36; 32];
    const FW_SHA512: &'static str =
        "7dbae4c36a2494b731a9239911d3085d53d3e400886edb4ae2b9b78f40bda446\
         649e83ba2d81653f614cc66f5dd5d4dbd95afba854f148afbfae48d0ff4cc38a";

    fn device() -> MemoryState {
        let key = Key {
            keytype: KeyType::Ed25519,
            keyid:   KeyId([0x13; 32]),
            public:  ed25519::public_key(&SEED),
        };
        MemoryState::new("ecu-A".into(), "hw-A".into(), key, SEED)
    }

    fn render(state: &MemoryState) -> (Vec<u8>, Vec<u8>) {
        let mut signed = Vec::new();
        let mut signatures = Vec::new();
        write_manifest(state, &mut signed, &mut signatures).expect("manifest");
        (signed, signatures)
    }

    #[test]
    fn manifest_after_install() {
        let mut state = device();
        state.set_installation_state(InstallationState {
            firmware_name:   "secondary_firmware.txt".into(),
            firmware_hash:   HashValue {
                method: HashMethod::Sha512,
                value:  Vec::from_hex(FW_SHA512).unwrap(),
            },
            firmware_length: 15,
            attack:          Attack::None,
        });

        let (signed, signatures) = render(&state);
        let body: json::Value = json::from_slice(&signed).expect("signed json");
        assert_eq!(body["attacks_detected"], json!(""));
        assert_eq!(body["ecu_serial"], json!("ecu-A"));
        assert_eq!(body["timeserver_time"], json!("1970-01-01T00:00:00Z"));

        let version: EcuVersion = json::from_slice(&signed).expect("ecu version");
        assert_eq!(version.installed_image, TufImage {
            filepath: "secondary_firmware.txt".into(),
            fileinfo: TufMeta {
                hashes: btreemap!{"sha512".to_string() => FW_SHA512.to_string()},
                length: 15,
            },
        });

        // The envelope splices together into valid JSON.
        let envelope = format!("{{\"signatures\":{},\"signed\":{}}}",
                               String::from_utf8(signatures.clone()).unwrap(),
                               String::from_utf8(signed.clone()).unwrap());
        let outer: json::Value = json::from_str(&envelope).expect("envelope json");
        assert_eq!(outer["signatures"][0]["method"], json!("ed25519"));

        // The signature covers the exact signed bytes.
        let entries: Vec<Signature> = json::from_slice(&signatures).expect("signatures");
        assert_eq!(entries.len(), 1);
        let sig_bytes = ::base64::decode(&entries[0].sig).expect("sig b64");
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&sig_bytes);
        let public = ed25519::public_key(&SEED);
        assert!(ed25519::verify(&public, &signed, &signature));
    }

    #[test]
    fn manifest_reports_attacks() {
        let mut state = device();
        state.set_attack(Attack::TargetsVersion);

        let (signed, _) = render(&state);
        let body: json::Value = json::from_slice(&signed).expect("signed json");
        assert_eq!(body["attacks_detected"], json!("Targets rollback attempted"));
        assert_eq!(body["installed_image"]["filepath"], json!(""));
    }

    #[test]
    fn manifest_before_any_install() {
        let state = device();
        let (signed, _) = render(&state);
        let body: json::Value = json::from_slice(&signed).expect("signed json");
        assert_eq!(body["attacks_detected"], json!(""));
        assert_eq!(body["installed_image"]["filepath"], json!("noimage"));
        assert_eq!(body["installed_image"]["fileinfo"]["hashes"]["nohash"], json!(""));
        assert_eq!(body["installed_image"]["fileinfo"]["length"], json!(0));
    }
}
