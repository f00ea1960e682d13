extern crate base64;
extern crate hex;
#[macro_use]
extern crate serde_json as json;
extern crate uptiny;

use hex::ToHex;

use uptiny::crypto::ed25519;
use uptiny::datatype::{Attack, Key, KeyId, KeyType, UptaneTime};
use uptiny::secondary::Secondary;
use uptiny::state::{MemoryState, State};
use uptiny::targets::TargetsFlags;


const DEVICE_SEED: [u8; 32] = [0x36; 32];
const K1_SEED: [u8; 32] = [0x11; 32];
const K2_SEED: [u8; 32] = [0x22; 32];

const FW_NAME:   &'static str = "fw.bin";
const FW_IMAGE:  &'static [u8] = b"hello uptane!!\n";
const FW_SHA512: &'static str =
    "7dbae4c36a2494b731a9239911d3085d53d3e400886edb4ae2b9b78f40bda446\
     649e83ba2d81653f614cc66f5dd5d4dbd95afba854f148afbfae48d0ff4cc38a";

const TERMINAL: u16 = TargetsFlags::END_FOUND.0 | TargetsFlags::END_NOT_FOUND.0
    | TargetsFlags::ERROR.0 | TargetsFlags::WRONG_HW_ID.0
    | TargetsFlags::SIGNATURES_FAILED.0 | TargetsFlags::VERSION_FAILED.0;


fn now() -> UptaneTime {
    UptaneTime::new(2024, 1, 1, 0, 0, 0)
}

fn make_key(seed: &[u8; 32], id_byte: u8) -> Key {
    Key { keytype: KeyType::Ed25519, keyid: KeyId([id_byte; 32]), public: ed25519::public_key(seed) }
}

fn new_secondary() -> Secondary<MemoryState> {
    let device_key = make_key(&DEVICE_SEED, 0x13);
    Secondary::new(MemoryState::new("ecu-A".into(), "hw-A".into(), device_key, DEVICE_SEED))
}

fn root_value(version: u32, expires: &str, keys: &[Key], root_quorum: &[&Key],
              targets_quorum: &[&Key]) -> json::Value {
    let mut table = json::Map::new();
    for key in keys {
        table.insert(key.keyid.to_string(), json!({
            "keytype": "ed25519",
            "keyval": {"public": key.public.to_hex()},
        }));
    }
    json!({
        "_type": "Root",
        "expires": expires,
        "keys": json::Value::Object(table),
        "roles": {
            "root": {
                "keyids": root_quorum.iter().map(|key| key.keyid.to_string()).collect::<Vec<_>>(),
                "threshold": root_quorum.len(),
            },
            "targets": {
                "keyids": targets_quorum.iter().map(|key| key.keyid.to_string()).collect::<Vec<_>>(),
                "threshold": targets_quorum.len(),
            },
        },
        "version": version,
    })
}

fn targets_value(version: i32, expires: &str, serial: &str, hw_id: &str) -> json::Value {
    image_targets_value(version, expires, serial, hw_id, FW_NAME, FW_SHA512, FW_IMAGE.len())
}

fn image_targets_value(version: i32, expires: &str, serial: &str, hw_id: &str,
                       name: &str, sha512: &str, length: usize) -> json::Value {
    json!({
        "_type": "Targets",
        "expires": expires,
        "targets": {
            name: {
                "custom": {"ecuIdentifiers": {serial: {"hardwareId": hw_id}}},
                "hashes": {"sha512": sha512},
                "length": length,
            },
        },
        "version": version,
    })
}

fn envelope(signed: &json::Value, signers: &[(&[u8; 32], &Key)]) -> Vec<u8> {
    let signed_text = json::to_string(signed).expect("signed");
    let signatures = signers.iter()
        .map(|&(seed, key)| {
            let sig = ed25519::sign(seed, &key.public, signed_text.as_bytes());
            json!({
                "keyid": key.keyid.to_string(),
                "method": "ed25519",
                "sig": base64::encode(&sig[..]),
            })
        })
        .collect::<Vec<_>>();
    format!(r#"{{"signatures":{},"signed":{}}}"#,
            json::to_string(&signatures).unwrap(), signed_text).into_bytes()
}

/// Push a targets document the way the transport would: in small chunks,
/// retaining unconsumed bytes between feeds.
fn push_targets(secondary: &mut Secondary<MemoryState>, doc: &[u8]) -> TargetsFlags {
    secondary.parse_targets_init(now());
    let mut buf: Vec<u8> = Vec::new();
    let mut flags = TargetsFlags::NONE;
    for chunk in doc.chunks(16) {
        buf.extend_from_slice(chunk);
        let (consumed, result) = secondary.parse_targets_feed(&buf);
        flags = result;
        if flags.0 & TERMINAL != 0 {
            return flags;
        }
        buf.drain(..consumed);
    }
    flags
}

/// Provision the bootstrap root (K1, thresholds of one) and accept it.
fn provision(secondary: &mut Secondary<MemoryState>) -> Key {
    let k1 = make_key(&K1_SEED, 0x01);
    let root = root_value(1, "3021-07-13T01:02:03Z", &[k1], &[&k1], &[&k1]);
    secondary.parse_root(&envelope(&root, &[(&K1_SEED, &k1)]), now()).expect("bootstrap root");
    k1
}


#[test]
fn happy_path_full_update() {
    let mut secondary = new_secondary();
    let k1 = provision(&mut secondary);

    // A fresh device asks for one manifest before anything is installed.
    assert!(secondary.firmware_updated());
    assert!(!secondary.firmware_updated());

    // The primary re-pushes the same root, which stays current.
    let root = root_value(1, "3021-07-13T01:02:03Z", &[k1], &[&k1], &[&k1]);
    secondary.parse_root(&envelope(&root, &[(&K1_SEED, &k1)]), now()).expect("same root again");

    // Targets v2 assign fw.bin to this ECU.
    let targets = targets_value(2, "3021-07-13T01:02:03Z", "ecu-A", "hw-A");
    let flags = push_targets(&mut secondary, &envelope(&targets, &[(&K1_SEED, &k1)]));
    assert!(flags.contains(TargetsFlags::END_FOUND), "flags {:?}", flags);

    // The image arrives in two chunks and verifies.
    assert!(secondary.verify_firmware_init());
    secondary.verify_firmware_feed(&FW_IMAGE[..7]);
    secondary.verify_firmware_feed(&FW_IMAGE[7..]);
    assert!(secondary.verify_firmware_finalize());
    secondary.firmware_confirm();

    {
        let installed = secondary.state().installation_state().expect("installed");
        assert_eq!(installed.firmware_name, FW_NAME);
        assert_eq!(installed.firmware_hash.value.to_hex(), FW_SHA512);
        assert_eq!(installed.firmware_length, FW_IMAGE.len() as u32);
        assert_eq!(installed.attack, Attack::None);
    }

    assert!(secondary.firmware_updated());
    assert!(!secondary.firmware_updated());

    // The manifest reports the install and its signature checks out.
    let mut signed = Vec::new();
    let mut signatures = Vec::new();
    secondary.write_manifest(&mut signed, &mut signatures).expect("manifest");

    let body: json::Value = json::from_slice(&signed).expect("signed json");
    assert_eq!(body["attacks_detected"], json!(""));
    assert_eq!(body["ecu_serial"], json!("ecu-A"));
    assert_eq!(body["installed_image"]["filepath"], json!(FW_NAME));
    assert_eq!(body["installed_image"]["fileinfo"]["length"], json!(FW_IMAGE.len()));
    assert_eq!(body["installed_image"]["fileinfo"]["hashes"]["sha512"], json!(FW_SHA512));

    let entries: json::Value = json::from_slice(&signatures).expect("signatures json");
    let sig_bytes = base64::decode(entries[0]["sig"].as_str().expect("sig")).expect("b64");
    let mut signature = [0u8; 64];
    signature.copy_from_slice(&sig_bytes);
    assert!(ed25519::verify(&ed25519::public_key(&DEVICE_SEED), &signed, &signature));
}

#[test]
fn targets_rollback_is_rejected() {
    let mut secondary = new_secondary();
    let k1 = provision(&mut secondary);

    let v5 = targets_value(5, "3021-07-13T01:02:03Z", "ecu-A", "hw-A");
    let flags = push_targets(&mut secondary, &envelope(&v5, &[(&K1_SEED, &k1)]));
    assert!(flags.contains(TargetsFlags::END_FOUND), "flags {:?}", flags);

    let v4 = targets_value(4, "3021-07-13T01:02:03Z", "ecu-A", "hw-A");
    let flags = push_targets(&mut secondary, &envelope(&v4, &[(&K1_SEED, &k1)]));
    assert!(flags.contains(TargetsFlags::VERSION_FAILED), "flags {:?}", flags);

    assert_eq!(secondary.state().targets().expect("stored").version, 5);
    assert_eq!(secondary.state().installation_state().expect("attack").attack,
               Attack::TargetsVersion);
}

#[test]
fn expired_root_is_rejected() {
    let mut secondary = new_secondary();
    let k1 = provision(&mut secondary);

    let expired = root_value(2, "2020-01-01T00:00:00Z", &[k1], &[&k1], &[&k1]);
    assert!(secondary.parse_root(&envelope(&expired, &[(&K1_SEED, &k1)]), now()).is_err());
    assert_eq!(secondary.state().root().expect("stored").version, 1);
    assert_eq!(secondary.state().installation_state().expect("attack").attack,
               Attack::RootExpired);
}

#[test]
fn key_rotation_needs_both_quorums() {
    let mut secondary = new_secondary();
    let k1 = provision(&mut secondary);
    let k2 = make_key(&K2_SEED, 0x02);

    // v2 hands the quorums to K2 but only K1 signed it.
    let rotated = root_value(2, "3021-07-13T01:02:03Z", &[k1, k2], &[&k2], &[&k2]);
    assert!(secondary.parse_root(&envelope(&rotated, &[(&K1_SEED, &k1)]), now()).is_err());
    assert_eq!(secondary.state().root().expect("stored").version, 1);

    // Re-sent with both generations it is accepted.
    let both = envelope(&rotated, &[(&K1_SEED, &k1), (&K2_SEED, &k2)]);
    secondary.parse_root(&both, now()).expect("rotation");
    let stored = secondary.state().root().expect("stored");
    assert_eq!(stored.version, 2);
    assert_eq!(stored.targets_role.keyids, vec![k2.keyid]);
}

#[test]
fn wrong_hardware_id_leaves_no_trace() {
    let mut secondary = new_secondary();
    let k1 = provision(&mut secondary);

    let targets = targets_value(2, "3021-07-13T01:02:03Z", "ecu-A", "hw-B");
    let flags = push_targets(&mut secondary, &envelope(&targets, &[(&K1_SEED, &k1)]));
    assert!(flags.contains(TargetsFlags::WRONG_HW_ID), "flags {:?}", flags);
    assert!(secondary.state().targets().is_none());
    assert!(secondary.state().installation_state().is_none());
}

#[test]
fn tampered_image_keeps_previous_install() {
    let mut secondary = new_secondary();
    let k1 = provision(&mut secondary);

    // An older image is already installed on the device.
    let old_image = b"previous firmware generation\n";
    let old_hash = uptiny::crypto::sha512::digest(old_image).to_hex();
    let old = image_targets_value(2, "3021-07-13T01:02:03Z", "ecu-A", "hw-A",
                                  "old.bin", &old_hash, old_image.len());
    let flags = push_targets(&mut secondary, &envelope(&old, &[(&K1_SEED, &k1)]));
    assert!(flags.contains(TargetsFlags::END_FOUND), "flags {:?}", flags);
    assert!(secondary.verify_firmware_init());
    secondary.verify_firmware_feed(old_image);
    assert!(secondary.verify_firmware_finalize());
    secondary.firmware_confirm();
    assert!(secondary.firmware_updated());

    // A new campaign names fw.bin, but the delivered bytes are tampered
    // with at byte 7.
    let fresh = targets_value(3, "3021-07-14T01:02:03Z", "ecu-A", "hw-A");
    let flags = push_targets(&mut secondary, &envelope(&fresh, &[(&K1_SEED, &k1)]));
    assert!(flags.contains(TargetsFlags::END_FOUND), "flags {:?}", flags);

    assert!(secondary.verify_firmware_init());
    let mut tampered = FW_IMAGE.to_vec();
    tampered[7] ^= 0x01;
    secondary.verify_firmware_feed(&tampered);
    assert!(!secondary.verify_firmware_finalize());
    secondary.firmware_confirm(); // must be a no-op
    assert!(!secondary.firmware_updated());

    // The previous good install survives; only the attack field changed.
    let record = secondary.state().installation_state().expect("record");
    assert_eq!(record.attack, Attack::ImageHash);
    assert_eq!(record.firmware_name, "old.bin");
    assert_eq!(record.firmware_hash.value.to_hex(), old_hash);

    // The director learns about the attack through the next manifest.
    let mut signed = Vec::new();
    let mut signatures = Vec::new();
    secondary.write_manifest(&mut signed, &mut signatures).expect("manifest");
    let body: json::Value = json::from_slice(&signed).expect("signed json");
    assert_eq!(body["attacks_detected"], json!("Firmware image hash verification failed"));
    assert_eq!(body["installed_image"]["filepath"], json!("old.bin"));
}

#[test]
fn split_feeds_match_single_shot() {
    // The same document pushed whole and in tiny chunks must land in the
    // same stored state.
    let mut whole = new_secondary();
    let k1 = provision(&mut whole);
    let doc = envelope(&targets_value(2, "3021-07-13T01:02:03Z", "ecu-A", "hw-A"),
                       &[(&K1_SEED, &k1)]);

    whole.parse_targets_init(now());
    let (_, flags) = whole.parse_targets_feed(&doc);
    assert!(flags.contains(TargetsFlags::END_FOUND), "flags {:?}", flags);

    let mut chunked = new_secondary();
    provision(&mut chunked);
    let flags = push_targets(&mut chunked, &doc);
    assert!(flags.contains(TargetsFlags::END_FOUND), "flags {:?}", flags);

    assert_eq!(whole.state().targets(), chunked.state().targets());
}
