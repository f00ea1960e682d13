use crypto::Sha512;
use datatype::{Attack, HashValue, InstallationState};
use state::State;


/// Streams a firmware image through SHA-512 and compares the digest and
/// byte count against what the verified targets metadata committed to.
///
/// One verification is in flight at a time; dropping the value abandons
/// it. `confirm` publishes the new installation record only after
/// `finalize` accepted the image.
pub struct FirmwareVerifier {
    expected:        HashValue,
    expected_length: u32,
    hash:            Option<Sha512>,
    fed:             u64,
    oversize:        bool,
    verified:        bool,
    name:            String,
}

impl FirmwareVerifier {
    /// Prepare to verify the image named by the stored targets. Returns
    /// `None` when there is nothing to do: no targets, no hash this
    /// device can check, or the committed hash already matches the
    /// installed firmware.
    pub fn from_state<S: State>(state: &S) -> Option<FirmwareVerifier> {
        let supported = state.supported_hash();
        let (expected, length, name) = match state.targets() {
            Some(targets) => match targets.hash(supported) {
                Some(hash) => (hash.clone(), targets.length, targets.name.clone()),
                None => {
                    info!("targets carry no {} hash, refusing to verify an image", supported);
                    return None;
                }
            },
            None => return None,
        };

        if let Some(installed) = state.installation_state() {
            if installed.firmware_hash.value == expected.value {
                info!("expected hash matches installed firmware, no update needed");
                return None;
            }
        }

        Some(FirmwareVerifier {
            expected:        expected,
            expected_length: length,
            hash:            Some(Sha512::new()),
            fed:             0,
            oversize:        false,
            verified:        false,
            name:            name,
        })
    }

    /// Forward a chunk of image bytes. Bytes beyond the committed length
    /// poison the verification and record `ImageLarge`.
    pub fn feed<S: State>(&mut self, state: &mut S, data: &[u8]) {
        self.fed += data.len() as u64;
        if !self.oversize && self.fed > self.expected_length as u64 {
            debug!("image exceeds committed length of {} bytes", self.expected_length);
            state.set_attack(Attack::ImageLarge);
            self.oversize = true;
        }
        if let Some(ref mut hash) = self.hash {
            hash.update(data);
        }
    }

    /// Close the stream and compare the computed digest byte-for-byte
    /// against the committed one.
    pub fn finalize<S: State>(&mut self, state: &mut S) -> bool {
        let hash = match self.hash.take() {
            Some(hash) => hash,
            None       => return false,
        };
        if self.oversize {
            return false;
        }

        let digest = hash.finish();
        if digest[..] != self.expected.value[..] {
            debug!("firmware digest does not match targets metadata");
            state.set_attack(Attack::ImageHash);
            return false;
        }

        self.verified = true;
        true
    }

    /// Publish the new installation record. A no-op unless `finalize`
    /// accepted; returns whether the record was written.
    pub fn confirm<S: State>(&self, state: &mut S) -> bool {
        if !self.verified {
            return false;
        }
        info!("firmware `{}` verified and installed", self.name);
        state.set_installation_state(InstallationState {
            firmware_name:   self.name.clone(),
            firmware_hash:   self.expected.clone(),
            firmware_length: self.expected_length,
            attack:          Attack::None,
        });
        true
    }
}


#[cfg(test)]
mod tests {
    use hex::FromHex;

    use datatype::{HashMethod, Key, KeyId, KeyType, Targets, UptaneTime};
    use state::MemoryState;
    use super::*;


    const FW_SHA512: &'static str =
        "7dbae4c36a2494b731a9239911d3085d53d3e400886edb4ae2b9b78f40bda446\
         649e83ba2d81653f614cc66f5dd5d4dbd95afba854f148afbfae48d0ff4cc38a";

    fn fw_hash() -> HashValue {
        HashValue { method: HashMethod::Sha512, value: Vec::from_hex(FW_SHA512).unwrap() }
    }

    fn device_with_targets(hashes: Vec<HashValue>) -> MemoryState {
        let key = Key { keytype: KeyType::Ed25519, keyid: KeyId([1; 32]), public: [2; 32] };
        let mut state = MemoryState::new("ecu-A".into(), "hw-A".into(), key, [3; 32]);
        state.set_targets(Targets {
            version: 2,
            expires: UptaneTime::new(3021, 7, 13, 1, 2, 3),
            name:    "secondary_firmware.txt".into(),
            hashes:  hashes,
            length:  15,
        });
        state
    }

    #[test]
    fn accepts_matching_image() {
        let mut state = device_with_targets(vec![fw_hash()]);
        let mut verifier = FirmwareVerifier::from_state(&state).expect("init");
        verifier.feed(&mut state, b"hello ");
        verifier.feed(&mut state, b"uptane!!\n");
        assert!(verifier.finalize(&mut state));
        assert!(verifier.confirm(&mut state));

        let installed = state.installation_state().expect("installed");
        assert_eq!(installed.firmware_name, "secondary_firmware.txt");
        assert_eq!(installed.firmware_hash, fw_hash());
        assert_eq!(installed.firmware_length, 15);
        assert_eq!(installed.attack, Attack::None);
    }

    #[test]
    fn rejects_flipped_byte() {
        let mut state = device_with_targets(vec![fw_hash()]);

        // A previous good install survives a later failed verification.
        let mut good = FirmwareVerifier::from_state(&state).expect("init");
        good.feed(&mut state, b"hello uptane!!\n");
        assert!(good.finalize(&mut state));
        assert!(good.confirm(&mut state));

        // Force a re-verification by clearing the record.
        state.set_installation_state(InstallationState::empty());

        let mut verifier = FirmwareVerifier::from_state(&state).expect("init");
        verifier.feed(&mut state, b"hello u_tane!!\n");
        assert!(!verifier.finalize(&mut state));
        assert!(!verifier.confirm(&mut state));
        assert_eq!(state.installation_state().expect("record").attack, Attack::ImageHash);
    }

    #[test]
    fn refuses_without_supported_hash() {
        let state = device_with_targets(vec![]);
        assert!(FirmwareVerifier::from_state(&state).is_none());
    }

    #[test]
    fn refuses_when_already_installed() {
        let mut state = device_with_targets(vec![fw_hash()]);
        let mut verifier = FirmwareVerifier::from_state(&state).expect("init");
        verifier.feed(&mut state, b"hello uptane!!\n");
        assert!(verifier.finalize(&mut state));
        assert!(verifier.confirm(&mut state));

        assert!(FirmwareVerifier::from_state(&state).is_none());
    }

    #[test]
    fn oversized_image_is_rejected() {
        let mut state = device_with_targets(vec![fw_hash()]);
        let mut verifier = FirmwareVerifier::from_state(&state).expect("init");
        verifier.feed(&mut state, b"hello uptane!!\n plus trailing garbage");
        assert!(!verifier.finalize(&mut state));
        assert_eq!(state.installation_state().expect("record").attack, Attack::ImageLarge);
    }

    #[test]
    fn finalize_twice_is_refused() {
        let mut state = device_with_targets(vec![fw_hash()]);
        let mut verifier = FirmwareVerifier::from_state(&state).expect("init");
        verifier.feed(&mut state, b"hello uptane!!\n");
        assert!(verifier.finalize(&mut state));
        assert!(!verifier.finalize(&mut state));
    }
}
