use datatype::{Attack, HashMethod, InstallationState, Key, Root, Targets};


/// Everything the verification core needs from its host: the ECU's
/// identity, its signing key, and persistence for the three metadata
/// records. Implementations are free to back the setters with flash,
/// files or nothing at all; the engines tolerate losing the most recent
/// write, since the next metadata exchange re-establishes state.
pub trait State {
    /// This ECU's serial, matched against `ecuIdentifiers` keys.
    fn ecu_serial(&self) -> &str;

    /// This ECU's hardware id, matched against `hardwareId` values.
    fn hardware_id(&self) -> &str;

    /// The device Ed25519 keypair used to sign version manifests.
    fn device_key(&self) -> (&Key, &[u8; 32]);

    /// The single image hash algorithm this device can verify.
    fn supported_hash(&self) -> HashMethod {
        HashMethod::Sha512
    }

    fn root(&self) -> Option<&Root>;
    fn set_root(&mut self, root: Root);

    fn targets(&self) -> Option<&Targets>;
    fn set_targets(&mut self, targets: Targets);

    fn installation_state(&self) -> Option<&InstallationState>;
    fn set_installation_state(&mut self, state: InstallationState);

    /// Record an attack verdict without touching the firmware facts. An
    /// attack before any install creates a record with empty firmware
    /// fields.
    fn set_attack(&mut self, attack: Attack) {
        debug!("attack detected: {:?}", attack);
        let mut record = self.installation_state()
            .cloned()
            .unwrap_or_else(InstallationState::empty);
        record.attack = attack;
        self.set_installation_state(record);
    }
}


/// A `State` held entirely in memory. The reference implementation for
/// hosts without persistent storage and the backing for the test suite.
pub struct MemoryState {
    ecu_serial:   String,
    hardware_id:  String,
    device_key:   Key,
    device_secret: [u8; 32],
    root:         Option<Root>,
    targets:      Option<Targets>,
    installation: Option<InstallationState>,
}

impl MemoryState {
    pub fn new(ecu_serial: String, hardware_id: String, device_key: Key, device_secret: [u8; 32])
               -> MemoryState {
        MemoryState {
            ecu_serial:   ecu_serial,
            hardware_id:  hardware_id,
            device_key:   device_key,
            device_secret: device_secret,
            root:         None,
            targets:      None,
            installation: None,
        }
    }
}

impl State for MemoryState {
    fn ecu_serial(&self) -> &str {
        &self.ecu_serial
    }

    fn hardware_id(&self) -> &str {
        &self.hardware_id
    }

    fn device_key(&self) -> (&Key, &[u8; 32]) {
        (&self.device_key, &self.device_secret)
    }

    fn root(&self) -> Option<&Root> {
        self.root.as_ref()
    }

    fn set_root(&mut self, root: Root) {
        trace!("storing root v{}", root.version);
        self.root = Some(root);
    }

    fn targets(&self) -> Option<&Targets> {
        self.targets.as_ref()
    }

    fn set_targets(&mut self, targets: Targets) {
        trace!("storing targets v{} for image `{}`", targets.version, targets.name);
        self.targets = Some(targets);
    }

    fn installation_state(&self) -> Option<&InstallationState> {
        self.installation.as_ref()
    }

    fn set_installation_state(&mut self, state: InstallationState) {
        self.installation = Some(state);
    }
}
