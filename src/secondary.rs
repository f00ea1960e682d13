use datatype::{Error, UptaneTime};
use firmware::FirmwareVerifier;
use manifest;
use root;
use state::State;
use targets::{TargetsFlags, TargetsParser};


/// The partial-verification agent: one value owning the host-provided
/// state plus the scratch the streaming engines carry between calls.
///
/// Everything here runs to completion on the caller's thread; suspension
/// happens only between `parse_targets_feed` and `verify_firmware_feed`
/// invocations. Only one metadata or firmware verification is in flight
/// at any moment, which also serializes use of the hash contexts.
pub struct Secondary<S: State> {
    state:    S,
    targets:  TargetsParser,
    firmware: Option<FirmwareVerifier>,
    updated:  bool,
}

impl<S: State> Secondary<S> {
    /// A fresh agent reports `firmware_updated` once so the primary
    /// fetches an initial manifest.
    pub fn new(state: S) -> Secondary<S> {
        Secondary {
            state:    state,
            targets:  TargetsParser::new(),
            firmware: None,
            updated:  true,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Verify a complete root document against both the stored and the
    /// candidate quorums, replacing the stored root on success.
    pub fn parse_root(&mut self, metadata: &[u8], now: UptaneTime) -> Result<(), Error> {
        root::parse_root(&mut self.state, metadata, now).map(|_| ())
    }

    /// Discard any partial targets parse and start over. `now` feeds the
    /// expiry check when the document closes.
    pub fn parse_targets_init(&mut self, now: UptaneTime) {
        self.targets.init(now);
    }

    /// Feed the next slice of the targets stream. Returns consumed bytes
    /// and result flags; the caller retains the unconsumed tail.
    pub fn parse_targets_feed(&mut self, message: &[u8]) -> (usize, TargetsFlags) {
        self.targets.feed(&mut self.state, message)
    }

    /// Begin verifying the image named by the stored targets. `false`
    /// means there is nothing to verify or nothing new to install.
    pub fn verify_firmware_init(&mut self) -> bool {
        self.firmware = FirmwareVerifier::from_state(&self.state);
        self.firmware.is_some()
    }

    pub fn verify_firmware_feed(&mut self, data: &[u8]) {
        if let Some(ref mut verifier) = self.firmware {
            verifier.feed(&mut self.state, data);
        }
    }

    pub fn verify_firmware_finalize(&mut self) -> bool {
        match self.firmware {
            Some(ref mut verifier) => verifier.finalize(&mut self.state),
            None                   => false,
        }
    }

    /// Publish the installation record for an image that passed
    /// `verify_firmware_finalize`.
    pub fn firmware_confirm(&mut self) {
        if let Some(ref verifier) = self.firmware {
            if verifier.confirm(&mut self.state) {
                self.updated = true;
            }
        }
    }

    /// One-shot flag: was there a new install since the last call?
    pub fn firmware_updated(&mut self) -> bool {
        let updated = self.updated;
        self.updated = false;
        updated
    }

    /// Render the signed version manifest fragments into the two
    /// caller-owned buffers.
    pub fn write_manifest(&self, signed_buf: &mut Vec<u8>, signatures_buf: &mut Vec<u8>)
                          -> Result<(), Error> {
        manifest::write_manifest(&self.state, signed_buf, signatures_buf)
    }
}
