use hex::FromHex;
use std::cmp;
use std::ops::BitOr;
use std::str;

use crypto::VerifyCtx;
use datatype::{Attack, HashMethod, HashValue, Role, Targets, UptaneTime};
use datatype::tuf::{TARGETS_MAX_HASHES, TARGETS_MAX_NAME_LENGTH};
use signatures::{self, SignatureEntry, VERIFY_CTX_POOL_SIZE};
use state::State;
use tokenizer::{self, Token, TokenKind, Tokenizer};

/// A targets stream that grows beyond this is treated as an attack on the
/// device's memory.
pub const TARGETS_MAX_SIZE: usize = 16 * 1024;


/// Result bits reported by `TargetsParser::feed`. The low bits describe
/// progress, the high bits a terminal failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TargetsFlags(pub u16);

impl TargetsFlags {
    pub const NONE:              TargetsFlags = TargetsFlags(0x0000);
    /// Metadata closed and a target for this ECU was committed.
    pub const END_FOUND:         TargetsFlags = TargetsFlags(0x0001);
    /// Metadata closed without naming this ECU.
    pub const END_NOT_FOUND:     TargetsFlags = TargetsFlags(0x0002);
    /// The signed region opened during this feed.
    pub const BEGIN_SIGNED:      TargetsFlags = TargetsFlags(0x0004);
    /// The signed region closed during this feed.
    pub const END_SIGNED:        TargetsFlags = TargetsFlags(0x0008);
    /// Version regressed against the stored targets.
    pub const VERSION_FAILED:    TargetsFlags = TargetsFlags(0x1000);
    /// Fewer valid signatures than the targets threshold.
    pub const SIGNATURES_FAILED: TargetsFlags = TargetsFlags(0x2000);
    /// The target assigned to this ECU names a different hardware id.
    pub const WRONG_HW_ID:       TargetsFlags = TargetsFlags(0x4000);
    /// Malformed metadata or another terminal parse failure.
    pub const ERROR:             TargetsFlags = TargetsFlags(0x8000);

    pub fn contains(&self, other: TargetsFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: TargetsFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for TargetsFlags {
    type Output = TargetsFlags;

    fn bitor(self, other: TargetsFlags) -> TargetsFlags {
        TargetsFlags(self.0 | other.0)
    }
}


#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ParseState {
    /// Waiting for the top-level object.
    Begin,
    /// Inside the top object, above `signatures` and `signed`.
    InTop,
    /// Waiting for the complete `signatures` array.
    InSignatures,
    /// `signed` name consumed, waiting for the object itself.
    BeforeSigned,
    /// Inside the `signed` object.
    InSigned,
    /// Skipping an unrecognized value.
    InIgnored,
    /// Inside `signed.targets`.
    InTargets,
    /// Terminal failure.
    Error,
}

enum TargetOutcome {
    NotForMe,
    ForMe {
        name:   String,
        hashes: Vec<HashValue>,
        length: u32,
    },
    WrongHwId,
    Error,
}


/// Resumable parser for targets metadata.
///
/// Callers feed successive slices of the document; each feed reports how
/// many bytes were consumed and the caller re-presents the unconsumed tail
/// (plus any new bytes) next time. Token offsets are absolute positions in
/// the underlying stream, so state carried across feeds never goes stale no
/// matter where the slices are cut. Bytes between the braces of the
/// `signed` object are forwarded exactly once into one verify context per
/// locked-in signer.
pub struct TargetsParser {
    tokenizer:  Tokenizer,
    token_pos:  usize,
    stream_pos: usize,
    state:      ParseState,
    prev_state: ParseState,
    now:        UptaneTime,

    signed_top:  usize,
    targets_top: usize,
    ignored_top: usize,

    entries:          Vec<SignatureEntry>,
    verifiers:        Vec<VerifyCtx>,
    valid_signatures: Option<u32>,

    signed_begin:  Option<usize>,
    signed_closed: bool,
    hash_pos:      usize,

    target_found: bool,
    pending:      Targets,
    done:         bool,
}

impl TargetsParser {
    pub fn new() -> TargetsParser {
        TargetsParser {
            tokenizer:  Tokenizer::new(),
            token_pos:  0,
            stream_pos: 0,
            state:      ParseState::Begin,
            prev_state: ParseState::Begin,
            now:        UptaneTime::default(),

            signed_top:  0,
            targets_top: 0,
            ignored_top: 0,

            entries:          Vec::new(),
            verifiers:        Vec::new(),
            valid_signatures: None,

            signed_begin:  None,
            signed_closed: false,
            hash_pos:      0,

            target_found: false,
            pending:      Targets::default(),
            done:         false,
        }
    }

    /// Discard any partial parse and start a new document. `now` is the
    /// caller's current UTC time, checked against `expires` when the
    /// metadata closes.
    pub fn init(&mut self, now: UptaneTime) {
        *self = TargetsParser::new();
        self.now = now;
    }

    /// Consume as much of `message` as possible. Returns the byte count
    /// consumed plus the result flags; the caller keeps unconsumed bytes
    /// and prepends them to the next feed.
    pub fn feed<S: State>(&mut self, state: &mut S, message: &[u8]) -> (usize, TargetsFlags) {
        let mut flags = TargetsFlags::NONE;

        if self.state == ParseState::Error {
            return (0, TargetsFlags::ERROR);
        }
        if self.done {
            return (0, TargetsFlags::NONE);
        }

        if self.stream_pos + message.len() > TARGETS_MAX_SIZE {
            state.set_attack(Attack::TargetsLarge);
            self.state = ParseState::Error;
            return (0, TargetsFlags::ERROR);
        }

        self.tokenizer.rewind(self.token_pos);
        let tok_count = match self.tokenizer.parse(message, self.stream_pos) {
            Ok(count) => count,
            Err(err) => {
                debug!("targets tokenization failed: {}", err);
                state.set_attack(Attack::TargetsThreshold);
                self.state = ParseState::Error;
                return (0, TargetsFlags::ERROR);
            }
        };

        let slice_end = self.stream_pos + message.len();

        let ecu_serial = state.ecu_serial().to_string();
        let hardware_id = state.hardware_id().to_string();

        let mut idx = self.token_pos;
        let mut break_parsing = false;
        let mut failure = TargetsFlags::NONE;

        while idx < tok_count && !break_parsing && self.state != ParseState::Error {
            let tok = self.tokenizer.tokens[idx];

            match self.state {
                ParseState::Begin => {
                    if tok.kind != TokenKind::Object {
                        debug!("targets metadata: top-level object expected");
                        self.state = ParseState::Error;
                    } else {
                        self.state = ParseState::InTop;
                        idx += 1; // consume object token
                    }
                }

                ParseState::InTop => {
                    if tokenizer::token_eq(message, self.stream_pos, &tok, b"signatures") {
                        self.state = ParseState::InSignatures;
                        idx += 1; // consume name token
                    } else if tokenizer::token_eq(message, self.stream_pos, &tok, b"signed") {
                        if self.entries.is_empty() {
                            debug!("signatures are not available for the signed part");
                            self.state = ParseState::Error;
                        } else {
                            self.state = ParseState::BeforeSigned;
                            idx += 1; // consume name token
                            self.signed_top = idx;
                        }
                    } else {
                        self.prev_state = ParseState::InTop;
                        self.state = ParseState::InIgnored;
                        idx += 1; // consume name token
                        self.ignored_top = idx;
                    }
                }

                ParseState::InIgnored => {
                    if self.ignored_top == idx {
                        // A primitive running into the end of the slice may
                        // continue in the next one; hold it back.
                        if tok.kind == TokenKind::Primitive && tok.end as usize == slice_end {
                            break_parsing = true;
                        } else {
                            idx += 1;
                        }
                    } else if self.tokenizer.tokens[self.ignored_top].end < 0 {
                        idx += 1; // still inside the ignored subtree
                    } else {
                        let end = self.tokenizer.tokens[self.ignored_top].end;
                        while idx < tok_count && self.tokenizer.tokens[idx].start < end {
                            idx += 1;
                        }
                        // The next state consumes the current token itself.
                        self.state = self.prev_state;
                    }
                }

                ParseState::InSignatures => {
                    if tok.end < 0 {
                        // Wait until the whole array is in one slice.
                        break_parsing = true;
                    } else {
                        let keys = match state.root() {
                            Some(root) => root.role_keys(Role::Targets),
                            None => Vec::new(),
                        };
                        let mut pos = idx;
                        match signatures::parse_signatures(message, self.stream_pos,
                                                           &self.tokenizer.tokens, tok_count,
                                                           &mut pos, &keys, Role::Targets) {
                            Ok(ref entries) if entries.is_empty() => {
                                debug!("no usable targets signatures");
                                self.state = ParseState::Error;
                            }
                            Ok(entries) => {
                                self.entries = entries;
                                self.state = ParseState::InTop;
                                idx = pos;
                            }
                            Err(err) => {
                                debug!("failed to parse targets signatures: {}", err);
                                self.state = ParseState::Error;
                            }
                        }
                    }
                }

                ParseState::BeforeSigned => {
                    if tok.kind != TokenKind::Object {
                        debug!("targets metadata: signed object expected");
                        self.state = ParseState::Error;
                    } else {
                        // Lock in the signers the verify-context pool can
                        // hold and open the hashed region.
                        self.entries.truncate(VERIFY_CTX_POOL_SIZE);
                        self.verifiers = self.entries.iter()
                            .map(|entry| VerifyCtx::new(&entry.signature, &entry.key.public))
                            .collect();
                        self.signed_begin = Some(tok.start as usize);
                        self.hash_pos = tok.start as usize;
                        flags.insert(TargetsFlags::BEGIN_SIGNED);
                        self.state = ParseState::InSigned;
                        idx += 1; // consume object token
                    }
                }

                ParseState::InSigned => {
                    let signed_end = self.tokenizer.tokens[self.signed_top].end;
                    if signed_end >= 0 && tok.start >= signed_end {
                        // Past the signed object; hand the token back.
                        self.state = ParseState::InTop;
                        continue;
                    }

                    if tokenizer::token_eq(message, self.stream_pos, &tok, b"_type") {
                        if idx == tok_count - 1 {
                            break_parsing = true; // value not yet available
                        } else {
                            idx += 1; // consume name token
                            if !tokenizer::token_eq(message, self.stream_pos,
                                                    &self.tokenizer.tokens[idx], b"Targets") {
                                debug!("wrong type of targets metadata");
                                self.state = ParseState::Error;
                            } else {
                                idx += 1; // consume value token
                            }
                        }
                    } else if tokenizer::token_eq(message, self.stream_pos, &tok, b"expires") {
                        if idx == tok_count - 1 {
                            break_parsing = true;
                        } else {
                            idx += 1; // consume name token
                            let value = self.tokenizer.tokens[idx];
                            let parsed = str::from_utf8(
                                    tokenizer::token_bytes(message, self.stream_pos, &value))
                                .ok()
                                .and_then(|text| text.parse::<UptaneTime>().ok());
                            match parsed {
                                Some(expires) => {
                                    self.pending.expires = expires;
                                    idx += 1; // consume value token
                                }
                                None => {
                                    debug!("invalid expiration date in targets metadata");
                                    self.state = ParseState::Error;
                                }
                            }
                        }
                    } else if tokenizer::token_eq(message, self.stream_pos, &tok, b"version") {
                        if idx == tok_count - 1 {
                            break_parsing = true;
                        } else {
                            let value = self.tokenizer.tokens[idx + 1];
                            if value.kind == TokenKind::Primitive && value.end as usize == slice_end {
                                // The number may continue in the next slice.
                                break_parsing = true;
                            } else {
                                idx += 1; // consume name token
                                match token_i32(message, self.stream_pos, &value) {
                                    Some(version) => {
                                        self.pending.version = version;
                                        idx += 1; // consume value token
                                    }
                                    None => {
                                        debug!("invalid version in targets metadata");
                                        self.state = ParseState::Error;
                                    }
                                }
                            }
                        }
                    } else if tokenizer::token_eq(message, self.stream_pos, &tok, b"targets") {
                        if idx == tok_count - 1 {
                            break_parsing = true;
                        } else {
                            idx += 1; // consume name token
                            self.targets_top = idx;
                            if self.tokenizer.tokens[idx].kind != TokenKind::Object {
                                debug!("targets metadata: targets object expected");
                                self.state = ParseState::Error;
                            } else {
                                self.state = ParseState::InTargets;
                                idx += 1; // consume object token
                            }
                        }
                    } else {
                        self.prev_state = ParseState::InSigned;
                        self.state = ParseState::InIgnored;
                        idx += 1; // consume name token
                        self.ignored_top = idx;
                    }
                }

                ParseState::InTargets => {
                    let targets_end = self.tokenizer.tokens[self.targets_top].end;
                    if targets_end >= 0 && tok.start >= targets_end {
                        // Past the targets object; back to the signed level.
                        self.state = ParseState::InSigned;
                        continue;
                    }

                    if tok.kind != TokenKind::Str {
                        debug!("target name expected");
                        self.state = ParseState::Error;
                        continue;
                    }

                    if idx + 1 >= tok_count || self.tokenizer.tokens[idx + 1].end < 0 {
                        // Wait for the complete name/object pair.
                        break_parsing = true;
                        continue;
                    }

                    let mut cursor = idx;
                    let outcome = parse_target(message, self.stream_pos, &self.tokenizer.tokens,
                                               tok_count, &mut cursor, &ecu_serial, &hardware_id);
                    match outcome {
                        TargetOutcome::Error => {
                            self.state = ParseState::Error;
                        }
                        TargetOutcome::WrongHwId => {
                            failure.insert(TargetsFlags::WRONG_HW_ID);
                            self.state = ParseState::Error;
                        }
                        TargetOutcome::NotForMe => {
                            idx = cursor;
                        }
                        TargetOutcome::ForMe { name, hashes, length } => {
                            if self.target_found {
                                debug!("multiple targets for this ECU");
                                self.state = ParseState::Error;
                            } else {
                                self.target_found = true;
                                self.pending.name = name;
                                self.pending.hashes = hashes;
                                self.pending.length = length;
                                idx = cursor;
                            }
                        }
                    }
                }

                ParseState::Error => unreachable!("loop guard"),
            }
        }

        if self.state == ParseState::Error {
            if failure.contains(TargetsFlags::WRONG_HW_ID) {
                return (0, TargetsFlags::WRONG_HW_ID);
            }
            state.set_attack(Attack::TargetsThreshold);
            return (0, TargetsFlags::ERROR);
        }

        // Forward newly arrived signed-region bytes into the verify
        // contexts. `hash_pos` is absolute, so re-presented bytes are fed
        // exactly once regardless of how the caller slices the stream.
        if self.signed_begin.is_some() {
            let signed_end = self.tokenizer.tokens[self.signed_top].end;
            let avail = if signed_end >= 0 {
                cmp::min(signed_end as usize, slice_end)
            } else {
                slice_end
            };
            if avail > self.hash_pos {
                let lo = self.hash_pos - self.stream_pos;
                let hi = avail - self.stream_pos;
                for verifier in &mut self.verifiers {
                    verifier.update(&message[lo..hi]);
                }
                self.hash_pos = avail;
            }
            if signed_end >= 0 {
                if !self.signed_closed {
                    self.signed_closed = true;
                    flags.insert(TargetsFlags::END_SIGNED);
                }
                if self.hash_pos >= signed_end as usize && self.valid_signatures.is_none() {
                    let verifiers = ::std::mem::replace(&mut self.verifiers, Vec::new());
                    let valid = verifiers.into_iter()
                        .map(|verifier| verifier.finish())
                        .filter(|&ok| ok)
                        .count();
                    trace!("targets signed region closed: {} valid signatures", valid);
                    self.valid_signatures = Some(valid as u32);
                }
            }
        }

        // Bytes are handed back up to the last settled token, skipping
        // separators so a closing brace is never re-presented to the
        // tokenizer after its object has been closed.
        let consumed_abs = if idx > self.token_pos {
            self.token_pos = idx;
            let last = self.tokenizer.tokens[idx - 1];
            if last.end >= 0 {
                let mut res = last.end as usize;
                if last.kind == TokenKind::Str {
                    res += 1; // closing quote
                }
                while res < slice_end {
                    match message[res - self.stream_pos] {
                        b':' | b',' | b'}' | b']' | b' ' | b'\t' | b'\r' | b'\n' => res += 1,
                        _ => break,
                    }
                }
                res
            } else {
                last.start as usize + 1
            }
        } else {
            self.stream_pos
        };
        let consumed = consumed_abs - self.stream_pos;
        self.stream_pos = consumed_abs;

        // The document is finished once its top object has closed and the
        // state machine has worked through every settled token.
        let meta_closed = tok_count > 0 && self.tokenizer.tokens[0].end >= 0 && idx >= tok_count;

        if meta_closed && !self.done {
            self.done = true;

            let valid = self.valid_signatures.unwrap_or(0);
            let threshold = state.root().map(|root| root.targets_role.threshold);
            if threshold.map_or(true, |threshold| valid < threshold) {
                debug!("targets signatures: {} of {:?} valid", valid, threshold);
                self.state = ParseState::Error;
                state.set_attack(Attack::TargetsThreshold);
                flags.insert(TargetsFlags::SIGNATURES_FAILED);
                return (consumed, flags);
            }

            let stored_version = state.targets().map(|targets| targets.version);
            if stored_version.map_or(false, |stored| self.pending.version < stored) {
                debug!("targets version regressed: {} < {:?}", self.pending.version, stored_version);
                self.state = ParseState::Error;
                state.set_attack(Attack::TargetsVersion);
                flags.insert(TargetsFlags::VERSION_FAILED);
                return (consumed, flags);
            }

            if self.pending.expires <= self.now {
                debug!("targets metadata expired at {}", self.pending.expires);
                self.state = ParseState::Error;
                state.set_attack(Attack::TargetsExpired);
                flags.insert(TargetsFlags::ERROR);
                return (consumed, flags);
            }

            if self.target_found {
                state.set_targets(self.pending.clone());
                flags.insert(TargetsFlags::END_FOUND);
            } else {
                flags.insert(TargetsFlags::END_NOT_FOUND);
            }
        }

        (consumed, flags)
    }
}

/// Parse one `"name": {...}` pair inside `signed.targets`, leaving `pos`
/// just past it. The pair is fully tokenized when this is called.
fn parse_target(input: &[u8], base: usize, tokens: &[Token], tok_count: usize, pos: &mut usize,
                ecu_serial: &str, hardware_id: &str) -> TargetOutcome {
    let mut idx = *pos;

    let name_tok = tokens[idx];
    if name_tok.len() > TARGETS_MAX_NAME_LENGTH {
        debug!("target name too long");
        return TargetOutcome::Error;
    }
    let name = match str::from_utf8(tokenizer::token_bytes(input, base, &name_tok)) {
        Ok(name) => name.to_string(),
        Err(_)   => {
            debug!("target name is not UTF-8");
            return TargetOutcome::Error;
        }
    };
    idx += 1; // consume target name token

    if tokens[idx].kind != TokenKind::Object {
        debug!("target value: object expected");
        return TargetOutcome::Error;
    }
    let members = tokens[idx].size;
    idx += 1; // consume object token

    let mut for_me = false;
    let mut hashes: Vec<HashValue> = Vec::new();
    let mut length: u32 = 0;

    for _ in 0..members {
        if idx + 1 >= tok_count {
            debug!("truncated target object");
            return TargetOutcome::Error;
        }
        let field = tokens[idx];
        if tokenizer::token_eq(input, base, &field, b"custom") {
            idx += 1; // consume name token
            if tokens[idx].kind != TokenKind::Object {
                debug!("target custom: object expected");
                return TargetOutcome::Error;
            }
            let custom_members = tokens[idx].size;
            idx += 1; // consume object token

            for _ in 0..custom_members {
                if idx + 1 >= tok_count {
                    return TargetOutcome::Error;
                }
                if tokenizer::token_eq(input, base, &tokens[idx], b"ecuIdentifiers") {
                    idx += 1; // consume name token
                    if tokens[idx].kind != TokenKind::Object {
                        debug!("ecuIdentifiers: object expected");
                        return TargetOutcome::Error;
                    }
                    let serial_count = tokens[idx].size;
                    idx += 1; // consume object token

                    for _ in 0..serial_count {
                        if idx + 1 >= tok_count {
                            return TargetOutcome::Error;
                        }
                        let is_for_me = tokenizer::token_eq(input, base, &tokens[idx],
                                                            ecu_serial.as_bytes());
                        idx += 1; // consume ECU serial token
                        if tokens[idx].kind != TokenKind::Object {
                            debug!("ecu identifier value: object expected");
                            return TargetOutcome::Error;
                        }
                        let entry_members = tokens[idx].size;
                        idx += 1; // consume object token

                        for _ in 0..entry_members {
                            if idx + 1 >= tok_count {
                                return TargetOutcome::Error;
                            }
                            if tokenizer::token_eq(input, base, &tokens[idx], b"hardwareId") {
                                idx += 1; // consume name token
                                if is_for_me && !tokenizer::token_eq(input, base, &tokens[idx],
                                                                     hardware_id.as_bytes()) {
                                    debug!("target names a different hardware id");
                                    return TargetOutcome::WrongHwId;
                                }
                                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
                            } else {
                                trace!("unknown field in an ecuIdentifier object");
                                idx += 1; // consume name token
                                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
                            }
                        }
                        if is_for_me {
                            for_me = true;
                        }
                    }
                } else {
                    trace!("unknown field in target custom");
                    idx += 1; // consume name token
                    idx = tokenizer::skip_subtree(tokens, tok_count, idx);
                }
            }
        } else if tokenizer::token_eq(input, base, &field, b"hashes") {
            idx += 1; // consume name token
            if tokens[idx].kind != TokenKind::Object {
                debug!("target hashes: object expected");
                return TargetOutcome::Error;
            }
            let hash_count = tokens[idx].size;
            idx += 1; // consume object token

            for _ in 0..hash_count {
                if idx + 1 >= tok_count {
                    return TargetOutcome::Error;
                }
                let method = HashMethod::from_bytes(tokenizer::token_bytes(input, base, &tokens[idx]));
                idx += 1; // consume algorithm token

                let method = match method {
                    Some(method) => method,
                    None => {
                        trace!("skipping hash with unknown algorithm");
                        idx = tokenizer::skip_subtree(tokens, tok_count, idx);
                        continue;
                    }
                };

                if hashes.len() >= TARGETS_MAX_HASHES {
                    debug!("too many hashes for one target");
                    idx = tokenizer::skip_subtree(tokens, tok_count, idx);
                    continue;
                }

                let value = tokens[idx];
                if value.kind != TokenKind::Str || value.len() != method.digest_len() * 2 {
                    debug!("invalid hash length for {}", method);
                    return TargetOutcome::Error;
                }
                match Vec::from_hex(tokenizer::token_bytes(input, base, &value)) {
                    Ok(bytes) => hashes.push(HashValue { method: method, value: bytes }),
                    Err(_) => {
                        debug!("failed to parse hash value");
                        return TargetOutcome::Error;
                    }
                }
                idx += 1; // consume hash token
            }
        } else if tokenizer::token_eq(input, base, &field, b"length") {
            idx += 1; // consume name token
            match token_i32(input, base, &tokens[idx]) {
                Some(value) if value >= 0 => {
                    length = value as u32;
                    idx += 1; // consume length token
                }
                _ => {
                    debug!("invalid target length");
                    return TargetOutcome::Error;
                }
            }
        } else {
            trace!("unknown field in a target");
            idx += 1; // consume name token
            idx = tokenizer::skip_subtree(tokens, tok_count, idx);
        }
    }

    *pos = idx;
    if for_me {
        TargetOutcome::ForMe { name: name, hashes: hashes, length: length }
    } else {
        TargetOutcome::NotForMe
    }
}

fn token_i32(input: &[u8], base: usize, tok: &Token) -> Option<i32> {
    str::from_utf8(tokenizer::token_bytes(input, base, tok))
        .ok()
        .and_then(|text| text.parse().ok())
}
