use hex::FromHex;
use std::str;

use crypto::VerifyCtx;
use datatype::{Attack, Error, Key, KeyId, KeyType, Role, RoleMeta, Root, UptaneTime};
use datatype::tuf::{ROLE_MAX_KEYS, ROOT_MAX_KEYS};
use signatures::{self, SignatureEntry, VERIFY_CTX_POOL_SIZE};
use state::State;
use tokenizer::{self, JsonErr, Token, TokenKind, Tokenizer};

/// Root documents are small; anything larger than this is treated as an
/// attack on the device's memory.
pub const ROOT_MAX_SIZE: usize = 8 * 1024;


/// Verify and ingest a complete root metadata document.
///
/// A new root must carry a quorum of signatures under the *previous*
/// root's key set and a quorum under its *own* key set, so a key rotation
/// cannot be forged by either generation alone. When no root is stored
/// yet, the document bootstraps trust and only its own quorum is checked.
/// On success the stored root is replaced wholesale.
pub fn parse_root<S: State>(state: &mut S, metadata: &[u8], now: UptaneTime) -> Result<Root, Error> {
    if metadata.len() > ROOT_MAX_SIZE {
        state.set_attack(Attack::RootLarge);
        return Err(Error::OversizedMetadata(Role::Root));
    }

    let mut tokenizer = Tokenizer::new();
    let tok_count = tokenizer.parse(metadata, 0)?;
    let tokens = &tokenizer.tokens;

    if tok_count == 0 || tokens[0].kind != TokenKind::Object {
        debug!("root metadata: top-level object expected");
        return Err(Error::Json(JsonErr::Invalid));
    }
    if tokens[0].end < 0 {
        debug!("root metadata: truncated document");
        return Err(Error::Json(JsonErr::Invalid));
    }
    let members = tokens[0].size;
    let mut idx = 1; // consume object token

    let mut signatures_pos: Option<usize> = None;

    for _ in 0..members {
        if idx + 1 >= tok_count {
            debug!("root metadata: truncated top-level object");
            return Err(Error::Json(JsonErr::Invalid));
        }
        let name = tokens[idx];
        if tokenizer::token_eq(metadata, 0, &name, b"signatures") {
            idx += 1; // consume name token
            signatures_pos = Some(idx);
            idx = tokenizer::skip_subtree(tokens, tok_count, idx);
        } else if tokenizer::token_eq(metadata, 0, &name, b"signed") {
            idx += 1; // consume name token
            let signed_tok = tokens[idx];
            if signed_tok.kind != TokenKind::Object {
                debug!("root metadata: signed object expected");
                return Err(Error::Json(JsonErr::Invalid));
            }

            // Signers must be locked in before the signed region opens.
            let sig_pos = match signatures_pos {
                Some(pos) => pos,
                None => {
                    debug!("root metadata: no signatures before signed object");
                    return Err(Error::Json(JsonErr::Invalid));
                }
            };
            let region = &metadata[signed_tok.start as usize..signed_tok.end as usize];

            // Quorum one: the previous root's signing keys.
            if let Some(old) = state.root().cloned() {
                let mut pos = sig_pos;
                let entries = signatures::parse_signatures(
                    metadata, 0, tokens, tok_count, &mut pos,
                    &old.role_keys(Role::Root), Role::Root)?;
                let valid = verify_region(&entries, region);
                if valid < old.root_role.threshold {
                    debug!("root rejected by previous quorum: {} of {} signatures valid",
                           valid, old.root_role.threshold);
                    state.set_attack(Attack::RootThreshold);
                    return Err(Error::SignatureThreshold(
                        Role::Root, format!("{} of {} under previous root", valid, old.root_role.threshold)));
                }
            } else {
                info!("no stored root, accepting bootstrap root on first install");
            }

            let mut signed_pos = idx;
            let candidate = parse_signed(metadata, tokens, tok_count, &mut signed_pos)?;

            // Quorum two: the candidate's own signing keys, guarding
            // against rotation downgrades.
            let mut pos = sig_pos;
            let entries = signatures::parse_signatures(
                metadata, 0, tokens, tok_count, &mut pos,
                &candidate.role_keys(Role::Root), Role::Root)?;
            let valid = verify_region(&entries, region);
            if valid < candidate.root_role.threshold {
                debug!("root rejected by its own quorum: {} of {} signatures valid",
                       valid, candidate.root_role.threshold);
                state.set_attack(Attack::RootThreshold);
                return Err(Error::SignatureThreshold(
                    Role::Root, format!("{} of {} under new root", valid, candidate.root_role.threshold)));
            }

            let current_version = state.root().map(|old| old.version);
            if current_version.map_or(false, |current| candidate.version < current) {
                state.set_attack(Attack::RootVersion);
                return Err(Error::Downgrade(Role::Root));
            }
            if candidate.expires <= now {
                state.set_attack(Attack::RootExpired);
                return Err(Error::Expired(Role::Root));
            }

            state.set_root(candidate.clone());
            return Ok(candidate);
        } else {
            trace!("unknown field in root metadata");
            idx += 1; // consume name token
            idx = tokenizer::skip_subtree(tokens, tok_count, idx);
        }
    }

    debug!("root metadata: no signed object found");
    Err(Error::Json(JsonErr::Invalid))
}

/// Feed the exact signed-region bytes to one verify context per parsed
/// signature and count the accepts. Contexts beyond the pool size are
/// never allocated.
fn verify_region(entries: &[SignatureEntry], region: &[u8]) -> u32 {
    let mut valid = 0;
    for entry in entries.iter().take(VERIFY_CTX_POOL_SIZE) {
        let mut ctx = VerifyCtx::new(&entry.signature, &entry.key.public);
        ctx.update(region);
        if ctx.finish() {
            valid += 1;
        } else {
            trace!("signature failed for keyid {}", entry.key.keyid);
        }
    }
    valid
}

/// Decode the `signed` object into a candidate root. Unknown fields and
/// unknown key types are skipped; all recognized fields are mandatory.
fn parse_signed(input: &[u8], tokens: &[Token], tok_count: usize, pos: &mut usize)
                -> Result<Root, Error> {
    let mut idx = *pos;
    let members = tokens[idx].size;
    idx += 1; // consume object token

    let mut version: Option<u32> = None;
    let mut expires: Option<UptaneTime> = None;
    let mut keys: Option<Vec<Key>> = None;
    let mut roles: Option<(RoleMeta, RoleMeta)> = None;
    let mut type_seen = false;

    for _ in 0..members {
        if idx + 1 >= tok_count {
            return Err(Error::Json(JsonErr::Invalid));
        }
        let name = tokens[idx];
        if tokenizer::token_eq(input, 0, &name, b"_type") {
            idx += 1; // consume name token
            if !tokenizer::token_eq(input, 0, &tokens[idx], b"Root") {
                return Err(Error::WrongType(
                    String::from_utf8_lossy(tokenizer::token_bytes(input, 0, &tokens[idx])).into_owned()));
            }
            type_seen = true;
            idx += 1;
        } else if tokenizer::token_eq(input, 0, &name, b"expires") {
            idx += 1;
            let text = str::from_utf8(tokenizer::token_bytes(input, 0, &tokens[idx]))?;
            expires = Some(text.parse()?);
            idx += 1;
        } else if tokenizer::token_eq(input, 0, &name, b"version") {
            idx += 1;
            let value = token_i32(input, &tokens[idx])?;
            if value < 0 {
                return Err(Error::Parse(format!("negative root version {}", value)));
            }
            version = Some(value as u32);
            idx += 1;
        } else if tokenizer::token_eq(input, 0, &name, b"keys") {
            idx += 1;
            keys = Some(parse_keys(input, tokens, tok_count, &mut idx)?);
        } else if tokenizer::token_eq(input, 0, &name, b"roles") {
            idx += 1;
            // Roles reference keys by id; resolution happens lazily via
            // the finished key table, so parse order does not matter.
            roles = Some(parse_roles(input, tokens, tok_count, &mut idx)?);
        } else {
            trace!("unknown field in root signed object");
            idx += 1; // consume name token
            idx = tokenizer::skip_subtree(tokens, tok_count, idx);
        }
    }
    *pos = idx;

    if !type_seen {
        return Err(Error::WrongType("missing _type".into()));
    }
    match (version, expires, keys, roles) {
        (Some(version), Some(expires), Some(keys), Some((root_role, targets_role))) => {
            let root = Root {
                version:      version,
                expires:      expires,
                root_role:    root_role,
                targets_role: targets_role,
                keys:         keys,
            };
            // Quorum ids that do not resolve in the key table can never
            // sign; dropping them here keeps that invariant visible.
            if root.role_keys(Role::Root).is_empty() {
                debug!("root role resolves to no usable keys");
            }
            Ok(root)
        }
        _ => Err(Error::Parse("root signed object is missing a required field".into())),
    }
}

fn parse_keys(input: &[u8], tokens: &[Token], tok_count: usize, pos: &mut usize)
              -> Result<Vec<Key>, Error> {
    let mut idx = *pos;
    if tokens[idx].kind != TokenKind::Object {
        return Err(Error::Json(JsonErr::Invalid));
    }
    let members = tokens[idx].size;
    idx += 1; // consume object token

    let mut keys = Vec::new();

    for _ in 0..members {
        if idx + 1 >= tok_count {
            return Err(Error::Json(JsonErr::Invalid));
        }
        let id_tok = tokens[idx];
        if id_tok.kind != TokenKind::Str {
            return Err(Error::Json(JsonErr::Invalid));
        }

        let keyid = KeyId::from_hex_bytes(tokenizer::token_bytes(input, 0, &id_tok));
        idx += 1; // consume key id token

        if tokens[idx].kind != TokenKind::Object {
            return Err(Error::Json(JsonErr::Invalid));
        }
        let key_members = tokens[idx].size;
        idx += 1; // consume object token

        let mut keytype: Option<KeyType> = None;
        let mut public: Option<[u8; 32]> = None;

        for _ in 0..key_members {
            if idx + 1 >= tok_count {
                return Err(Error::Json(JsonErr::Invalid));
            }
            let name = tokens[idx];
            if tokenizer::token_eq(input, 0, &name, b"keytype") {
                idx += 1;
                if tokens[idx].kind == TokenKind::Str {
                    keytype = KeyType::from_bytes(tokenizer::token_bytes(input, 0, &tokens[idx]));
                }
                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
            } else if tokenizer::token_eq(input, 0, &name, b"keyval") {
                idx += 1;
                if tokens[idx].kind != TokenKind::Object {
                    return Err(Error::Json(JsonErr::Invalid));
                }
                let keyval_members = tokens[idx].size;
                idx += 1;
                for _ in 0..keyval_members {
                    if idx + 1 >= tok_count {
                        return Err(Error::Json(JsonErr::Invalid));
                    }
                    if tokenizer::token_eq(input, 0, &tokens[idx], b"public") {
                        idx += 1;
                        if tokens[idx].kind == TokenKind::Str {
                            let hex = tokenizer::token_bytes(input, 0, &tokens[idx]);
                            if hex.len() == 64 {
                                if let Ok(bytes) = Vec::from_hex(hex) {
                                    let mut value = [0u8; 32];
                                    value.copy_from_slice(&bytes);
                                    public = Some(value);
                                }
                            }
                        }
                        idx = tokenizer::skip_subtree(tokens, tok_count, idx);
                    } else {
                        trace!("unknown field in keyval object");
                        idx += 1;
                        idx = tokenizer::skip_subtree(tokens, tok_count, idx);
                    }
                }
            } else {
                trace!("unknown field in key object");
                idx += 1;
                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
            }
        }

        // A key with an unusable id, an unknown type or no decodable
        // public half is dropped; signatures naming it just never verify.
        match (keyid, keytype, public) {
            (Ok(keyid), Some(keytype), Some(public)) => {
                if keys.len() >= ROOT_MAX_KEYS {
                    return Err(Error::Parse("too many keys in root metadata".into()));
                }
                keys.push(Key { keytype: keytype, keyid: keyid, public: public });
            }
            _ => debug!("skipping unusable key entry in root metadata"),
        }
    }

    *pos = idx;
    Ok(keys)
}

fn parse_roles(input: &[u8], tokens: &[Token], tok_count: usize, pos: &mut usize)
               -> Result<(RoleMeta, RoleMeta), Error> {
    let mut idx = *pos;
    if tokens[idx].kind != TokenKind::Object {
        return Err(Error::Json(JsonErr::Invalid));
    }
    let members = tokens[idx].size;
    idx += 1; // consume object token

    let mut root_role: Option<RoleMeta> = None;
    let mut targets_role: Option<RoleMeta> = None;

    for _ in 0..members {
        if idx + 1 >= tok_count {
            return Err(Error::Json(JsonErr::Invalid));
        }
        let name = tokens[idx];
        if tokenizer::token_eq(input, 0, &name, b"root") {
            idx += 1;
            root_role = Some(parse_role(input, tokens, tok_count, &mut idx)?);
        } else if tokenizer::token_eq(input, 0, &name, b"targets") {
            idx += 1;
            targets_role = Some(parse_role(input, tokens, tok_count, &mut idx)?);
        } else {
            // Roles beyond root and targets belong to full verification.
            trace!("ignoring role not used by partial verification");
            idx += 1;
            idx = tokenizer::skip_subtree(tokens, tok_count, idx);
        }
    }
    *pos = idx;

    match (root_role, targets_role) {
        (Some(root_role), Some(targets_role)) => Ok((root_role, targets_role)),
        _ => Err(Error::Parse("root metadata must define root and targets roles".into())),
    }
}

fn parse_role(input: &[u8], tokens: &[Token], tok_count: usize, pos: &mut usize)
              -> Result<RoleMeta, Error> {
    let mut idx = *pos;
    if tokens[idx].kind != TokenKind::Object {
        return Err(Error::Json(JsonErr::Invalid));
    }
    let members = tokens[idx].size;
    idx += 1; // consume object token

    let mut threshold: Option<u32> = None;
    let mut keyids: Option<Vec<KeyId>> = None;

    for _ in 0..members {
        if idx + 1 >= tok_count {
            return Err(Error::Json(JsonErr::Invalid));
        }
        let name = tokens[idx];
        if tokenizer::token_eq(input, 0, &name, b"threshold") {
            idx += 1;
            let value = token_i32(input, &tokens[idx])?;
            if value < 1 || value > 1000 {
                return Err(Error::Threshold(format!("{} outside 1..=1000", value)));
            }
            threshold = Some(value as u32);
            idx += 1;
        } else if tokenizer::token_eq(input, 0, &name, b"keyids") {
            idx += 1;
            if tokens[idx].kind != TokenKind::Array {
                debug!("role keyids is not an array");
                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
                continue;
            }
            let elements = tokens[idx].size;
            idx += 1; // consume array token

            let mut ids = Vec::new();
            for _ in 0..elements {
                if idx >= tok_count {
                    return Err(Error::Json(JsonErr::Invalid));
                }
                if ids.len() >= ROLE_MAX_KEYS {
                    return Err(Error::Parse("too many keyids in role".into()));
                }
                if tokens[idx].kind == TokenKind::Str {
                    if let Ok(id) = KeyId::from_hex_bytes(tokenizer::token_bytes(input, 0, &tokens[idx])) {
                        ids.push(id);
                    } else {
                        trace!("skipping malformed keyid in role");
                    }
                }
                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
            }
            keyids = Some(ids);
        } else {
            trace!("unknown field in role object");
            idx += 1;
            idx = tokenizer::skip_subtree(tokens, tok_count, idx);
        }
    }
    *pos = idx;

    match (threshold, keyids) {
        (Some(threshold), Some(keyids)) => Ok(RoleMeta { threshold: threshold, keyids: keyids }),
        _ => Err(Error::Parse("role object needs threshold and keyids".into())),
    }
}

fn token_i32(input: &[u8], tok: &Token) -> Result<i32, Error> {
    let text = str::from_utf8(tokenizer::token_bytes(input, 0, tok))?;
    Ok(text.parse()?)
}
