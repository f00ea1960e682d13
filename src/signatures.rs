use base64;

use datatype::{Error, Key, KeyId, KeyType, Role};
use tokenizer::{self, JsonErr, Token, TokenKind};

/// Most signature entries kept from one `signatures` array.
pub const SIGNATURE_POOL_SIZE: usize = 16;
/// Most signature verifications run concurrently over one signed region.
pub const VERIFY_CTX_POOL_SIZE: usize = 4;

/// One usable entry from a `signatures` array: the decoded signature bound
/// to the role key its `keyid` resolved to.
#[derive(Clone, Copy)]
pub struct SignatureEntry {
    pub key:       Key,
    pub signature: [u8; 64],
}

fn find_key<'a>(keys: &'a [Key], keyid_hex: &[u8]) -> Option<&'a Key> {
    match KeyId::from_hex_bytes(keyid_hex) {
        Ok(id)  => keys.iter().find(|key| key.keyid == id),
        Err(_)  => None,
    }
}

/// The raw fields of one `{keyid, method, sig}` object starting at
/// `tokens[*pos]`, which is left just past the object. An entry that
/// cannot contribute (missing fields, unsupported method, value that does
/// not decode to 64 bytes) comes back as `None`; only structural damage is
/// an error.
fn parse_entry<'a>(input: &'a [u8], base: usize, tokens: &[Token], tok_count: usize,
                   pos: &mut usize) -> Result<Option<(&'a [u8], [u8; 64])>, Error> {
    let mut idx = *pos;
    if tokens[idx].kind != TokenKind::Object {
        debug!("signature entry: object expected");
        return Err(Error::Json(JsonErr::Invalid));
    }
    let members = tokens[idx].size;
    idx += 1; // consume object token

    let mut keyid: Option<&[u8]> = None;
    let mut signature: Option<[u8; 64]> = None;
    let mut method_ok = true;

    for _ in 0..members {
        if idx + 1 >= tok_count {
            debug!("signature entry: truncated object");
            return Err(Error::Json(JsonErr::Invalid));
        }
        let name = tokens[idx];
        if tokenizer::token_eq(input, base, &name, b"keyid") {
            idx += 1; // consume name token
            if tokens[idx].kind == TokenKind::Str {
                keyid = Some(tokenizer::token_bytes(input, base, &tokens[idx]));
                idx += 1;
            } else {
                trace!("signature keyid is not a string");
                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
            }
        } else if tokenizer::token_eq(input, base, &name, b"method") {
            idx += 1;
            if tokens[idx].kind == TokenKind::Str {
                let value = tokenizer::token_bytes(input, base, &tokens[idx]);
                if KeyType::from_bytes(value) != Some(KeyType::Ed25519) {
                    trace!("unsupported signature method");
                    method_ok = false;
                }
                idx += 1;
            } else {
                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
            }
        } else if tokenizer::token_eq(input, base, &name, b"sig") {
            idx += 1;
            if tokens[idx].kind == TokenKind::Str {
                let value = tokenizer::token_bytes(input, base, &tokens[idx]);
                match ::std::str::from_utf8(value).ok().and_then(|s| base64::decode(s).ok()) {
                    Some(ref decoded) if decoded.len() == 64 => {
                        let mut sig = [0u8; 64];
                        sig.copy_from_slice(decoded);
                        signature = Some(sig);
                    }
                    _ => trace!("signature value does not decode to 64 bytes"),
                }
                idx += 1;
            } else {
                idx = tokenizer::skip_subtree(tokens, tok_count, idx);
            }
        } else {
            trace!("unknown field in signature entry");
            idx += 1; // consume name token
            idx = tokenizer::skip_subtree(tokens, tok_count, idx);
        }
    }

    *pos = idx;
    if !method_ok {
        return Ok(None);
    }
    Ok(match (keyid, signature) {
        (Some(keyid), Some(sig)) => Some((keyid, sig)),
        _ => None,
    })
}

/// Walk the `signatures` array rooted at `tokens[*pos]`, resolving each
/// entry against `keys` (the current root's key set for `role`). `*pos`
/// ends just past the array. Entries with unknown key ids are dropped, as
/// are entries repeating an already-captured signer and entries beyond the
/// pool limit; none of those is an error.
pub fn parse_signatures(input: &[u8], base: usize, tokens: &[Token], tok_count: usize,
                        pos: &mut usize, keys: &[Key], role: Role)
                        -> Result<Vec<SignatureEntry>, Error> {
    let mut idx = *pos;
    if idx >= tok_count || tokens[idx].kind != TokenKind::Array {
        debug!("{} signatures: array expected", role);
        return Err(Error::Json(JsonErr::Invalid));
    }
    let elements = tokens[idx].size;
    idx += 1; // consume array token

    let mut entries: Vec<SignatureEntry> = Vec::new();
    for _ in 0..elements {
        if idx >= tok_count {
            debug!("{} signatures: truncated array", role);
            return Err(Error::Json(JsonErr::Invalid));
        }
        match parse_entry(input, base, tokens, tok_count, &mut idx)? {
            Some((keyid_hex, signature)) => {
                let key = match find_key(keys, keyid_hex) {
                    Some(key) => *key,
                    None => {
                        trace!("{} signatures: no role key for this keyid", role);
                        continue;
                    }
                };
                if entries.iter().any(|entry| entry.key.keyid == key.keyid) {
                    trace!("{} signatures: duplicate signer ignored", role);
                    continue;
                }
                if entries.len() >= SIGNATURE_POOL_SIZE {
                    trace!("{} signatures: pool full, entry ignored", role);
                    continue;
                }
                entries.push(SignatureEntry { key: key, signature: signature });
            }
            None => continue,
        }
    }

    *pos = idx;
    Ok(entries)
}
