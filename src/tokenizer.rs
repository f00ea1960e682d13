use std::fmt::{self, Display, Formatter};

/// Number of slots in the token arena. Metadata documents that need more
/// tokens than this are rejected rather than heap-allocated.
pub const TOKEN_POOL_SIZE: usize = 100;

/// Tokenizer failures. Anything structural aborts the current parse; the
/// caller resets the parser before trying again.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JsonErr {
    /// The token arena is full.
    NoMem,
    /// The input is not JSON.
    Invalid,
}

impl Display for JsonErr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            JsonErr::NoMem   => write!(f, "token pool exhausted"),
            JsonErr::Invalid => write!(f, "malformed JSON"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Undefined,
    Object,
    Array,
    Str,
    Primitive,
}

/// One token in the arena. `start` and `end` are byte offsets into the
/// logical input stream (not the current slice), so they stay comparable
/// across feed calls. `end` is `-1` while the token extends past the bytes
/// seen so far; container tokens are filled in when the matching close
/// arrives. `size` counts direct children: keys for an object, elements for
/// an array, the value for a key.
#[derive(Clone, Copy, Debug)]
pub struct Token {
    pub kind:  TokenKind,
    pub start: i32,
    pub end:   i32,
    pub size:  i32,
}

impl Token {
    fn undefined() -> Token {
        Token { kind: TokenKind::Undefined, start: -1, end: -1, size: 0 }
    }

    /// Byte length of a closed token.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }
}

/// Fixed-capacity token arena plus the scan state needed to resume
/// tokenization across input slices.
///
/// The caller owns the resumption protocol: before each `parse` call it
/// resets `pos` to zero and `tok_next` to the index of the first token that
/// is not yet settled, then presents all unconsumed bytes as one slice.
/// Settled tokens keep their absolute offsets; unsettled ones are
/// regenerated identically because the same stream bytes are re-scanned.
pub struct Tokenizer {
    pub tokens:   [Token; TOKEN_POOL_SIZE],
    pub pos:      usize,
    pub tok_next: usize,
    tok_super:    isize,
}

impl Tokenizer {
    pub fn new() -> Tokenizer {
        Tokenizer {
            tokens:   [Token::undefined(); TOKEN_POOL_SIZE],
            pos:      0,
            tok_next: 0,
            tok_super: -1,
        }
    }

    /// Restart scanning at the beginning of a new slice, regenerating every
    /// token from `token_pos` upward.
    pub fn rewind(&mut self, token_pos: usize) {
        self.pos = 0;
        self.tok_next = token_pos;
    }

    fn alloc(&mut self) -> Result<usize, JsonErr> {
        if self.tok_next >= TOKEN_POOL_SIZE {
            return Err(JsonErr::NoMem);
        }
        let idx = self.tok_next;
        self.tok_next += 1;
        self.tokens[idx] = Token::undefined();
        Ok(idx)
    }

    /// Tokenize `input`, whose first byte sits at absolute stream offset
    /// `base`. Returns the number of tokens settled or in flight. A string
    /// or primitive cut off by the end of the slice is left for the next
    /// call; that is not an error.
    pub fn parse(&mut self, input: &[u8], base: usize) -> Result<usize, JsonErr> {
        while self.pos < input.len() {
            let c = input[self.pos];
            match c {
                b'{' | b'[' => {
                    let idx = self.alloc()?;
                    if self.tok_super >= 0 {
                        self.tokens[self.tok_super as usize].size += 1;
                    }
                    self.tokens[idx].kind = if c == b'{' { TokenKind::Object } else { TokenKind::Array };
                    self.tokens[idx].start = (base + self.pos) as i32;
                    self.tok_super = idx as isize;
                }

                b'}' | b']' => {
                    let kind = if c == b'}' { TokenKind::Object } else { TokenKind::Array };
                    let mut open = None;
                    for i in (0..self.tok_next).rev() {
                        if self.tokens[i].start != -1 && self.tokens[i].end == -1 {
                            open = Some(i);
                            break;
                        }
                    }
                    match open {
                        Some(i) if self.tokens[i].kind == kind => {
                            self.tokens[i].end = (base + self.pos + 1) as i32;
                        }
                        _ => return Err(JsonErr::Invalid),
                    }
                    self.tok_super = -1;
                    for i in (0..self.tok_next).rev() {
                        if self.tokens[i].start != -1 && self.tokens[i].end == -1 {
                            self.tok_super = i as isize;
                            break;
                        }
                    }
                }

                b'"' => {
                    if !self.parse_string(input, base)? {
                        // Cut off mid-string: wait for the rest.
                        return Ok(self.tok_next);
                    }
                    if self.tok_super >= 0 {
                        self.tokens[self.tok_super as usize].size += 1;
                    }
                }

                b' ' | b'\t' | b'\r' | b'\n' => {}

                b':' => {
                    self.tok_super = self.tok_next as isize - 1;
                }

                b',' => {
                    if self.tok_super >= 0 {
                        let kind = self.tokens[self.tok_super as usize].kind;
                        if kind != TokenKind::Array && kind != TokenKind::Object {
                            for i in (0..self.tok_next).rev() {
                                let tok = self.tokens[i];
                                if (tok.kind == TokenKind::Array || tok.kind == TokenKind::Object)
                                    && tok.start != -1 && tok.end == -1 {
                                    self.tok_super = i as isize;
                                    break;
                                }
                            }
                        }
                    }
                }

                _ => {
                    self.parse_primitive(input, base)?;
                    if self.tok_super >= 0 {
                        self.tokens[self.tok_super as usize].size += 1;
                    }
                }
            }
            self.pos += 1;
        }
        Ok(self.tok_next)
    }

    /// Scan a string token. Returns `Ok(false)` when the closing quote is
    /// beyond the current slice.
    fn parse_string(&mut self, input: &[u8], base: usize) -> Result<bool, JsonErr> {
        let start = self.pos;
        self.pos += 1;

        while self.pos < input.len() {
            let c = input[self.pos];
            if c == b'"' {
                let idx = self.alloc()?;
                self.tokens[idx].kind = TokenKind::Str;
                self.tokens[idx].start = (base + start + 1) as i32;
                self.tokens[idx].end = (base + self.pos) as i32;
                return Ok(true);
            }
            if c == b'\\' && self.pos + 1 < input.len() {
                self.pos += 1;
                match input[self.pos] {
                    b'"' | b'/' | b'\\' | b'b' | b'f' | b'r' | b'n' | b't' => {}
                    b'u' => {
                        self.pos += 1;
                        let mut i = 0;
                        while i < 4 && self.pos < input.len() {
                            if !input[self.pos].is_ascii_hexdigit() {
                                return Err(JsonErr::Invalid);
                            }
                            self.pos += 1;
                            i += 1;
                        }
                        self.pos -= 1;
                    }
                    _ => return Err(JsonErr::Invalid),
                }
            }
            self.pos += 1;
        }

        self.pos = start;
        Ok(false)
    }

    /// Scan a primitive (number, boolean, null). A primitive running into
    /// the end of the slice is emitted as-is; callers that cannot rule out
    /// a continuation hold it back until a delimiter confirms it.
    fn parse_primitive(&mut self, input: &[u8], base: usize) -> Result<(), JsonErr> {
        let start = self.pos;

        while self.pos < input.len() {
            match input[self.pos] {
                b'\t' | b'\r' | b'\n' | b' ' | b',' | b']' | b'}' | b':' => break,
                c if c < 32 || c >= 127 => return Err(JsonErr::Invalid),
                _ => self.pos += 1,
            }
        }

        let idx = self.alloc()?;
        self.tokens[idx].kind = TokenKind::Primitive;
        self.tokens[idx].start = (base + start) as i32;
        self.tokens[idx].end = (base + self.pos) as i32;
        self.pos -= 1;
        Ok(())
    }
}

/// Bytes of a closed token, given the slice holding the stream suffix that
/// starts at absolute offset `base`.
pub fn token_bytes<'a>(input: &'a [u8], base: usize, tok: &Token) -> &'a [u8] {
    &input[tok.start as usize - base..tok.end as usize - base]
}

/// Compare a closed string token against an expected name.
pub fn token_eq(input: &[u8], base: usize, tok: &Token, expected: &[u8]) -> bool {
    tok.end >= 0 && tok.len() == expected.len() && token_bytes(input, base, tok) == expected
}

/// Index of the first token past the subtree rooted at `idx`. The subtree
/// must be fully tokenized.
pub fn skip_subtree(tokens: &[Token], tok_count: usize, idx: usize) -> usize {
    match tokens[idx].kind {
        TokenKind::Object | TokenKind::Array => {
            let end = tokens[idx].end;
            let mut i = idx + 1;
            while i < tok_count && tokens[i].start < end {
                i += 1;
            }
            i
        }
        _ => idx + 1,
    }
}
