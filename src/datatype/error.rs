use hex::FromHexError;
use json::Error as SerdeJsonError;
use std::convert::From;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::num::ParseIntError;
use std::str::Utf8Error;

use datatype::tuf::Role;
use tokenizer::JsonErr;


/// System-wide errors that are returned from `Result` type failures.
#[derive(Debug)]
pub enum Error {
    Downgrade(Role),
    Expired(Role),
    Hex(FromHexError),
    Int(ParseIntError),
    Json(JsonErr),
    OversizedMetadata(Role),
    Parse(String),
    Serde(SerdeJsonError),
    SignatureThreshold(Role, String),
    Threshold(String),
    Time(String),
    Utf8(Utf8Error),
    WrongType(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let inner: String = match *self {
            Error::Downgrade(role)      => format!("Uptane: {} metadata version older than current", role),
            Error::Expired(role)        => format!("Uptane: {} metadata has expired", role),
            Error::Hex(ref err)         => format!("Not valid hex data: {}", err),
            Error::Int(ref err)         => format!("Integer parse error: {}", err),
            Error::Json(ref err)        => format!("JSON parse error: {}", err),
            Error::OversizedMetadata(role) => format!("Uptane: {} metadata exceeds size limit", role),
            Error::Parse(ref err)       => format!("Parse error: {}", err),
            Error::Serde(ref err)       => format!("JSON serialization error: {}", err),
            Error::SignatureThreshold(role, ref err) => format!("Uptane {} signatures: {}", role, err),
            Error::Threshold(ref err)   => format!("Invalid threshold: {}", err),
            Error::Time(ref err)        => format!("Time parse error: {}", err),
            Error::Utf8(ref err)        => format!("Utf8 error: {}", err),
            Error::WrongType(ref err)   => format!("Uptane: unexpected metadata type: {}", err),
        };
        write!(f, "{}", inner)
    }
}

impl StdError for Error {}

macro_rules! derive_from {
    ([ $( $from: ident => $to: ident ),* ]) => {
        $(impl From<$from> for Error {
            fn from(err: $from) -> Error {
                Error::$to(err)
            }
        })*
    };
}

derive_from!([
    FromHexError   => Hex,
    JsonErr        => Json,
    ParseIntError  => Int,
    SerdeJsonError => Serde,
    Utf8Error      => Utf8
]);
