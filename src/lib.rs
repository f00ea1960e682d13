#[macro_use]
extern crate log;
extern crate base64;
extern crate hex;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[cfg_attr(test, macro_use)]
extern crate serde_json as json;

#[cfg(test)]
#[macro_use]
extern crate maplit;

pub mod crypto;
pub mod datatype;
pub mod firmware;
pub mod manifest;
pub mod root;
pub mod secondary;
pub mod signatures;
pub mod state;
pub mod targets;
pub mod tokenizer;
