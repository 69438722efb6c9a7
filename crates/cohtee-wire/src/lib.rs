// Author: Lukas Bower
// Purpose: Define the cohtee TLV wire format shared across all worlds.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Tag-length-value wire format used for every cross-world message.
//!
//! Every message exchanged between the non-secure guest, the secure
//! monitor and the trusted applet travels as one [`Tlv`] record: a tag
//! byte whose high bit marks embedded sub-records, a big-endian `u16`
//! length, and exactly `length` value bytes. The [`message`] module
//! layers typed commands and replies over the raw records.

mod message;
mod tlv;

pub use message::{
    AuthChallenge, AuthResult, AuthResponse, Command, DeviceIdentity, Reply, KEY_LEN, NONCE_LEN,
    SIG_LEN,
};
pub use tlv::{CodecError, MessageTag, Tlv, TlvReader, TLV_HEADER_LEN};
