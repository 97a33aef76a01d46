//! Fuzz target for ClientMessage::decode
//!
//! Every text frame a browser can send goes through this decoder:
//! - Malformed JSON and non-object envelopes
//! - Unknown event names
//! - Wrong payload shapes (strings for numbers, nested garbage)
//! - Non-finite and huge control values
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error,
//! and anything that decodes must survive an encode/decode cycle.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wheelhouse_proto::ClientMessage;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(message) = ClientMessage::decode(text) else {
        return;
    };

    let encoded = message.encode().expect("decoded message must encode");
    let again = ClientMessage::decode(&encoded).expect("encoded message must decode");
    assert_eq!(again.event(), message.event());
});
