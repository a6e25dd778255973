//! Decoders generated at build time from the test protocols.
//!
//! Each protocol module holds `ids` (identifier constants),
//! `server_messages` (what a client receives), `server_messages_abort` (the
//! same with the abort policy) and, for `spice`, `client_messages`.

pub mod spice {
    include!(concat!(env!("OUT_DIR"), "/spice.rs"));
}

pub mod wire {
    include!(concat!(env!("OUT_DIR"), "/wire.rs"));
}
