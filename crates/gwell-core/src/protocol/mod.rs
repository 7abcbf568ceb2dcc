//! Rendezvous wire format: the server-list exchange and the candidate probe.

pub mod server_list;

pub use server_list::{
    decode_server_list, encode_candidate_probe, encode_server_list, encode_server_list_request,
    ServerEntry, ServerListError, ENTRY_SIZE, MAX_ENTRIES,
};
