//! Domain layer — pure Kademlia DHT and piece-storage logic, no I/O.

pub mod config;
pub mod contact;
pub mod errors;
pub mod kbucket;
pub mod node_id;
pub mod peer_state;
pub mod peer_store;
pub mod routing_table;
pub mod storage;

pub use config::KademliaConfig;
pub use contact::Contact;
pub use errors::{RoutingError, StorageError};
pub use kbucket::{Admission, KBucket};
pub use node_id::{Distance, NodeId};
pub use peer_state::{BlockKey, PeerConnectionState};
pub use peer_store::LocalPeerStore;
pub use routing_table::{InsertStep, RoutingTable, NUM_BUCKETS};
pub use storage::{Bitfield, BlockStatus, Storage};
