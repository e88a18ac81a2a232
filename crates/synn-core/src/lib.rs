// === Data Model ===
pub mod block;
pub mod error;

// === Collaborator Contracts ===
pub mod interfaces;

// === In-Memory Collaborators ===
pub mod authority;
pub mod crypto;
pub mod mempool;
pub mod networking;
pub mod state_store;

// === Re-exports for broader ecosystem access ===
pub use block::{
    sub_headers_root, unix_millis, Block, BlockBody, BlockHeader, Hash32, SubBlockBody,
    SubBlockHeader, ZERO_HASH,
};
pub use error::{AuthorityError, CryptoError, LedgerError, NetworkError};
pub use interfaces::{
    Address, AuthorityNode, AuthorityProvider, InboundMessage, Ledger, Network, Signer,
    TransactionSource,
};
pub use authority::StaticAuthority;
pub use crypto::Ed25519Signer;
pub use mempool::MemoryPool;
pub use networking::LoopbackNetwork;
pub use state_store::MemoryLedger;

/// Role under which sub-blocks are proposed and endorsed.
pub const POS_ROLE: &str = "pos";

/// Role under which main blocks are sealed.
pub const POW_ROLE: &str = "pow";
