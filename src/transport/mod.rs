// Transport layer
// External collaborators the core talks to: the settlement ledger and the
// bundle relays
//
// Numan Thabit 2025 Nov

pub mod jsonrpc;
pub mod ledger;
pub mod relay;

pub use jsonrpc::JsonRpcLedger;
pub use ledger::{Block, Ledger, PoolState};
pub use relay::{BundlePayload, HttpRelayClient, RelayClient, RelayReceipt, ResolvedOperation};
