//! # crypto — validator identity and recoverable signatures
//!
//! `crypto` is the signing and verification boundary for the consensus core.
//! It knows nothing about heights, rounds, or votes — only about public
//! keys, signatures, and the addresses derived from them.
//!
//! ## Design Principles
//!
//! - **Stateless**: no storage, no persistence
//! - **Recoverable**: signatures carry a recovery id so a verifier can
//!   recover the signer's public key from a signature and digest alone,
//!   without the message carrying the key separately
//! - **Type-safe**: `PublicKey`/`Signature` wrap fixed-size byte arrays
//!   rather than passing raw slices around

pub mod error;
pub mod pubkey;
pub mod signature;

pub use error::CryptoError;
pub use pubkey::PublicKey;
pub use signature::{recover, verify, verify_address, Keypair, Signature};
