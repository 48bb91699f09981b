//! The offline stage: final decryption with the electoral board key and vote decoding.

mod decode;
mod finalizer;
mod lock;
mod votes_file;

pub use decode::{factorize, DecodeError};
pub use finalizer::{FinalizeOutcome, OfflineFinalizer};
pub use lock::{BallotBoxLockGuard, BallotBoxLocks};
pub use votes_file::{ballot_box_dir, FINAL_PAYLOAD_FILE, VOTES_FILE};
