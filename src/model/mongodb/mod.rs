mod collection;
mod errors;
mod records;

pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use errors::{is_duplicate_key, DUPLICATE_KEY};
pub use records::{InitialPayloadRecord, ShufflePayloadRecord};
