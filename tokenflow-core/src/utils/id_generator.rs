use base58::ToBase58;
use tokenflow_common::prelude::*;
use uuid::Uuid;

/// Identifiers for executions and event registrations: a UUID v4 rendered in base58, short
/// enough to stay inline in an `InlineStr`.
pub struct IdGenerator;

impl IdGenerator {
    pub fn generate() -> InlineStr {
        Uuid::new_v4().as_bytes().to_base58().into()
    }
}
