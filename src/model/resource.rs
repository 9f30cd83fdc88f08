use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An opaque serialized blob: a world, a blueprint, or any other payload a
/// job reads or produces. Stored in canonical JSON form regardless of the
/// wire format it arrived in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub json_data: String,
    pub file_format_version: i32,
}

impl Resource {
    pub fn new(id: Uuid, json_data: String, file_format_version: i32) -> Self {
        Self {
            id,
            json_data,
            file_format_version,
        }
    }
}
