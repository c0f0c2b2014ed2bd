pub mod session;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Machine-readable error body returned on every failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    #[schema(example = "Invalid token")]
    pub error: String,
    #[schema(example = "invalid_token")]
    pub code: String,
}
