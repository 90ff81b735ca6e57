/// API version segment used in every route.
pub const API_VERSION: &str = "v0";

pub const API_PREFIX: &str = "/api/v0";

/// Alternative to `Authorization: Bearer` for the dispatch trigger.
pub const DISPATCH_TOKEN_HEADER: &str = "x-dispatch-token";

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

/// Headroom on top of the largest accepted file for multipart framing.
pub const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;
