// Command name constants

pub const COMMAND_PUT: &str = "put";
pub const COMMAND_GET: &str = "get";
pub const COMMAND_GET_LOCAL: &str = "get-local";
pub const COMMAND_STATS: &str = "stats";
