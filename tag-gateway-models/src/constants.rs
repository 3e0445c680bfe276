// Constants shared across the gateway crates

/// The default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "tag-gateway.toml";

/// Prefix for environment variable overrides (`TG__OPC__TIMEOUT_MS=2000`).
pub const ENV_PREFIX: &str = "TG";

/// Mapping keys ending with this suffix are routed to the controller on change.
pub const UPDATE_SUFFIX: &str = ".Update";

/// Mapping key written as a 32-bit integer instead of a float.
pub const STATUS_KEY: &str = "status";

/// Objects folder, root of the diagnostic browse.
pub const OBJECTS_FOLDER_ID: u32 = 85;

/// Children logged per level during a diagnostic browse.
pub const BROWSE_CHILDREN_PER_LEVEL: usize = 5;

/// Maximum depth of a diagnostic browse.
pub const BROWSE_MAX_DEPTH: usize = 5;
