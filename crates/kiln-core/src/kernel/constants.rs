/// Application name
pub const APP_NAME: &str = "kiln";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration file looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "kiln.toml";

/// Directory (inside workspaces and install roots) holding kiln's marker files
pub const STATE_DIR_NAME: &str = ".kiln";

/// Default installation root of the ROCm runtime
pub const DEFAULT_INSTALL_ROOT: &str = "/opt/rocm";

/// Default workspace directory, relative to the invocation directory
pub const DEFAULT_WORKSPACE_DIR: &str = "workspace";

/// Default GPU target (Strix Halo)
pub const DEFAULT_GPU_TARGET: &str = "gfx1151";

/// Default nightly platform
pub const DEFAULT_PLATFORM: &str = "linux";

/// Default llama.cpp repository
pub const DEFAULT_LLAMA_REPO: &str = "https://github.com/ggml-org/llama.cpp.git";

/// Default llama.cpp reference
pub const DEFAULT_LLAMA_REF: &str = "master";

/// Bucket listing TheRock nightly tarballs
pub const NIGHTLY_BUCKET_URL: &str = "https://therock-nightly-tarball.s3.amazonaws.com/";

/// Number of output lines kept for error reports
pub const DEFAULT_TAIL_LINES: usize = 200;

/// Default timeout for ordinary commands, in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30 * 60;

/// Default timeout for compile steps, in seconds
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 3 * 60 * 60;

/// Default timeout for archive downloads, in seconds
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60 * 60;

/// Default timeout for the smoke test, in seconds
pub const DEFAULT_VALIDATE_TIMEOUT_SECS: u64 = 10 * 60;
