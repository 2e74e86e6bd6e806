//! Services module - Pure business logic for conversions and self-updates.
//!
//! Nothing in here knows about the front end; every input is an explicit
//! parameter, which keeps the services testable on their own.
//!
//! # Components
//!
//! - [`UrlNormalizer`]: Turns any accepted Figma URL into its [`CanonicalUrl`]
//! - [`ConversionService`]: Builds and runs the `tkdesigner` command line with a
//!   timeout, capturing merged stdout/stderr
//! - [`UpdateChecker`]: Polls the GitHub releases API and compares versions
//! - [`UpdateInstaller`]: Downloads a release archive with progress reporting,
//!   unpacks it and restarts the process
//!
//! # Usage Example
//!
//! ```ignore
//! use figma_converter::services::{ConversionService, UrlNormalizer};
//!
//! let url = UrlNormalizer::new().normalize("https://www.figma.com/design/abc123/App")?;
//! let service = ConversionService::new("tkdesigner", Duration::from_secs(300));
//!
//! let result = service.convert(&token, &url, &output_dir).await?;
//! println!("{}", result.output);
//! ```

pub mod conversion;
pub mod installer;
pub mod update;
pub mod url;

pub use conversion::{
    CompletedProcess, ConversionError, ConversionService, ProcessRunner, TokioProcessRunner,
    ToolCommand, create_output_dir, mask_token,
};
pub use installer::{DownloadProgress, InstallError, InstalledUpdate, UpdateInstaller};
pub use update::{
    AvailableUpdate, CheckFailure, ReleaseAsset, ReleaseDescriptor, UpdateCheckState, UpdateChecker,
    UpdateResult, parse_version,
};
pub use url::{CanonicalUrl, UrlFormatError, UrlNormalizer};
