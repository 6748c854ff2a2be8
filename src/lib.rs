//! Boot-time device-tree overlay management.
//!
//! Compiles overlay sources, validates them against the device's active
//! base device tree and maintains the `fdt_overlays=` line the bootloader
//! reads to decide which overlays to apply.
//!
//! # Architecture
//!
//! ```text
//! overlayctl (binary)
//!     │
//!     ├── ActivationPipeline ── Compiler (dtc) ── Validator (fdtoverlay)
//!     │        │
//!     │        ├── DeviceTreeLocator ── fdt_path= in the bootloader env
//!     │        └── OverlayRegistry
//!     │                 └── ConfigFileStore ── overlays.txt
//!     │
//!     └── BootContext (built once from /etc/overlayctl.toml)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use overlayctl::{BootContext, OverlayRegistry};
//!
//! let ctx = BootContext::from_config(&overlayctl::config::load_config()?);
//! let registry = OverlayRegistry::new(&ctx);
//! let lock = registry.lock()?;
//! registry.disable(&lock, "verdin-imx8mp_spidev_overlay.dtbo")?;
//! ```

pub mod config;
pub mod config_file;
pub mod context;
pub mod error;
pub mod lock;
pub mod locator;
pub mod mount;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod registry;
pub mod tools;

pub use config_file::{ConfigFileStore, OverlayConfig};
pub use context::BootContext;
pub use error::OverlayError;
pub use lock::ConfigLock;
pub use locator::DeviceTreeLocator;
pub use pipeline::{ActivationPipeline, ActivationReport, ItemState};
pub use registry::{DirectiveState, OverlayRegistry};
