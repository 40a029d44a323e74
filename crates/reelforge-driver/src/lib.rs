//! # ReelForge Driver
//!
//! Browser automation against a site whose markup changes without notice.
//!
//! - [`locator`]: role → ordered locator strategies, swapped wholesale
//! - [`driver::AutomationDriver`]: scrape / publish / metadata update with self-heal
//! - [`sandbox`]: capability-restricted patch evaluation (declarative or `deno`)
//! - [`policy`]: SHA-256 trust policy for remote patch code
//! - [`registry`]: HTTP client for the patch registry
//! - [`webdriver`]: W3C WebDriver session over HTTP

pub mod driver;
pub mod locator;
pub mod policy;
pub mod registry;
pub mod sandbox;
pub mod webdriver;

pub use driver::{AutomationDriver, Interaction, PublishMetadata, ScrapedSource};
pub use locator::{Locator, LocatorTable};
pub use policy::PatchPolicy;
pub use registry::EvoRegistryClient;
pub use sandbox::{DeclarativeSandbox, PatchSandbox, ScriptSandbox};
pub use webdriver::WebDriverLauncher;
