//! Pod discovery.
//!
//! - [`PodDirectory`]: lists pods (Kubernetes API or a static list)
//! - [`DiscoveryConnector`]: calls a worker's Discovery RPC
//! - [`Scraper`]: combines the two into "which pods serve what"

pub mod client;
#[cfg(feature = "k8s")]
pub mod k8s;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod pods;
pub mod scraper;

pub use client::{DiscoveryConnector, GrpcDiscoveryConnector};
#[cfg(feature = "k8s")]
pub use k8s::K8sPodDirectory;
pub use pods::{DirectoryError, PodDirectory, PodInfo, StaticPodDirectory};
pub use scraper::{ScrapeError, Scraper};
