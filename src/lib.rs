//! Keeps a service account authenticated to a Kerberos realm.
//!
//! From a handful of settings the crate writes a `krb5.conf`, derives the service account keys
//! into a keytab, and keeps a renewed TGT in the credential cache so that the MIT Kerberos
//! library of the host process finds everything it needs.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use krb5_sidecar::client::MitKerberosClient;
//! use krb5_sidecar::network_client::TokioNetworkClient;
//! use krb5_sidecar::options::{resolve, EnvSource, OptionsCell};
//! use krb5_sidecar::worker::TicketLifecycleWorker;
//! use krb5_sidecar::kdc::KDC_TIMEOUT;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = resolve(&EnvSource)?;
//! let worker = TicketLifecycleWorker::new(
//!     OptionsCell::new(options),
//!     Arc::new(MitKerberosClient::new()),
//!     Arc::new(TokioNetworkClient::new(KDC_TIMEOUT)?),
//! );
//!
//! worker.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate tracing;

pub mod ccache;
pub mod client;
pub mod credential;
pub mod enctype;
pub mod flags;
pub mod kdc;
pub mod keytab;
pub mod krb5_conf;
pub mod network_client;
pub mod options;
pub mod principal;
pub mod probe;
pub mod worker;

mod crypto;
mod error;
mod handle;
mod secret;
#[cfg(test)]
mod test_data;
mod utils;

pub use self::credential::{CredentialFactory, KerberosCredential};
pub use self::error::{Error, ErrorKind, Result};
pub use self::handle::SidecarHandle;
pub use self::krb5_conf::Krb5Conf;
pub use self::options::{KerberosOptions, OptionsCell, ValidationErrors};
pub use self::secret::Secret;
pub use self::worker::{LifecycleState, TicketLifecycleWorker};
