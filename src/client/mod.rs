//! Ticket acquisition and renewal.
//!
//! The lifecycle worker does not speak the Kerberos exchanges itself: it asks a
//! [`KerberosClient`] for tickets and reads the resulting credential cache.

mod mit;

use std::future::Future;
use std::pin::Pin;

pub use mit::MitKerberosClient;

use crate::ccache::CredentialCache;
use crate::credential::KerberosCredential;
use crate::options::KerberosOptions;
use crate::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Kerberos ticket operations against the cache named by the options.
///
/// Dropping a returned future cancels the operation.
pub trait KerberosClient: Send + Sync {
    /// Current content of the credential cache.
    fn tickets<'a>(&'a self, options: &'a KerberosOptions) -> BoxFuture<'a, Result<CredentialCache>> {
        Box::pin(async move { CredentialCache::load(&options.cache_file) })
    }

    /// Obtains a fresh TGT with the password of `credential`.
    fn authenticate<'a>(
        &'a self,
        options: &'a KerberosOptions,
        credential: &'a KerberosCredential,
    ) -> BoxFuture<'a, Result<()>>;

    /// Renews the TGT held in the cache.
    fn renew<'a>(&'a self, options: &'a KerberosOptions) -> BoxFuture<'a, Result<()>>;

    /// Obtains a service ticket for `spn` and returns its DER encoding.
    fn request_service_ticket<'a>(
        &'a self,
        options: &'a KerberosOptions,
        spn: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;
}
