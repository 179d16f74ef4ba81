use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::sync::watch;

use crate::client::KerberosClient;
use crate::options::{KerberosOptions, OptionsCell};
use crate::worker::LifecycleState;
use crate::Result;

/// What the surrounding service may query while the worker runs.
#[derive(Clone)]
pub struct SidecarHandle {
    options: OptionsCell,
    client: Arc<dyn KerberosClient>,
    state: watch::Receiver<LifecycleState>,
}

impl SidecarHandle {
    pub(crate) fn new(
        options: OptionsCell,
        client: Arc<dyn KerberosClient>,
        state: watch::Receiver<LifecycleState>,
    ) -> Self {
        Self { options, client, state }
    }

    pub fn options(&self) -> Arc<KerberosOptions> {
        self.options.current()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Requests a service ticket for `spn` and returns it base64 encoded.
    #[instrument(level = "debug", skip(self))]
    pub async fn service_ticket(&self, spn: &str) -> Result<String> {
        let options = self.options.current();
        let ticket = self.client.request_service_ticket(&options, spn).await?;

        Ok(STANDARD.encode(ticket))
    }
}

impl fmt::Debug for SidecarHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SidecarHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
