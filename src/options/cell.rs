use std::sync::Arc;

use tokio::sync::watch;

use super::KerberosOptions;

/// Holds the current options snapshot and notifies subscribers when it is replaced.
#[derive(Debug, Clone)]
pub struct OptionsCell {
    sender: Arc<watch::Sender<Arc<KerberosOptions>>>,
}

impl OptionsCell {
    pub fn new(options: KerberosOptions) -> Self {
        let (sender, _) = watch::channel(Arc::new(options));

        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> Arc<KerberosOptions> {
        Arc::clone(&self.sender.borrow())
    }

    /// Replaces the snapshot. Readers never observe a partially updated value.
    pub fn publish(&self, options: KerberosOptions) {
        self.sender.send_replace(Arc::new(options));
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<KerberosOptions>> {
        self.sender.subscribe()
    }
}
