//! TGT lifecycle.
//!
//! The worker bootstraps the Kerberos files of the current options, then polls the credential
//! cache every second and authenticates or renews whenever the TGT requires it. Each options
//! change triggers a new bootstrap without pausing the poll loop.

mod tgt;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use self::tgt::{evaluate_tgt, TgtStatus, TicketAction, RENEWAL_WINDOW};
use crate::client::KerberosClient;
use crate::credential::CredentialFactory;
use crate::handle::SidecarHandle;
use crate::keytab::{derive_keytab, KeytabWriter};
use crate::krb5_conf;
use crate::network_client::AsyncNetworkClient;
use crate::options::{KerberosOptions, OptionsCell};
use crate::utils::run_blocking;
use crate::{Error, Result};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Bootstrapping,
    /// The last bootstrap completed.
    Authenticated,
    /// The last bootstrap stopped at one of its stages.
    Failed,
    Valid,
    RenewalDue,
    Renewing,
    Reauthenticating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    RealmConfig,
    Credential,
    Keytab,
    Ticket,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            BootstrapStage::RealmConfig => "realm configuration",
            BootstrapStage::Credential => "credential",
            BootstrapStage::Keytab => "keytab",
            BootstrapStage::Ticket => "ticket",
        };

        f.write_str(stage)
    }
}

#[derive(Debug, Clone, Error)]
#[error("bootstrap failed at the {stage} stage: {source}")]
pub struct BootstrapError {
    pub stage: BootstrapStage,
    #[source]
    pub source: Error,
}

trait StageExt<T> {
    fn stage(self, stage: BootstrapStage) -> std::result::Result<T, BootstrapError>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: BootstrapStage) -> std::result::Result<T, BootstrapError> {
        self.map_err(|source| BootstrapError { stage, source })
    }
}

struct Inner {
    options: OptionsCell,
    client: Arc<dyn KerberosClient>,
    credentials: CredentialFactory,
    keytab_writer: KeytabWriter,
    state: watch::Sender<LifecycleState>,
}

/// Keeps a usable TGT for the service account in the credential cache.
#[derive(Clone)]
pub struct TicketLifecycleWorker {
    inner: Arc<Inner>,
}

impl TicketLifecycleWorker {
    pub fn new(
        options: OptionsCell,
        client: Arc<dyn KerberosClient>,
        network_client: Arc<dyn AsyncNetworkClient>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Uninitialized);

        Self {
            inner: Arc::new(Inner {
                options,
                client,
                credentials: CredentialFactory::new(network_client),
                keytab_writer: KeytabWriter::new(),
                state,
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    pub fn handle(&self) -> SidecarHandle {
        SidecarHandle::new(
            self.inner.options.clone(),
            Arc::clone(&self.inner.client),
            self.subscribe_state(),
        )
    }

    fn set_state(&self, state: LifecycleState) {
        self.inner.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }

            trace!(from = ?current, to = ?state, "Lifecycle state changed");
            *current = state;
            true
        });
    }

    /// Writes the realm configuration and keytab of the current options, then makes sure a TGT
    /// is cached.
    #[instrument(level = "debug", skip(self))]
    pub async fn bootstrap(&self) -> std::result::Result<(), BootstrapError> {
        self.set_state(LifecycleState::Bootstrapping);

        let result = self.bootstrap_stages().await;
        match &result {
            Ok(()) => self.set_state(LifecycleState::Authenticated),
            Err(_) => self.set_state(LifecycleState::Failed),
        }

        result
    }

    async fn bootstrap_stages(&self) -> std::result::Result<(), BootstrapError> {
        let options = self.inner.options.current();

        let realm_config = run_blocking({
            let options = Arc::clone(&options);
            move || krb5_conf::build(&options)
        })
        .await
        .stage(BootstrapStage::RealmConfig)?;

        let credential = self
            .inner
            .credentials
            .get(&options, &realm_config)
            .await
            .stage(BootstrapStage::Credential)?;

        let keytab = run_blocking({
            let options = Arc::clone(&options);
            move || derive_keytab(&credential, &options)
        })
        .await
        .stage(BootstrapStage::Keytab)?;
        self.inner
            .keytab_writer
            .write(&options.keytab_file, &keytab)
            .await
            .stage(BootstrapStage::Keytab)?;
        info!(path = %options.keytab_file.display(), entries = keytab.entries.len(), "Keytab written");

        self.ensure_ticket_with(&options, true)
            .await
            .stage(BootstrapStage::Ticket)?;

        Ok(())
    }

    /// Authenticates or renews when the cached TGT requires it.
    pub async fn ensure_ticket(&self, initial: bool) -> Result<TicketAction> {
        let options = self.inner.options.current();

        self.ensure_ticket_with(&options, initial).await
    }

    async fn ensure_ticket_with(&self, options: &KerberosOptions, initial: bool) -> Result<TicketAction> {
        let tickets = self.inner.client.tickets(options).await?;
        let status = evaluate_tgt(&tickets, OffsetDateTime::now_utc());
        let action = status.action();

        match action {
            TicketAction::Authenticate => {
                self.set_state(LifecycleState::Reauthenticating);
                debug!(?status, "Obtaining a new TGT");

                let realm_config = krb5_conf::load(options)?;
                let credential = self.inner.credentials.get(options, &realm_config).await?;
                self.inner.client.authenticate(options, &credential).await?;

                info!(principal = %credential.principal(), "Service authenticated successfully");
            }
            TicketAction::Renew => {
                self.set_state(LifecycleState::RenewalDue);
                self.set_state(LifecycleState::Renewing);

                self.inner.client.renew(options).await?;

                debug!("Service successfully renewed TGT");
            }
            TicketAction::None => {
                if initial {
                    info!(account = %options.service_account, ?status, "Existing valid TGT found in the ticket cache");
                }
            }
        }

        self.set_state(LifecycleState::Valid);

        Ok(action)
    }

    /// Runs until `cancel` fires, or returns after the bootstrap in run-once mode.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut options_changes = self.inner.options.subscribe();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.bootstrap() => {
                if let Err(err) = result {
                    error!(%err, "Error initializing Kerberos");
                }
            }
        }

        if self.inner.options.current().run_once {
            info!("Run-once mode, stopping after the bootstrap");
            return;
        }

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = options_changes.changed() => {
                    if !self.on_options_changed(changed.is_ok(), &cancel) {
                        break;
                    }
                }
                _ = interval.tick() => {
                    // a pending change abandons the tick; the next one runs with the new options
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        changed = options_changes.changed() => {
                            if !self.on_options_changed(changed.is_ok(), &cancel) {
                                break;
                            }
                        }
                        result = self.ensure_ticket(false) => {
                            if let Err(err) = result {
                                error!(%err, "Failure obtaining TGT");
                            }
                        }
                    }
                }
            }
        }

        debug!("Ticket lifecycle worker stopped");
    }

    /// Returns false once the options cell is closed.
    fn on_options_changed(&self, open: bool, cancel: &CancellationToken) -> bool {
        if !open {
            warn!("Options cell closed, no more reloads");
            return false;
        }

        info!("Options changed, bootstrapping again");
        self.spawn_bootstrap(cancel.clone());

        true
    }

    fn spawn_bootstrap(&self, cancel: CancellationToken) {
        let worker = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = worker.bootstrap() => {
                    if let Err(err) = result {
                        error!(%err, "Error trying to authenticate after options change");
                    }
                }
            }
        });
    }
}

impl fmt::Debug for TicketLifecycleWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketLifecycleWorker")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
