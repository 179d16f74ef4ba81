use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use zeroize::Zeroize;

use super::{BoxFuture, KerberosClient};
use crate::ccache::CredentialCache;
use crate::credential::KerberosCredential;
use crate::krb5_conf::RENEW_LIFETIME;
use crate::options::{KerberosOptions, KRB5_CCNAME_ENV, KRB5_CONFIG_ENV, KRB5_KTNAME_ENV};
use crate::{Error, ErrorKind, Result};

const KINIT: &str = "kinit";
const KVNO: &str = "kvno";

/// Drives the MIT Kerberos command line tools.
///
/// Every child gets `KRB5_CONFIG`, `KRB5CCNAME` and `KRB5_KTNAME` pointing at the option paths
/// and is killed if the returned future is dropped.
#[derive(Debug, Clone)]
pub struct MitKerberosClient {
    kinit: OsString,
    kvno: OsString,
}

impl Default for MitKerberosClient {
    fn default() -> Self {
        Self {
            kinit: KINIT.into(),
            kvno: KVNO.into(),
        }
    }
}

impl MitKerberosClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses other `kinit` and `kvno` executables.
    pub fn with_programs(kinit: impl Into<OsString>, kvno: impl Into<OsString>) -> Self {
        Self {
            kinit: kinit.into(),
            kvno: kvno.into(),
        }
    }

    fn command(&self, program: &OsString, options: &KerberosOptions) -> Command {
        let mut command = Command::new(program);
        command
            .env(KRB5_CONFIG_ENV, &options.config_file)
            .env(KRB5_CCNAME_ENV, file_name(&options.cache_file))
            .env(KRB5_KTNAME_ENV, file_name(&options.keytab_file))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command
    }

    async fn run(&self, mut command: Command, name: &str, stdin: Option<&[u8]>) -> Result<()> {
        if stdin.is_some() {
            command.stdin(Stdio::piped());
        }

        let mut child = command
            .spawn()
            .map_err(|err| Error::new(ErrorKind::InternalError, format!("cannot start {}: {}", name, err)))?;

        if let (Some(input), Some(mut child_stdin)) = (stdin, child.stdin.take()) {
            child_stdin.write_all(input).await?;
            // closing stdin ends the prompt
            drop(child_stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);

            return Err(Error::new(
                ErrorKind::LogonDenied,
                format!("{} failed with {}: {}", name, output.status, stderr.trim()),
            ));
        }

        trace!(name, stdout = %String::from_utf8_lossy(&output.stdout).trim(), "Command succeeded");

        Ok(())
    }
}

impl KerberosClient for MitKerberosClient {
    fn authenticate<'a>(
        &'a self,
        options: &'a KerberosOptions,
        credential: &'a KerberosCredential,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let principal = credential.principal().to_string();
            debug!(%principal, "Running kinit");

            let mut command = self.command(&self.kinit, options);
            command
                .arg("-r")
                .arg(RENEW_LIFETIME)
                .arg("-c")
                .arg(file_name(&options.cache_file))
                .arg(&principal);

            let mut password = credential.password().as_ref().clone().into_bytes();
            password.push(b'\n');
            let result = self.run(command, "kinit", Some(&password)).await;
            password.zeroize();

            result
        })
    }

    fn renew<'a>(&'a self, options: &'a KerberosOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            debug!("Running kinit -R");

            let mut command = self.command(&self.kinit, options);
            command.arg("-R").arg("-c").arg(file_name(&options.cache_file));

            self.run(command, "kinit -R", None).await
        })
    }

    fn request_service_ticket<'a>(
        &'a self,
        options: &'a KerberosOptions,
        spn: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            debug!(spn, "Running kvno");

            let mut command = self.command(&self.kvno, options);
            command.arg("-c").arg(file_name(&options.cache_file)).arg(spn);
            self.run(command, "kvno", None).await?;

            let cache = CredentialCache::load(&options.cache_file)?;
            let ticket = cache.service_ticket(spn).ok_or_else(|| {
                Error::new(
                    ErrorKind::NoCredentials,
                    format!("no ticket for `{}` in the credential cache", spn),
                )
            })?;

            Ok(ticket.ticket.clone())
        })
    }
}

fn file_name(path: &Path) -> OsString {
    let mut name = OsString::from("FILE:");
    name.push(path);
    name
}
