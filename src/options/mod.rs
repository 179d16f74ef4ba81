//! Resolution and validation of the service account settings.
//!
//! Settings are looked up by key in a [`ConfigSource`] (the process environment by default),
//! unset file paths fall back to `$HOME/.krb5/*`, and every violation is collected into
//! [`ValidationErrors`] instead of stopping at the first one.

mod cell;
mod source;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub use cell::OptionsCell;
pub use source::{ConfigSource, EnvSource, FileSource, Layered, MapSource};
use thiserror::Error;

use crate::Secret;

pub const KRB5_CONFIG_ENV: &str = "KRB5_CONFIG";
pub const KRB5_CCNAME_ENV: &str = "KRB5CCNAME";
pub const KRB5_KTNAME_ENV: &str = "KRB5_KTNAME";
pub const SERVICE_ACCOUNT_ENV: &str = "KRB_SERVICE_ACCOUNT";
pub const PASSWORD_ENV: &str = "KRB_PASSWORD";
pub const KDC_ENV: &str = "KRB_KDC";
pub const RUN_ONCE_ENV: &str = "KRB_RUN_ONCE";
pub const RUN_ONCE_LEGACY_ENV: &str = "KRB_RunOnce";
pub const APP_HOSTNAME_ENV: &str = "APP_HOSTNAME";
pub const HOME_ENV: &str = "HOME";

const DEFAULT_DIRECTORY: &str = ".krb5";
const DEFAULT_CONFIG_FILE: &str = "krb5.conf";
const DEFAULT_CACHE_FILE: &str = "krb5cc";
const DEFAULT_KEYTAB_FILE: &str = "krb5.keytab";

const FILE_PREFIXES: [&str; 2] = ["FILE:", "WRFILE:"];

/// Validated settings of one configuration generation.
#[derive(Debug, Clone)]
pub struct KerberosOptions {
    pub config_file: PathBuf,
    pub cache_file: PathBuf,
    pub keytab_file: PathBuf,
    /// Always set when `generate_config` is true.
    pub kdc: Option<String>,
    /// `user@domain`.
    pub service_account: String,
    pub password: Secret<String>,
    pub application_hostname: Option<String>,
    /// The realm configuration file does not exist and will be generated.
    pub generate_config: bool,
    pub run_once: bool,
}

impl KerberosOptions {
    /// Local part of the service account.
    pub fn user_name(&self) -> &str {
        split_service_account(&self.service_account)
            .map(|(user, _)| user)
            .unwrap_or(&self.service_account)
    }

    /// Domain part of the service account.
    pub fn domain(&self) -> Option<&str> {
        split_service_account(&self.service_account).map(|(_, domain)| domain)
    }

    /// Upper-cased domain of the service account.
    pub fn default_realm(&self) -> Option<String> {
        self.domain().map(str::to_ascii_uppercase)
    }

    /// `http/<host>` and `HTTP/<host>` when the application hostname is known.
    pub fn service_principal_names(&self) -> Vec<String> {
        match &self.application_hostname {
            Some(host) => vec![format!("http/{}", host), format!("HTTP/{}", host)],
            None => Vec::new(),
        }
    }
}

/// Every violation found while validating settings, one message per field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid Kerberos options: {}", .errors.join("; "))]
pub struct ValidationErrors {
    pub errors: Vec<String>,
}

/// Splits `user@domain`. Both parts must be non-empty.
pub fn split_service_account(account: &str) -> Option<(&str, &str)> {
    account
        .split_once('@')
        .filter(|(user, domain)| !user.is_empty() && !domain.is_empty())
}

/// Reads, defaults and validates the settings.
///
/// Parent directories of the three file paths are created; nothing else is written.
pub fn resolve(source: &dyn ConfigSource) -> Result<KerberosOptions, ValidationErrors> {
    let default_directory = source.get(HOME_ENV).map(|home| Path::new(&home).join(DEFAULT_DIRECTORY));
    let path_setting = |key: &str, default_name: &str| {
        source
            .get(key)
            .map(|value| PathBuf::from(strip_file_prefix(&value)))
            .or_else(|| default_directory.as_ref().map(|dir| dir.join(default_name)))
    };

    let config_file = path_setting(KRB5_CONFIG_ENV, DEFAULT_CONFIG_FILE);
    let cache_file = path_setting(KRB5_CCNAME_ENV, DEFAULT_CACHE_FILE);
    let keytab_file = path_setting(KRB5_KTNAME_ENV, DEFAULT_KEYTAB_FILE);
    let service_account = source.get(SERVICE_ACCOUNT_ENV);
    let password = source.get(PASSWORD_ENV).map(Secret::new);
    let application_hostname = source.get(APP_HOSTNAME_ENV);
    let run_once = source
        .get(RUN_ONCE_ENV)
        .or_else(|| source.get(RUN_ONCE_LEGACY_ENV))
        .is_some_and(|value| parse_flag(&value));

    let generate_config = config_file.as_ref().is_none_or(|path| !path.exists());

    let kdc = source.get(KDC_ENV).or_else(|| {
        if generate_config {
            service_account
                .as_deref()
                .and_then(split_service_account)
                .map(|(_, domain)| domain.to_ascii_uppercase())
        } else {
            None
        }
    });

    if application_hostname.is_none() {
        warn!(
            "{} is not set. Service principal names will not be added to the keytab",
            APP_HOSTNAME_ENV
        );
    }

    let mut errors = Vec::new();

    for path in [&config_file, &cache_file, &keytab_file].into_iter().flatten() {
        if let Err(message) = create_parent_directory(path) {
            errors.push(message);
        }
    }

    match &config_file {
        None => errors.push(format!(
            "Kerberos config file not set. Use {} environmental variable to configure",
            KRB5_CONFIG_ENV
        )),
        Some(path) if !generate_config && !can_write(path) => errors.push(cannot_write(path)),
        Some(_) => {}
    }

    match &cache_file {
        None => errors.push(format!(
            "Kerberos ticket cache file not set. Use {} environmental variable to configure",
            KRB5_CCNAME_ENV
        )),
        Some(path) if !can_write(path) => errors.push(cannot_write(path)),
        Some(_) => {}
    }

    match &keytab_file {
        None => errors.push(format!(
            "Kerberos keytab file not set. Use {} environmental variable to configure",
            KRB5_KTNAME_ENV
        )),
        Some(path) if !can_write(path) => errors.push(cannot_write(path)),
        Some(_) => {}
    }

    match service_account.as_deref() {
        None => errors.push(format!(
            "Service account is not configured. Use {} environmental variable to configure",
            SERVICE_ACCOUNT_ENV
        )),
        Some(account) if split_service_account(account).is_none() => {
            errors.push("Service account is not in email format".to_owned())
        }
        Some(_) => {}
    }

    if password.is_none() {
        errors.push(format!(
            "Service password is not set. Use {} environmental variable to configure",
            PASSWORD_ENV
        ));
    }

    if generate_config && kdc.is_none() {
        errors.push(format!(
            "KDC is not configured. Use {} environmental variable to configure",
            KDC_ENV
        ));
    }

    match (config_file, cache_file, keytab_file, service_account, password) {
        (Some(config_file), Some(cache_file), Some(keytab_file), Some(service_account), Some(password))
            if errors.is_empty() =>
        {
            Ok(KerberosOptions {
                config_file,
                cache_file,
                keytab_file,
                kdc,
                service_account,
                password,
                application_hostname,
                generate_config,
                run_once,
            })
        }
        _ => Err(ValidationErrors { errors }),
    }
}

fn strip_file_prefix(value: &str) -> &str {
    FILE_PREFIXES
        .iter()
        .find_map(|prefix| value.strip_prefix(prefix))
        .unwrap_or(value)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn create_parent_directory(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|err| format!("Cannot create directory {}: {}", parent.display(), err)),
        _ => Ok(()),
    }
}

fn can_write(path: &Path) -> bool {
    OpenOptions::new().write(true).create(true).truncate(false).open(path).is_ok()
}

fn cannot_write(path: &Path) -> String {
    format!("Cannot open {} for writing", path.display())
}
