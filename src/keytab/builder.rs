use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Keytab, KeytabEntry};
use crate::credential::KerberosCredential;
use crate::options::KerberosOptions;
use crate::principal::PrincipalName;
use crate::utils::{run_blocking, write_atomic};
use crate::Result;

/// Key version number of every derived entry.
pub const KEYTAB_KVNO: u32 = 1;
/// Timestamp of every derived entry. Fixed so that identical inputs give identical files.
pub const KEYTAB_TIMESTAMP: u32 = 0;

/// Derives the keytab of the service account.
///
/// Entries for `http/<host>` and `HTTP/<host>` come first, then the user principal. Each
/// principal gets one key per (encryption type, salt) pair of the credential.
#[instrument(level = "debug", skip_all, fields(principal = %credential.principal()))]
pub fn derive_keytab(credential: &KerberosCredential, options: &KerberosOptions) -> Result<Keytab> {
    let realm = credential.realm();

    let mut principals = options
        .service_principal_names()
        .iter()
        .map(|spn| PrincipalName::service(spn, realm))
        .collect::<Vec<_>>();
    principals.push(credential.principal());

    // keys depend on the password and salt only
    let keys = credential
        .salts()
        .iter()
        .map(|(etype, salt)| {
            let key = etype.derive_key(credential.password().as_ref().as_bytes(), salt.as_bytes())?;

            Ok((*etype, key))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(principals.len() * keys.len());
    for principal in principals {
        for (etype, key) in &keys {
            entries.push(KeytabEntry {
                principal: principal.clone(),
                timestamp: KEYTAB_TIMESTAMP,
                kvno: KEYTAB_KVNO,
                encryption_type: u16::from(etype.id()),
                key: key.clone(),
            });
        }
    }

    debug!(entries = entries.len(), "Keytab derived");

    Ok(Keytab { entries })
}

/// Writes keytab files one at a time.
///
/// Clones share the same lock, so concurrent bootstraps never interleave their writes.
#[derive(Debug, Clone, Default)]
pub struct KeytabWriter {
    lock: Arc<Mutex<()>>,
}

impl KeytabWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write(&self, path: &Path, keytab: &Keytab) -> Result<()> {
        let data = keytab.encode()?;
        let path: PathBuf = path.to_owned();

        let _guard = self.lock.lock().await;

        run_blocking(move || write_atomic(&path, &data)).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use proptest::prelude::*;

    use super::*;
    use crate::enctype::EncryptionType;
    use crate::principal::{NT_PRINCIPAL, NT_SRV_HST};
    use crate::Secret;

    fn options(application_hostname: Option<&str>) -> KerberosOptions {
        KerberosOptions {
            config_file: PathBuf::from("/etc/krb5.conf"),
            cache_file: PathBuf::from("/tmp/krb5cc"),
            keytab_file: PathBuf::from("/tmp/krb5.keytab"),
            kdc: None,
            service_account: "svc@example.com".to_owned(),
            password: Secret::new("P@ssw0rd".to_owned()),
            application_hostname: application_hostname.map(str::to_owned),
            generate_config: false,
            run_once: false,
        }
    }

    fn credential(password: &str, salts: Vec<(EncryptionType, String)>) -> KerberosCredential {
        KerberosCredential::new("svc", "EXAMPLE.COM", Secret::new(password.to_owned())).with_salts(salts)
    }

    #[test]
    fn entries_cover_spns_then_user() {
        let credential = credential(
            "P@ssw0rd",
            vec![
                (EncryptionType::Aes256CtsHmacSha196, "EXAMPLE.COMsvc".to_owned()),
                (EncryptionType::Rc4Hmac, String::new()),
            ],
        );

        let keytab = derive_keytab(&credential, &options(Some("app.example.com"))).unwrap();

        let principals = keytab
            .entries
            .iter()
            .map(|entry| (entry.principal.to_string(), entry.principal.name_type, entry.encryption_type))
            .collect::<Vec<_>>();
        assert_eq!(
            principals,
            [
                ("http/app.example.com@EXAMPLE.COM".to_owned(), NT_SRV_HST, 18),
                ("http/app.example.com@EXAMPLE.COM".to_owned(), NT_SRV_HST, 23),
                ("HTTP/app.example.com@EXAMPLE.COM".to_owned(), NT_SRV_HST, 18),
                ("HTTP/app.example.com@EXAMPLE.COM".to_owned(), NT_SRV_HST, 23),
                ("svc@EXAMPLE.COM".to_owned(), NT_PRINCIPAL, 18),
                ("svc@EXAMPLE.COM".to_owned(), NT_PRINCIPAL, 23),
            ]
        );
        assert!(keytab
            .entries
            .iter()
            .all(|entry| entry.kvno == KEYTAB_KVNO && entry.timestamp == KEYTAB_TIMESTAMP));
        // same password and salt give the same key whatever the principal
        assert_eq!(keytab.entries[0].key, keytab.entries[4].key);
    }

    #[test]
    fn no_hostname_means_user_entries_only() {
        let credential = credential("P@ssw0rd", vec![(EncryptionType::Rc4Hmac, String::new())]);

        let keytab = derive_keytab(&credential, &options(None)).unwrap();

        assert_eq!(keytab.entries.len(), 1);
        assert_eq!(keytab.entries[0].principal, PrincipalName::user("svc", "EXAMPLE.COM"));
    }

    #[tokio::test]
    async fn writer_replaces_previous_keytab() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("krb5.keytab");
        std::fs::write(&path, vec![0xFF; 4096]).unwrap();

        let credential = credential("P@ssw0rd", vec![(EncryptionType::Rc4Hmac, String::new())]);
        let keytab = derive_keytab(&credential, &options(None)).unwrap();

        KeytabWriter::new().write(&path, &keytab).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), keytab.encode().unwrap());
        assert_eq!(Keytab::load(&path).unwrap(), keytab);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn derivation_is_deterministic(password in "\\PC{0,24}", salt in "[A-Z.]{0,12}[a-z]{0,8}") {
            let salts = vec![
                (EncryptionType::Aes128CtsHmacSha196, salt.clone()),
                (EncryptionType::Rc4Hmac, String::new()),
            ];
            let options = options(Some("app.example.com"));

            let first = derive_keytab(&credential(&password, salts.clone()), &options).unwrap();
            let second = derive_keytab(&credential(&password, salts), &options).unwrap();

            prop_assert_eq!(first.encode().unwrap(), second.encode().unwrap());
        }
    }
}
