use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::enctype::EncryptionType;
use crate::kdc::kdc_candidates;
use crate::krb5_conf::Krb5Conf;
use crate::network_client::AsyncNetworkClient;
use crate::options::KerberosOptions;
use crate::principal::PrincipalName;
use crate::probe::{probe_salts, ProbeOutcome};
use crate::{Error, ErrorKind, Result, Secret};

/// Password credential of the service account together with the salts its keys are derived with.
#[derive(Clone)]
pub struct KerberosCredential {
    user_name: String,
    realm: String,
    password: Secret<String>,
    salts: Vec<(EncryptionType, String)>,
}

impl KerberosCredential {
    /// Credential with the default salt of every supported encryption type.
    pub fn new(user_name: impl Into<String>, realm: impl Into<String>, password: Secret<String>) -> Self {
        let user_name = user_name.into();
        let realm = realm.into();
        let salts = Self::default_salts(&user_name, &realm);

        Self {
            user_name,
            realm,
            password,
            salts,
        }
    }

    pub fn with_salts(mut self, salts: Vec<(EncryptionType, String)>) -> Self {
        self.salts = salts;
        self
    }

    pub fn default_salts(user_name: &str, realm: &str) -> Vec<(EncryptionType, String)> {
        let components = [user_name.to_owned()];

        EncryptionType::ALL
            .into_iter()
            .map(|etype| (etype, etype.default_salt(realm, &components)))
            .collect()
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn password(&self) -> &Secret<String> {
        &self.password
    }

    pub fn salts(&self) -> &[(EncryptionType, String)] {
        &self.salts
    }

    pub fn principal(&self) -> PrincipalName {
        PrincipalName::user(&self.user_name, &self.realm)
    }
}

impl fmt::Debug for KerberosCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosCredential")
            .field("user_name", &self.user_name)
            .field("realm", &self.realm)
            .field("password", &self.password)
            .field("salts", &self.salts)
            .finish()
    }
}

/// Builds credentials, asking the KDC for salts the first time a principal is seen.
pub struct CredentialFactory {
    network_client: Arc<dyn AsyncNetworkClient>,
    salts: Mutex<HashMap<String, Vec<(EncryptionType, String)>>>,
}

impl CredentialFactory {
    pub fn new(network_client: Arc<dyn AsyncNetworkClient>) -> Self {
        Self {
            network_client,
            salts: Mutex::new(HashMap::new()),
        }
    }

    /// Credential of the service account of `options`.
    ///
    /// Salts come from the cache, else from a probe of the realm's KDCs, else from the defaults.
    /// Only probed salts are cached, so an unreachable KDC is asked again next time.
    #[instrument(level = "debug", skip_all, fields(account = %options.service_account))]
    pub async fn get(&self, options: &KerberosOptions, realm_config: &Krb5Conf) -> Result<KerberosCredential> {
        let domain = options.domain().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidParameter,
                format!("service account `{}` is not in email format", options.service_account),
            )
        })?;
        let realm = realm_config.realm_for_domain(domain);
        let credential = KerberosCredential::new(options.user_name(), realm.as_str(), options.password.clone());
        let cache_key = credential.principal().to_string();

        if let Some(salts) = self.cached_salts(&cache_key)? {
            debug!("Using cached salts");
            return Ok(credential.with_salts(salts));
        }

        let kdcs = kdc_candidates(options, realm_config, &realm);
        match probe_salts(self.network_client.as_ref(), options.user_name(), &realm, &kdcs).await {
            ProbeOutcome::SaltsReceived(salts) => {
                info!(principal = %cache_key, salts = salts.len(), "Received salts from the KDC");
                self.salts
                    .lock()
                    .map_err(|_| Error::new(ErrorKind::InternalError, "salt cache is poisoned"))?
                    .insert(cache_key, salts.clone());

                Ok(credential.with_salts(salts))
            }
            outcome => {
                warn!(principal = %cache_key, %outcome, "Salt discovery failed, using default salts");

                Ok(credential)
            }
        }
    }

    fn cached_salts(&self, key: &str) -> Result<Option<Vec<(EncryptionType, String)>>> {
        let salts = self
            .salts
            .lock()
            .map_err(|_| Error::new(ErrorKind::InternalError, "salt cache is poisoned"))?;

        Ok(salts.get(key).cloned())
    }
}

impl fmt::Debug for CredentialFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialFactory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use picky_krb::constants::error_codes::KDC_ERR_PREAUTH_REQUIRED;

    use super::*;
    use crate::network_client::NetworkProtocol;
    use crate::test_data::{krb_error_with_salts, length_prefixed, ScriptedNetworkClient};

    fn options() -> KerberosOptions {
        KerberosOptions {
            config_file: PathBuf::from("/etc/krb5.conf"),
            cache_file: PathBuf::from("/tmp/krb5cc"),
            keytab_file: PathBuf::from("/tmp/krb5.keytab"),
            kdc: Some("dc01.example.com".to_owned()),
            service_account: "svc@example.com".to_owned(),
            password: Secret::new("p".to_owned()),
            application_hostname: None,
            generate_config: false,
            run_once: false,
        }
    }

    fn preauth_required() -> Vec<u8> {
        let error = krb_error_with_salts(
            "EXAMPLE.COM",
            KDC_ERR_PREAUTH_REQUIRED,
            &[(18, Some("EXAMPLE.COMsvc-custom"))],
        );

        length_prefixed(&picky_asn1_der::to_vec(&error).unwrap())
    }

    #[test]
    fn default_salts_cover_every_enctype() {
        let salts = KerberosCredential::default_salts("svc", "EXAMPLE.COM");

        assert_eq!(salts.len(), EncryptionType::ALL.len());
        assert_eq!(salts[0], (EncryptionType::Aes256CtsHmacSha196, "EXAMPLE.COMsvc".to_owned()));
        assert_eq!(salts[4], (EncryptionType::Rc4Hmac, String::new()));
    }

    #[test]
    fn debug_hides_password() {
        let credential = KerberosCredential::new("svc", "EXAMPLE.COM", Secret::new("hunter2".to_owned()));

        assert!(!format!("{:?}", credential).contains("hunter2"));
    }

    #[tokio::test]
    async fn probed_salts_are_cached() {
        let client = Arc::new(ScriptedNetworkClient::new().reply(NetworkProtocol::Tcp, preauth_required()));
        let factory = CredentialFactory::new(client.clone());
        let realm_config = Krb5Conf::new();

        let first = factory.get(&options(), &realm_config).await.unwrap();
        let second = factory.get(&options(), &realm_config).await.unwrap();

        assert_eq!(first.realm(), "EXAMPLE.COM");
        assert_eq!(first.user_name(), "svc");
        assert_eq!(
            first.salts(),
            [(EncryptionType::Aes256CtsHmacSha196, "EXAMPLE.COMsvc-custom".to_owned())]
        );
        assert_eq!(second.salts(), first.salts());
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_kdc_uses_defaults_and_retries() {
        let client = Arc::new(ScriptedNetworkClient::new());
        let factory = CredentialFactory::new(client.clone());
        let realm_config = Krb5Conf::new();

        let credential = factory.get(&options(), &realm_config).await.unwrap();
        factory.get(&options(), &realm_config).await.unwrap();

        assert_eq!(credential.salts(), KerberosCredential::default_salts("svc", "EXAMPLE.COM"));
        // two probes over tcp, udp and the KDC proxy
        assert_eq!(client.requests().len(), 6);
    }

    #[tokio::test]
    async fn realm_comes_from_domain_realm_mapping() {
        let factory = CredentialFactory::new(Arc::new(ScriptedNetworkClient::new()));
        let realm_config = Krb5Conf::new_from_data("[domain_realm]\n.example.com = CORP.EXAMPLE.COM\n").unwrap();
        let mut options = options();
        options.service_account = "svc@app.example.com".to_owned();

        let credential = factory.get(&options, &realm_config).await.unwrap();

        assert_eq!(credential.realm(), "CORP.EXAMPLE.COM");
        assert_eq!(credential.principal().to_string(), "svc@CORP.EXAMPLE.COM");
    }
}
