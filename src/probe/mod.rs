//! Salt discovery.
//!
//! An AS-REQ without pre-authentication makes the KDC answer with `KDC_ERR_PREAUTH_REQUIRED`,
//! whose e-data lists the encryption types and salts of the client principal
//! ([RFC 4120 5.2.7.5](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.7.5)).

pub mod extractors;
pub mod generators;

use std::fmt;

use picky_krb::constants::error_codes::KDC_ERR_PREAUTH_REQUIRED;
use picky_krb::data_types::{KrbResult, ResultExt};
use picky_krb::messages::AsRep;

use self::extractors::extract_salts_from_krb_error;
use self::generators::{
    generate_as_req, generate_as_req_kdc_body, generate_nonce, generate_pa_datas_for_probe, serialize_message,
    GenerateAsReqOptions,
};
use crate::enctype::EncryptionType;
use crate::kdc::send_to_kdc;
use crate::network_client::AsyncNetworkClient;
use crate::principal::{PrincipalName, TGT_SERVICE_NAME};
use crate::{ErrorKind, Result};

/// Result of a salt discovery probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The KDC asked for pre-authentication and listed these salts.
    SaltsReceived(Vec<(EncryptionType, String)>),
    /// No transport reached a KDC.
    NoResponse(String),
    /// A KDC answered with something other than the expected KRB-ERROR.
    Unexpected(String),
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::SaltsReceived(salts) => write!(f, "received {} salt(s)", salts.len()),
            ProbeOutcome::NoResponse(reason) => write!(f, "no KDC response: {}", reason),
            ProbeOutcome::Unexpected(reason) => write!(f, "unexpected KDC reply: {}", reason),
        }
    }
}

/// Asks the KDC for the salts of `user_name@realm`.
///
/// Never fails: every problem is folded into the returned [ProbeOutcome].
#[instrument(level = "debug", skip(network_client))]
pub async fn probe_salts(
    network_client: &dyn AsyncNetworkClient,
    user_name: &str,
    realm: &str,
    kdcs: &[String],
) -> ProbeOutcome {
    let message = match build_probe_request(user_name, realm) {
        Ok(message) => message,
        Err(err) => return ProbeOutcome::Unexpected(format!("cannot build AS-REQ: {}", err.description)),
    };

    let reply = match send_to_kdc(network_client, realm, kdcs, &message).await {
        Ok(reply) => reply,
        Err(err) if matches!(err.error_type, ErrorKind::NoAuthenticatingAuthority | ErrorKind::TimedOut) => {
            return ProbeOutcome::NoResponse(err.description)
        }
        Err(err) => return ProbeOutcome::Unexpected(err.to_string()),
    };

    let outcome = parse_probe_reply(&reply, user_name, realm);
    debug!(%outcome, "Salt probe finished");

    outcome
}

fn build_probe_request(user_name: &str, realm: &str) -> Result<Vec<u8>> {
    let nonce = generate_nonce();
    let body = generate_as_req_kdc_body(&GenerateAsReqOptions {
        realm,
        username: user_name,
        snames: &[TGT_SERVICE_NAME, realm],
        nonce: &nonce,
        etypes: &EncryptionType::ALL,
    })?;
    let as_req = generate_as_req(generate_pa_datas_for_probe()?, body);

    serialize_message(&as_req)
}

fn parse_probe_reply(reply: &[u8], user_name: &str, realm: &str) -> ProbeOutcome {
    let mut deserializer = picky_asn1_der::Deserializer::new_from_bytes(reply);
    let as_rep: KrbResult<AsRep> = match KrbResult::deserialize(&mut deserializer) {
        Ok(as_rep) => as_rep,
        Err(err) => return ProbeOutcome::Unexpected(format!("undecodable reply: {:?}", err)),
    };

    let error = match as_rep {
        Ok(_) => return ProbeOutcome::Unexpected("KDC issued a ticket without pre-authentication".to_owned()),
        Err(error) => error,
    };

    let error_code = error.0.error_code.0;
    if error_code != KDC_ERR_PREAUTH_REQUIRED {
        return ProbeOutcome::Unexpected(format!("KRB-ERROR code {}", error_code));
    }

    let hints = match extract_salts_from_krb_error(&error) {
        Ok(hints) => hints,
        Err(err) => return ProbeOutcome::Unexpected(format!("invalid e-data: {}", err.description)),
    };

    if hints.is_empty() {
        return ProbeOutcome::Unexpected("KRB-ERROR carries no ETYPE-INFO2".to_owned());
    }

    let components = PrincipalName::user(user_name, realm).components;
    let salts = hints
        .into_iter()
        .map(|(etype, salt)| {
            let salt = salt.unwrap_or_else(|| etype.default_salt(realm, &components));
            (etype, salt)
        })
        .collect();

    ProbeOutcome::SaltsReceived(salts)
}
