//! KDC addressing and transport selection.

use std::time::Duration;

use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, OctetStringAsn1, Optional};
use picky_krb::data_types::KerberosStringAsn1;
use picky_krb::messages::KdcProxyMessage;
use url::Url;

use crate::krb5_conf::Krb5Conf;
use crate::network_client::{AsyncNetworkClient, NetworkProtocol, NetworkRequest};
use crate::options::KerberosOptions;
use crate::{Error, ErrorKind, Result};

/// Connect and receive timeout of a single KDC attempt.
pub const KDC_TIMEOUT: Duration = Duration::from_secs(5);

/// [MS-KKDCP](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-kkdcp/) endpoint path.
pub const KDC_PROXY_PATH: &str = "KdcProxy";

/// Transports to try for a KDC entry.
///
/// A bare `host` or `host:port` is tried over TCP, UDP, then HTTPS through the KDC proxy.
/// An entry with a URL scheme pins the protocol.
pub fn kdc_urls(kdc: &str) -> Result<Vec<Url>> {
    if kdc.contains("://") {
        let url = Url::parse(kdc)?;
        if NetworkProtocol::from_url_scheme(url.scheme()).is_none() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("Invalid protocol `{}` for KDC server", url.scheme()),
            ));
        }

        return Ok(vec![url]);
    }

    let host = match kdc.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => kdc,
    };

    Ok(vec![
        Url::parse(&format!("tcp://{}", kdc))?,
        Url::parse(&format!("udp://{}", kdc))?,
        Url::parse(&format!("https://{}/{}", host, KDC_PROXY_PATH))?,
    ])
}

/// KDCs to contact for `realm`: the configured KDC, else the realm's `kdc` entries, else the
/// realm name itself.
pub fn kdc_candidates(options: &KerberosOptions, realm_config: &Krb5Conf, realm: &str) -> Vec<String> {
    if let Some(kdc) = &options.kdc {
        return vec![kdc.clone()];
    }

    let kdcs = realm_config.kdcs(realm);
    if !kdcs.is_empty() {
        return kdcs;
    }

    vec![realm.to_owned()]
}

/// Sends a length-prefixed Kerberos message and returns the reply without its length prefix.
///
/// Every transport of every KDC is tried in order; the first reply wins.
#[instrument(level = "debug", skip(network_client, message))]
pub async fn send_to_kdc(
    network_client: &dyn AsyncNetworkClient,
    realm: &str,
    kdcs: &[String],
    message: &[u8],
) -> Result<Vec<u8>> {
    let mut failures = Vec::new();

    for kdc in kdcs {
        let urls = match kdc_urls(kdc) {
            Ok(urls) => urls,
            Err(err) => {
                warn!(kdc, %err, "Skipping invalid KDC address");
                failures.push(format!("{}: {}", kdc, err.description));
                continue;
            }
        };

        for url in urls {
            match send_request(network_client, realm, &url, message).await {
                Ok(reply) => {
                    debug!(%url, "KDC replied");
                    return Ok(reply);
                }
                Err(err) => {
                    debug!(%url, %err, "KDC request failed");
                    failures.push(format!("{}: {}", url, err.description));
                }
            }
        }
    }

    if failures.is_empty() {
        return Err(Error::new(ErrorKind::NoAuthenticatingAuthority, "No KDC server found"));
    }

    Err(Error::new(
        ErrorKind::NoAuthenticatingAuthority,
        format!("no KDC replied: {}", failures.join("; ")),
    ))
}

async fn send_request(network_client: &dyn AsyncNetworkClient, realm: &str, url: &Url, data: &[u8]) -> Result<Vec<u8>> {
    let protocol = NetworkProtocol::from_url_scheme(url.scheme()).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidParameter,
            format!("Invalid protocol `{}` for KDC server", url.scheme()),
        )
    })?;

    if data.len() < 4 {
        return Err(Error::new(
            ErrorKind::InternalError,
            format!(
                "kerberos message has invalid length. expected >= 4 but got {}",
                data.len()
            ),
        ));
    }

    let reply = match protocol {
        NetworkProtocol::Tcp => {
            let request = NetworkRequest {
                protocol,
                url: url.clone(),
                data: data.to_vec(),
            };
            network_client.send(&request).await?
        }
        NetworkProtocol::Udp => {
            // First 4 bytes are message length and it's not included when using UDP
            let request = NetworkRequest {
                protocol,
                url: url.clone(),
                data: data[4..].to_vec(),
            };
            network_client.send(&request).await?
        }
        NetworkProtocol::Http | NetworkProtocol::Https => {
            let data = OctetStringAsn1::from(data.to_vec());
            let domain = KerberosStringAsn1::from(IA5String::from_string(realm.to_owned())?);

            let kdc_proxy_message = KdcProxyMessage {
                kerb_message: ExplicitContextTag0::from(data),
                target_domain: Optional::from(Some(ExplicitContextTag1::from(domain))),
                dclocator_hint: Optional::from(None),
            };

            let request = NetworkRequest {
                protocol,
                url: url.clone(),
                data: picky_asn1_der::to_vec(&kdc_proxy_message)?,
            };
            let result_bytes = network_client.send(&request).await?;
            let message_response: KdcProxyMessage = picky_asn1_der::from_bytes(&result_bytes)?;

            message_response.kerb_message.0 .0
        }
    };

    strip_length_prefix(reply)
}

fn strip_length_prefix(mut reply: Vec<u8>) -> Result<Vec<u8>> {
    if reply.len() < 4 {
        return Err(Error::new(ErrorKind::InvalidToken, "KDC reply is too short"));
    }

    let length = u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]);
    if usize::try_from(length).ok() != Some(reply.len() - 4) {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("KDC reply length mismatch: prefix {} but got {}", length, reply.len() - 4),
        ));
    }

    Ok(reply.split_off(4))
}
