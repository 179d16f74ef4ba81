use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag10, ExplicitContextTag12,
    ExplicitContextTag2, ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag9,
    IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::types::{KRB_ERROR_MSG_TYPE, NT_SRV_INST, PA_ETYPE_INFO2_TYPE};
use picky_krb::data_types::{
    EtypeInfo2Entry, KerberosStringAsn1, KerberosTime, Microseconds, PaData, PrincipalName, Realm,
};
use picky_krb::messages::{KrbError, KrbErrorInner};
use time::OffsetDateTime;

use crate::network_client::{AsyncNetworkClient, NetworkProtocol, NetworkRequest};
use crate::{Error, ErrorKind, Result};

/// Network client answering from a per-protocol script and recording every request.
///
/// Protocols without a scripted reply fail as an unreachable KDC would.
#[derive(Debug, Default)]
pub struct ScriptedNetworkClient {
    replies: HashMap<NetworkProtocol, Result<Vec<u8>>>,
    requests: Mutex<Vec<NetworkRequest>>,
}

impl ScriptedNetworkClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, protocol: NetworkProtocol, data: Vec<u8>) -> Self {
        self.replies.insert(protocol, Ok(data));
        self
    }

    pub fn fail(mut self, protocol: NetworkProtocol) -> Self {
        self.replies.insert(
            protocol,
            Err(Error::new(ErrorKind::NoAuthenticatingAuthority, "connection refused")),
        );
        self
    }

    pub fn requests(&self) -> Vec<NetworkRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl AsyncNetworkClient for ScriptedNetworkClient {
    fn send<'a>(&'a self, request: &'a NetworkRequest) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());

            self.replies.get(&request.protocol).cloned().unwrap_or_else(|| {
                Err(Error::new(
                    ErrorKind::NoAuthenticatingAuthority,
                    format!("nothing scripted for {:?}", request.protocol),
                ))
            })
        })
    }
}

pub fn length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut message = (data.len() as u32).to_be_bytes().to_vec();
    message.extend_from_slice(data);
    message
}

/// KRB-ERROR for `krbtgt/realm` carrying one ETYPE-INFO2 entry per `(etype, salt)`.
///
/// No entries means no e-data at all.
pub fn krb_error_with_salts(realm: &str, error_code: u32, entries: &[(u8, Option<&str>)]) -> KrbError {
    let current_date = OffsetDateTime::now_utc();
    let microseconds = current_date.microsecond().min(999_999);
    let realm_name = IA5String::from_string(realm.to_owned()).unwrap();

    let e_data = if entries.is_empty() {
        None
    } else {
        let etype_info_2 = entries
            .iter()
            .map(|(etype, salt)| EtypeInfo2Entry {
                etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![*etype])),
                salt: Optional::from(salt.map(|salt| {
                    ExplicitContextTag1::from(KerberosStringAsn1::from(
                        IA5String::from_string(salt.to_owned()).unwrap(),
                    ))
                })),
                s2kparams: Optional::from(None),
            })
            .collect::<Vec<_>>();

        let pa_datas = Asn1SequenceOf::from(vec![
            PaData {
                // PA-ENC-TIMESTAMP
                padata_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![2])),
                padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(Vec::new())),
            },
            PaData {
                padata_type: ExplicitContextTag1::from(IntegerAsn1::from(PA_ETYPE_INFO2_TYPE.to_vec())),
                padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(
                    picky_asn1_der::to_vec(&Asn1SequenceOf::from(etype_info_2)).unwrap(),
                )),
            },
        ]);

        Some(ExplicitContextTag12::from(OctetStringAsn1::from(
            picky_asn1_der::to_vec(&pa_datas).unwrap(),
        )))
    };

    KrbError::from(KrbErrorInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1(vec![5])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![KRB_ERROR_MSG_TYPE])),
        ctime: Optional::from(None),
        cusec: Optional::from(None),
        stime: ExplicitContextTag4::from(KerberosTime::from(GeneralizedTime::from(current_date))),
        susec: ExplicitContextTag5::from(Microseconds::from(microseconds.to_be_bytes().to_vec())),
        error_code: ExplicitContextTag6::from(error_code),
        crealm: Optional::from(None),
        cname: Optional::from(None),
        realm: ExplicitContextTag9::from(Realm::from(realm_name.clone())),
        sname: ExplicitContextTag10::from(PrincipalName {
            name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![NT_SRV_INST])),
            name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(vec![
                KerberosStringAsn1::from(IA5String::from_string("krbtgt".to_owned()).unwrap()),
                KerberosStringAsn1::from(realm_name),
            ])),
        }),
        e_text: Optional::from(None),
        e_data: Optional::from(e_data),
    })
}
