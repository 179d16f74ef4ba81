use picky_asn1::wrapper::Asn1SequenceOf;
use picky_krb::constants::types::PA_ETYPE_INFO2_TYPE;
use picky_krb::data_types::{EtypeInfo2, PaData};
use picky_krb::messages::KrbError;

use crate::enctype::EncryptionType;
use crate::Result;

/// Reads the ETYPE-INFO2 hints of a KRB-ERROR.
///
/// Unknown encryption types are skipped. A missing salt is reported as `None` so the caller can
/// fall back to the default salt.
#[instrument(level = "trace", ret)]
pub fn extract_salts_from_krb_error(error: &KrbError) -> Result<Vec<(EncryptionType, Option<String>)>> {
    let Some(e_data) = error.0.e_data.0.as_ref() else {
        return Ok(Vec::new());
    };

    let pa_datas: Asn1SequenceOf<PaData> = picky_asn1_der::from_bytes(&e_data.0 .0)?;

    let mut salts = Vec::new();
    for pa_data in pa_datas
        .0
        .iter()
        .filter(|pa_data| pa_data.padata_type.0 .0 == PA_ETYPE_INFO2_TYPE)
    {
        let etype_info_2: EtypeInfo2 = picky_asn1_der::from_bytes(&pa_data.padata_data.0 .0)?;

        for entry in etype_info_2.0.iter() {
            let Some(etype) = EncryptionType::from_der_integer(&entry.etype.0 .0) else {
                debug!(etype = ?entry.etype.0 .0, "Skipping unsupported encryption type");
                continue;
            };

            if salts.iter().any(|(known, _)| *known == etype) {
                continue;
            }

            salts.push((etype, entry.salt.0.as_ref().map(|salt| salt.0.to_string())));
        }
    }

    Ok(salts)
}
