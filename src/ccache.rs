//! MIT credential cache files (`FILE:` ccache), versions 3 and 4.
//!
//! The cache is written by the Kerberos tooling; the lifecycle worker only reads it to decide
//! whether the TGT must be obtained or renewed.
//!
//! [The MIT Kerberos credential cache format](https://web.mit.edu/kerberos/krb5-devel/doc/formats/ccache_file_format.html)

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use time::OffsetDateTime;

use crate::flags::TicketFlags;
use crate::principal::PrincipalName;
use crate::{Error, ErrorKind, Result, Secret};

pub const CCACHE_VERSION_3: u16 = 0x0503;
pub const CCACHE_VERSION_4: u16 = 0x0504;

/// Realm of the configuration entries MIT stores next to real tickets.
pub const CONFIG_REALM: &str = "X-CACHECONF:";

// upper bound for counts read from the file
const MAX_COUNT: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTicket {
    pub client: PrincipalName,
    pub server: PrincipalName,
    pub key_type: u16,
    pub key: Secret<Vec<u8>>,
    pub auth_time: OffsetDateTime,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    /// `None` when the ticket was issued without a renewable lifetime.
    pub renew_till: Option<OffsetDateTime>,
    pub flags: TicketFlags,
    pub ticket: Vec<u8>,
}

impl CachedTicket {
    pub fn is_renewable(&self) -> bool {
        self.flags.contains(TicketFlags::RENEWABLE) && self.renew_till.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialCache {
    pub default_principal: Option<PrincipalName>,
    pub tickets: Vec<CachedTicket>,
}

impl CredentialCache {
    /// Reads the cache file. A missing or empty file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(data) => Self::decode(&data),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// The ticket-granting ticket: the first ticket issued for a `krbtgt` service.
    pub fn tgt(&self) -> Option<&CachedTicket> {
        self.tickets.iter().find(|ticket| ticket.server.is_tgt())
    }

    /// First ticket for the service principal name, with or without the `@REALM` suffix.
    pub fn service_ticket(&self, spn: &str) -> Option<&CachedTicket> {
        self.tickets.iter().find(|ticket| {
            ticket.server.name().eq_ignore_ascii_case(spn) || ticket.server.to_string().eq_ignore_ascii_case(spn)
        })
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self::default());
        }

        let mut reader = Cursor::new(data);

        let version = reader.read_u16::<BigEndian>()?;
        match version {
            CCACHE_VERSION_4 => {
                let header_length = u64::from(reader.read_u16::<BigEndian>()?);
                // header tags (KDC time offset) are not needed
                reader.set_position(reader.position() + header_length);
            }
            CCACHE_VERSION_3 => {}
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidToken,
                    format!("unsupported credential cache version: {:#06x}", version),
                ))
            }
        }

        let default_principal = if remaining(&reader) > 0 {
            Some(read_principal(&mut reader)?)
        } else {
            None
        };

        let mut tickets = Vec::new();
        while remaining(&reader) > 0 {
            let ticket = read_credential(&mut reader, version)?;

            if ticket.server.realm != CONFIG_REALM {
                tickets.push(ticket);
            }
        }

        Ok(Self {
            default_principal,
            tickets,
        })
    }

    /// Encodes the cache in version 4 format with an empty header.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(CCACHE_VERSION_4)?;
        data.write_u16::<BigEndian>(0)?;

        let default_principal = self
            .default_principal
            .as_ref()
            .or_else(|| self.tickets.first().map(|ticket| &ticket.client))
            .ok_or_else(|| Error::new(ErrorKind::InvalidParameter, "credential cache has no principal"))?;
        write_principal(&mut data, default_principal)?;

        for ticket in &self.tickets {
            write_principal(&mut data, &ticket.client)?;
            write_principal(&mut data, &ticket.server)?;
            data.write_u16::<BigEndian>(ticket.key_type)?;
            write_data(&mut data, ticket.key.as_ref())?;
            for time in [ticket.auth_time, ticket.start_time, ticket.end_time] {
                data.write_u32::<BigEndian>(timestamp(time)?)?;
            }
            data.write_u32::<BigEndian>(ticket.renew_till.map(timestamp).transpose()?.unwrap_or(0))?;
            // is_skey
            data.write_u8(0)?;
            data.write_u32::<BigEndian>(ticket.flags.bits())?;
            // addresses and authdata
            data.write_u32::<BigEndian>(0)?;
            data.write_u32::<BigEndian>(0)?;
            write_data(&mut data, &ticket.ticket)?;
            // second ticket
            write_data(&mut data, &[])?;
        }

        Ok(data)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        crate::utils::write_atomic(path, &self.encode()?)
    }
}

fn remaining(reader: &Cursor<&[u8]>) -> usize {
    let position = usize::try_from(reader.position()).unwrap_or(usize::MAX);

    reader.get_ref().len().saturating_sub(position)
}

fn read_count(reader: &mut Cursor<&[u8]>) -> Result<u32> {
    let count = reader.read_u32::<BigEndian>()?;
    if count > MAX_COUNT {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("credential cache count is too large: {}", count),
        ));
    }

    Ok(count)
}

fn read_data(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let length = usize::try_from(reader.read_u32::<BigEndian>()?)
        .map_err(|_| Error::new(ErrorKind::InvalidToken, "invalid credential cache field length"))?;
    if length > remaining(reader) {
        return Err(Error::new(ErrorKind::InvalidToken, "truncated credential cache field"));
    }

    let mut value = vec![0; length];
    reader.read_exact(&mut value)?;

    Ok(value)
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Result<String> {
    Ok(String::from_utf8(read_data(reader)?)?)
}

fn read_principal(reader: &mut Cursor<&[u8]>) -> Result<PrincipalName> {
    let name_type = reader.read_u32::<BigEndian>()?;
    let count = read_count(reader)?;
    let realm = read_string(reader)?;
    let components = (0..count).map(|_| read_string(reader)).collect::<Result<Vec<_>>>()?;

    Ok(PrincipalName::new(name_type, realm, components))
}

fn read_time(reader: &mut Cursor<&[u8]>) -> Result<OffsetDateTime> {
    Ok(OffsetDateTime::from_unix_timestamp(i64::from(
        reader.read_u32::<BigEndian>()?,
    ))?)
}

fn read_credential(reader: &mut Cursor<&[u8]>, version: u16) -> Result<CachedTicket> {
    let client = read_principal(reader)?;
    let server = read_principal(reader)?;

    let key_type = reader.read_u16::<BigEndian>()?;
    if version == CCACHE_VERSION_3 {
        // version 3 repeats the enctype
        reader.read_u16::<BigEndian>()?;
    }
    let key = read_data(reader)?;

    let auth_time = read_time(reader)?;
    let start_time = match read_time(reader)? {
        time if time == OffsetDateTime::UNIX_EPOCH => auth_time,
        time => time,
    };
    let end_time = read_time(reader)?;
    let renew_till = Some(read_time(reader)?).filter(|time| *time != OffsetDateTime::UNIX_EPOCH);

    let _is_skey = reader.read_u8()?;
    let flags = TicketFlags::from_bits_retain(reader.read_u32::<BigEndian>()?);

    for _ in 0..read_count(reader)? {
        let _address_type = reader.read_u16::<BigEndian>()?;
        read_data(reader)?;
    }
    for _ in 0..read_count(reader)? {
        let _ad_type = reader.read_u16::<BigEndian>()?;
        read_data(reader)?;
    }

    let ticket = read_data(reader)?;
    let _second_ticket = read_data(reader)?;

    Ok(CachedTicket {
        client,
        server,
        key_type,
        key: Secret::new(key),
        auth_time,
        start_time,
        end_time,
        renew_till,
        flags,
        ticket,
    })
}

fn timestamp(time: OffsetDateTime) -> Result<u32> {
    u32::try_from(time.unix_timestamp())
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, format!("time out of range: {}", time)))
}

fn write_data(data: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    let length = u32::try_from(value.len())
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, "credential cache field is too long"))?;
    data.write_u32::<BigEndian>(length)?;
    data.extend_from_slice(value);

    Ok(())
}

fn write_principal(data: &mut Vec<u8>, principal: &PrincipalName) -> Result<()> {
    data.write_u32::<BigEndian>(principal.name_type)?;
    let count = u32::try_from(principal.components.len())
        .map_err(|_| Error::new(ErrorKind::InvalidParameter, "too many principal components"))?;
    data.write_u32::<BigEndian>(count)?;
    write_data(data, principal.realm.as_bytes())?;
    for component in &principal.components {
        write_data(data, component.as_bytes())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::principal::NT_PRINCIPAL;

    fn ticket(server: PrincipalName, hours: i64) -> CachedTicket {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        CachedTicket {
            client: PrincipalName::user("svc", "EXAMPLE.COM"),
            server,
            key_type: 18,
            key: Secret::new(vec![1; 32]),
            auth_time: now,
            start_time: now,
            end_time: now + Duration::hours(hours),
            renew_till: Some(now + Duration::days(7)),
            flags: TicketFlags::RENEWABLE | TicketFlags::INITIAL,
            ticket: vec![0x61, 0x03, 0x02, 0x01, 0x05],
        }
    }

    #[test]
    fn missing_and_empty_files_are_empty_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("krb5cc");

        assert_eq!(CredentialCache::load(&path).unwrap(), CredentialCache::default());

        fs::write(&path, []).unwrap();
        assert_eq!(CredentialCache::load(&path).unwrap(), CredentialCache::default());
    }

    #[test]
    fn stored_cache_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("krb5cc");
        let cache = CredentialCache {
            default_principal: Some(PrincipalName::user("svc", "EXAMPLE.COM")),
            tickets: vec![
                ticket(PrincipalName::tgt("EXAMPLE.COM"), 10),
                ticket(PrincipalName::service("HTTP/app.example.com", "EXAMPLE.COM"), 10),
            ],
        };

        cache.store(&path).unwrap();
        let loaded = CredentialCache::load(&path).unwrap();

        assert_eq!(loaded, cache);
        assert_eq!(loaded.tgt().unwrap().server.components, ["krbtgt", "EXAMPLE.COM"]);
        assert!(loaded.tgt().unwrap().is_renewable());
        assert!(loaded.service_ticket("http/APP.example.com").is_some());
        assert!(loaded.service_ticket("HTTP/app.example.com@EXAMPLE.COM").is_some());
        assert!(loaded.service_ticket("HTTP/other.example.com").is_none());
    }

    #[test]
    fn config_entries_are_skipped() {
        let config_entry = ticket(
            PrincipalName::new(
                NT_PRINCIPAL,
                CONFIG_REALM,
                vec!["krb5_ccache_conf_data".to_owned(), "fast_avail".to_owned()],
            ),
            0,
        );
        let cache = CredentialCache {
            default_principal: None,
            tickets: vec![config_entry, ticket(PrincipalName::tgt("EXAMPLE.COM"), 10)],
        };

        let decoded = CredentialCache::decode(&cache.encode().unwrap()).unwrap();

        assert_eq!(decoded.tickets.len(), 1);
        assert_eq!(decoded.default_principal, Some(PrincipalName::user("svc", "EXAMPLE.COM")));
    }

    #[test]
    fn version_3_repeats_key_type() {
        let mut data = vec![0x05, 0x03];
        let mut v4 = CredentialCache {
            default_principal: None,
            tickets: vec![ticket(PrincipalName::tgt("EXAMPLE.COM"), 1)],
        }
        .encode()
        .unwrap();
        // drop version and empty v4 header
        let body = v4.split_off(4);

        // default principal and the two ticket principals come before the key type
        let principal_len = |p: &PrincipalName| 8 + 4 + p.realm.len() + p.components.iter().map(|c| 4 + c.len()).sum::<usize>();
        let client = PrincipalName::user("svc", "EXAMPLE.COM");
        let key_type_offset = 2 * principal_len(&client) + principal_len(&PrincipalName::tgt("EXAMPLE.COM"));
        data.extend_from_slice(&body[..key_type_offset + 2]);
        data.extend_from_slice(&body[key_type_offset..key_type_offset + 2]);
        data.extend_from_slice(&body[key_type_offset + 2..]);

        let cache = CredentialCache::decode(&data).unwrap();

        assert_eq!(cache.tickets.len(), 1);
        assert_eq!(cache.tickets[0].key_type, 18);
    }

    #[test]
    fn unrenewable_ticket() {
        let mut tgt = ticket(PrincipalName::tgt("EXAMPLE.COM"), 10);
        tgt.renew_till = None;
        tgt.flags = TicketFlags::INITIAL;

        let cache = CredentialCache {
            default_principal: None,
            tickets: vec![tgt],
        };
        let decoded = CredentialCache::decode(&cache.encode().unwrap()).unwrap();

        assert_eq!(decoded.tickets[0].renew_till, None);
        assert!(!decoded.tickets[0].is_renewable());
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert_eq!(
            CredentialCache::decode(&[0x05, 0x02, 0x00]).unwrap_err().error_type,
            ErrorKind::InvalidToken
        );
    }
}
