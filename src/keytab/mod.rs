//! MIT keytab file format (version 2).
//!
//! ```not_rust
//! keytab    ::= 0x05 0x02 record*
//! record    ::= size:i32 entry          (negative size marks a deleted hole)
//! entry     ::= num_components:u16 realm:data component:data* name_type:u32
//!               timestamp:u32 vno8:u8 enctype:u16 key:data [kvno:u32]
//! data      ::= length:u16 bytes
//! ```
//!
//! All integers are big-endian.

mod builder;

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
pub use builder::{derive_keytab, KeytabWriter, KEYTAB_KVNO, KEYTAB_TIMESTAMP};

use crate::enctype::EncryptionType;
use crate::principal::PrincipalName;
use crate::{Error, ErrorKind, Result, Secret};

pub const KEYTAB_VERSION_1: u16 = 0x0501;
pub const KEYTAB_VERSION_2: u16 = 0x0502;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    pub principal: PrincipalName,
    pub timestamp: u32,
    pub kvno: u32,
    pub encryption_type: u16,
    pub key: Secret<Vec<u8>>,
}

impl KeytabEntry {
    pub fn enctype(&self) -> Option<EncryptionType> {
        EncryptionType::try_from(self.encryption_type).ok()
    }

    fn encode(&self, data: &mut Vec<u8>) -> Result<()> {
        data.write_u16::<BigEndian>(length_u16(self.principal.components.len())?)?;
        write_data(data, self.principal.realm.as_bytes())?;
        for component in &self.principal.components {
            write_data(data, component.as_bytes())?;
        }
        data.write_u32::<BigEndian>(self.principal.name_type)?;
        data.write_u32::<BigEndian>(self.timestamp)?;
        // 8-bit kvno, superseded by the trailing 32-bit one
        data.write_u8((self.kvno & 0xff) as u8)?;
        data.write_u16::<BigEndian>(self.encryption_type)?;
        write_data(data, self.key.as_ref())?;
        data.write_u32::<BigEndian>(self.kvno)?;

        Ok(())
    }

    fn decode(record: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(record);

        let num_components = reader.read_u16::<BigEndian>()?;
        let realm = read_string(&mut reader)?;
        let components = (0..num_components)
            .map(|_| read_string(&mut reader))
            .collect::<Result<Vec<_>>>()?;
        let name_type = reader.read_u32::<BigEndian>()?;
        let timestamp = reader.read_u32::<BigEndian>()?;
        let vno8 = reader.read_u8()?;
        let encryption_type = reader.read_u16::<BigEndian>()?;
        let key = read_data(&mut reader)?;

        let kvno = if remaining(&reader) >= 4 {
            match reader.read_u32::<BigEndian>()? {
                0 => u32::from(vno8),
                kvno => kvno,
            }
        } else {
            u32::from(vno8)
        };

        Ok(Self {
            principal: PrincipalName::new(name_type, realm, components),
            timestamp,
            kvno,
            encryption_type,
            key: Secret::new(key),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keytab {
    pub entries: Vec<KeytabEntry>,
}

impl Keytab {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(KEYTAB_VERSION_2)?;

        let mut record = Vec::new();
        for entry in &self.entries {
            record.clear();
            entry.encode(&mut record)?;

            let size = i32::try_from(record.len())
                .map_err(|_| Error::new(ErrorKind::InvalidParameter, "keytab entry is too large"))?;
            data.write_i32::<BigEndian>(size)?;
            data.extend_from_slice(&record);
        }

        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);

        match reader.read_u16::<BigEndian>()? {
            KEYTAB_VERSION_2 => {}
            KEYTAB_VERSION_1 => {
                return Err(Error::new(
                    ErrorKind::UnsupportedFunction,
                    "keytab version 1 (native byte order) is not supported",
                ))
            }
            version => {
                return Err(Error::new(
                    ErrorKind::InvalidToken,
                    format!("invalid keytab version: {:#06x}", version),
                ))
            }
        }

        let mut entries = Vec::new();
        while remaining(&reader) >= 4 {
            let size = reader.read_i32::<BigEndian>()?;
            if size == 0 {
                break;
            }

            let length = usize::try_from(size.unsigned_abs())
                .map_err(|_| Error::new(ErrorKind::InvalidToken, "invalid keytab record size"))?;
            if length > remaining(&reader) {
                return Err(Error::new(ErrorKind::InvalidToken, "truncated keytab record"));
            }

            let mut record = vec![0; length];
            reader.read_exact(&mut record)?;

            if size > 0 {
                entries.push(KeytabEntry::decode(&record)?);
            }
        }

        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::decode(&fs::read(path)?)
    }
}

fn remaining(reader: &Cursor<&[u8]>) -> usize {
    let position = usize::try_from(reader.position()).unwrap_or(usize::MAX);

    reader.get_ref().len().saturating_sub(position)
}

fn length_u16(length: usize) -> Result<u16> {
    u16::try_from(length).map_err(|_| Error::new(ErrorKind::InvalidParameter, "keytab field is too long"))
}

fn write_data(data: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    data.write_u16::<BigEndian>(length_u16(value.len())?)?;
    data.extend_from_slice(value);

    Ok(())
}

fn read_data(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let length = usize::from(reader.read_u16::<BigEndian>()?);
    if length > remaining(reader) {
        return Err(Error::new(ErrorKind::InvalidToken, "truncated keytab field"));
    }

    let mut value = vec![0; length];
    reader.read_exact(&mut value)?;

    Ok(value)
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Result<String> {
    Ok(String::from_utf8(read_data(reader)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::NT_PRINCIPAL;

    fn entry() -> KeytabEntry {
        KeytabEntry {
            principal: PrincipalName::user("svc", "EX.COM"),
            timestamp: 0,
            kvno: 1,
            encryption_type: 23,
            key: Secret::new(vec![0xAB, 0xCD]),
        }
    }

    #[test]
    fn encode_layout() {
        let keytab = Keytab { entries: vec![entry()] };

        let expected = [
            0x05, 0x02, // version
            0x00, 0x00, 0x00, 0x22, // record size
            0x00, 0x01, // num components
            0x00, 0x06, b'E', b'X', b'.', b'C', b'O', b'M', // realm
            0x00, 0x03, b's', b'v', b'c', // component
            0x00, 0x00, 0x00, 0x01, // name type
            0x00, 0x00, 0x00, 0x00, // timestamp
            0x01, // vno8
            0x00, 0x17, // enctype
            0x00, 0x02, 0xAB, 0xCD, // key
            0x00, 0x00, 0x00, 0x01, // kvno
        ];

        assert_eq!(keytab.encode().unwrap(), expected);
    }

    #[test]
    fn decode_skips_holes_and_reads_short_records() {
        let mut data = vec![0x05, 0x02];
        // deleted entry
        data.extend_from_slice(&(-4i32).to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]);

        let mut record = Vec::new();
        entry().encode(&mut record).unwrap();
        // drop the trailing 32-bit kvno, as older writers do
        record.truncate(record.len() - 4);
        data.extend_from_slice(&(record.len() as i32).to_be_bytes());
        data.extend_from_slice(&record);

        let keytab = Keytab::decode(&data).unwrap();

        assert_eq!(keytab.entries.len(), 1);
        assert_eq!(keytab.entries[0].principal.name_type, NT_PRINCIPAL);
        assert_eq!(keytab.entries[0].kvno, 1);
        assert_eq!(keytab.entries[0].enctype(), Some(EncryptionType::Rc4Hmac));
    }

    #[test]
    fn decode_rejects_truncated_and_foreign_data() {
        assert_eq!(
            Keytab::decode(&[0x05, 0x02, 0x00, 0x00, 0x00, 0x40, 0x00]).unwrap_err().error_type,
            ErrorKind::InvalidToken
        );
        assert_eq!(
            Keytab::decode(&[0x05, 0x01]).unwrap_err().error_type,
            ErrorKind::UnsupportedFunction
        );
        assert_eq!(Keytab::decode(&[0x12, 0x34]).unwrap_err().error_type, ErrorKind::InvalidToken);
    }

    #[test]
    fn encoded_keytab_decodes_to_same_entries() {
        let mut second = entry();
        second.principal = PrincipalName::service("HTTP/app.ex.com", "EX.COM");
        second.encryption_type = 18;
        second.key = Secret::new(vec![7; 32]);
        let keytab = Keytab {
            entries: vec![entry(), second],
        };

        assert_eq!(Keytab::decode(&keytab.encode().unwrap()).unwrap(), keytab);
    }
}
