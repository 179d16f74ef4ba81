//! MIT `krb5.conf` document: parsing, generation and serialization.

use std::fmt;
use std::fs;
use std::io::BufRead;
use std::path::Path;

use crate::enctype::EncryptionType;
use crate::options::KerberosOptions;
use crate::utils::{matches_domain, write_atomic};
use crate::Result;

pub const LIBDEFAULTS_SECTION: &str = "libdefaults";
pub const REALMS_SECTION: &str = "realms";
pub const DOMAIN_REALM_SECTION: &str = "domain_realm";

/// Enctypes written to `default_tgs_enctypes` and `default_tkt_enctypes` of a generated config.
pub const DEFAULT_ENCTYPES: [EncryptionType; 4] = [
    EncryptionType::Aes256CtsHmacSha196,
    EncryptionType::Aes128CtsHmacSha196,
    EncryptionType::Aes256CtsHmacSha384192,
    EncryptionType::Aes128CtsHmacSha256128,
];

/// `ccache_type = 4`: the newest credential cache file format.
const CCACHE_TYPE: &str = "4";

/// Renewable lifetime requested for the TGT. Without it MIT issues non-renewable tickets.
pub const RENEW_LIFETIME: &str = "7d";

fn can_skip_line(line: &str) -> bool {
    if let Some(first_char) = line.chars().next() {
        match first_char {
            '#' => true, // comment line
            ';' => true, // comment line
            _ => false,
        }
    } else {
        true // empty line
    }
}

fn get_section_name(line: &str) -> Option<&str> {
    // `[name]*` marks a final section
    let line = line.strip_suffix('*').unwrap_or(line);

    if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
        Some(line[1..line.len() - 1].trim())
    } else {
        None
    }
}

fn try_read_line(reader: &mut impl BufRead, line: &mut String) -> Result<bool> {
    line.clear();
    let size = reader.read_line(line)?;
    let trimmed = line.trim();
    *line = trimmed.to_owned();

    Ok(size != 0)
}

/// `key = value` relation or `key = { ... }` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Value { key: String, value: String },
    Group { key: String, entries: Vec<Entry> },
}

impl Entry {
    pub fn value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Entry::Value {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn group(key: impl Into<String>, entries: Vec<Entry>) -> Self {
        Entry::Group {
            key: key.into(),
            entries,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Entry::Value { key, .. } | Entry::Group { key, .. } => key,
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "\t".repeat(depth);

        match self {
            Entry::Value { key, value } => writeln!(f, "{indent}{key} = {value}"),
            Entry::Group { key, entries } => {
                writeln!(f, "{indent}{key} = {{")?;
                for entry in entries {
                    entry.write(f, depth + 1)?;
                }
                writeln!(f, "{indent}}}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<Entry>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: Entry) -> &mut Self {
        self.entries.push(entry);
        self
    }
}

/// Ordered sections of a realm configuration. Entry order and duplicates are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Krb5Conf {
    pub sections: Vec<Section>,
}

impl Krb5Conf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;

        Self::new_from_data(&data)
    }

    pub fn new_from_data(data: &str) -> Result<Self> {
        let mut config = Krb5Conf::new();
        config.parse_from_reader(&mut data.as_bytes())?;

        Ok(config)
    }

    fn parse_from_reader(&mut self, reader: &mut impl BufRead) -> Result<()> {
        // open `key = {` groups, innermost last
        let mut groups: Vec<(String, Vec<Entry>)> = Vec::new();
        let mut line = String::new();

        while try_read_line(reader, &mut line)? {
            if can_skip_line(&line) {
                continue;
            }

            if let Some(name) = get_section_name(&line) {
                self.close_groups(&mut groups);
                self.sections.push(Section::new(name));
                continue;
            }

            if line.starts_with('}') {
                if let Some((key, entries)) = groups.pop() {
                    self.add_entry(&mut groups, Entry::group(key, entries));
                }
                continue;
            }

            if let Some((lhs, rhs)) = line.split_once('=') {
                let key = lhs.trim();
                let value = rhs.trim();

                if value.starts_with('{') {
                    groups.push((key.to_owned(), Vec::new()));
                } else {
                    self.add_entry(&mut groups, Entry::value(key, value));
                }
            }
        }

        self.close_groups(&mut groups);

        Ok(())
    }

    fn add_entry(&mut self, groups: &mut [(String, Vec<Entry>)], entry: Entry) {
        if let Some((_, entries)) = groups.last_mut() {
            entries.push(entry);
        } else if let Some(section) = self.sections.last_mut() {
            section.entries.push(entry);
        }
        // relations outside of any section are ignored
    }

    fn close_groups(&mut self, groups: &mut Vec<(String, Vec<Entry>)>) {
        while let Some((key, entries)) = groups.pop() {
            self.add_entry(groups, Entry::group(key, entries));
        }
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|section| section.name.eq_ignore_ascii_case(name))
    }

    /// Returns the section, appending an empty one when it does not exist yet.
    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        let position = self
            .sections
            .iter()
            .position(|section| section.name.eq_ignore_ascii_case(name));

        let index = match position {
            Some(index) => index,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        };

        &mut self.sections[index]
    }

    /// First value at `path`, e.g. `["realms", "EXAMPLE.COM", "kdc"]`. Case-insensitive.
    pub fn get_value(&self, path: &[&str]) -> Option<&str> {
        self.get_values(path).into_iter().next()
    }

    /// Every value at `path`, in document order.
    pub fn get_values(&self, path: &[&str]) -> Vec<&str> {
        let mut values = Vec::new();

        if let Some((section_name, rest)) = path.split_first() {
            for section in self
                .sections
                .iter()
                .filter(|section| section.name.eq_ignore_ascii_case(section_name))
            {
                collect_values(&section.entries, rest, &mut values);
            }
        }

        values
    }

    pub fn default_realm(&self) -> Option<&str> {
        self.get_value(&[LIBDEFAULTS_SECTION, "default_realm"])
    }

    /// `kdc` entries of the realm.
    pub fn kdcs(&self, realm: &str) -> Vec<String> {
        self.get_values(&[REALMS_SECTION, realm, "kdc"])
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    /// Maps a host or domain name to its realm through `[domain_realm]`.
    ///
    /// The most specific matching mapping wins. Falls back to the upper-cased domain.
    pub fn realm_for_domain(&self, domain: &str) -> String {
        self.section(DOMAIN_REALM_SECTION)
            .into_iter()
            .flat_map(|section| section.entries.iter())
            .filter_map(|entry| match entry {
                Entry::Value { key, value } if matches_domain(domain, key) => Some((key, value)),
                _ => None,
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(_, realm)| realm.clone())
            .unwrap_or_else(|| domain.to_ascii_uppercase())
    }

    /// Boolean relation of `[libdefaults]`.
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get_value(&[LIBDEFAULTS_SECTION, name])
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1"))
    }

    /// Known enctypes listed in a `[libdefaults]` relation such as `default_tkt_enctypes`.
    pub fn enctypes(&self, name: &str) -> Vec<EncryptionType> {
        self.get_value(&[LIBDEFAULTS_SECTION, name])
            .map(|value| {
                value
                    .split([' ', ','])
                    .filter_map(|name| EncryptionType::ALL.into_iter().find(|etype| etype.name() == name))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_string().as_bytes())
    }
}

fn collect_values<'a>(entries: &'a [Entry], path: &[&str], values: &mut Vec<&'a str>) {
    let Some((name, rest)) = path.split_first() else {
        return;
    };

    for entry in entries {
        match entry {
            Entry::Value { key, value } if rest.is_empty() && key.eq_ignore_ascii_case(name) => {
                values.push(value.as_str())
            }
            Entry::Group { key, entries } if !rest.is_empty() && key.eq_ignore_ascii_case(name) => {
                collect_values(entries, rest, values)
            }
            _ => {}
        }
    }
}

impl fmt::Display for Krb5Conf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, section) in self.sections.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }

            writeln!(f, "[{}]", section.name)?;
            for entry in &section.entries {
                entry.write(f, 1)?;
            }
        }

        Ok(())
    }
}

/// Default configuration for the service account's realm.
///
/// When the account has no domain part, only `[libdefaults]` without a realm is produced.
pub fn generate(options: &KerberosOptions) -> Krb5Conf {
    let mut config = Krb5Conf::new();
    let realm = options.default_realm();
    let enctypes = DEFAULT_ENCTYPES.map(EncryptionType::name).join(" ");

    let libdefaults = config.section_mut(LIBDEFAULTS_SECTION);
    if let Some(realm) = &realm {
        libdefaults.push(Entry::value("default_realm", realm));
    }
    libdefaults
        .push(Entry::value(
            "default_ccache_name",
            format!("FILE:{}", options.cache_file.display()),
        ))
        .push(Entry::value(
            "default_keytab_name",
            format!("FILE:{}", options.keytab_file.display()),
        ))
        .push(Entry::value(
            "default_client_keytab_name",
            format!("FILE:{}", options.keytab_file.display()),
        ))
        .push(Entry::value("ccache_type", CCACHE_TYPE))
        .push(Entry::value("kdc_timesync", "1"))
        .push(Entry::value("renew_lifetime", RENEW_LIFETIME))
        .push(Entry::value("forwardable", "true"))
        .push(Entry::value("proxiable", "true"))
        .push(Entry::value("rdns", "false"))
        .push(Entry::value("default_tgs_enctypes", &enctypes))
        .push(Entry::value("default_tkt_enctypes", &enctypes));

    if let (Some(realm), Some(domain)) = (realm, options.domain()) {
        let domain = domain.to_ascii_lowercase();
        let kdc = options.kdc.clone().unwrap_or_else(|| realm.clone());

        config.section_mut(REALMS_SECTION).push(Entry::group(
            realm.as_str(),
            vec![Entry::value("kdc", kdc), Entry::value("default_domain", domain.as_str())],
        ));
        config
            .section_mut(DOMAIN_REALM_SECTION)
            .push(Entry::value(domain.as_str(), realm.as_str()))
            .push(Entry::value(format!(".{}", domain), realm.as_str()));
    }

    config
}

/// Realm configuration of an options generation: the generated defaults, or the existing file.
pub fn load(options: &KerberosOptions) -> Result<Krb5Conf> {
    if options.generate_config {
        Ok(generate(options))
    } else {
        Krb5Conf::new_from_file(&options.config_file)
    }
}

/// Like [`load`], and writes the generated defaults to the config path.
#[instrument(level = "debug", skip_all, fields(path = %options.config_file.display()))]
pub fn build(options: &KerberosOptions) -> Result<Krb5Conf> {
    let config = load(options)?;

    if options.generate_config {
        config.write(&options.config_file)?;
        info!(realm = ?config.default_realm(), "Kerberos configuration generated");
    } else {
        debug!(realm = ?config.default_realm(), "Using existing Kerberos configuration");
    }

    Ok(config)
}
