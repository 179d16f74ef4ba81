use std::fmt;

pub const NT_UNKNOWN: u32 = 0;
pub const NT_PRINCIPAL: u32 = 1;
pub const NT_SRV_INST: u32 = 2;
pub const NT_SRV_HST: u32 = 3;

pub const TGT_SERVICE_NAME: &str = "krbtgt";

/// Kerberos principal: name type, realm and name components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalName {
    pub name_type: u32,
    pub realm: String,
    pub components: Vec<String>,
}

impl PrincipalName {
    pub fn new(name_type: u32, realm: impl Into<String>, components: Vec<String>) -> Self {
        Self {
            name_type,
            realm: realm.into(),
            components,
        }
    }

    /// `user@REALM`.
    pub fn user(user_name: &str, realm: &str) -> Self {
        Self::new(NT_PRINCIPAL, realm, vec![user_name.to_owned()])
    }

    /// Service principal from its `class/host` form. Components are split on `/`.
    pub fn service(spn: &str, realm: &str) -> Self {
        Self::new(NT_SRV_HST, realm, spn.split('/').map(str::to_owned).collect())
    }

    /// `krbtgt/REALM@REALM`.
    pub fn tgt(realm: &str) -> Self {
        Self::new(NT_SRV_INST, realm, vec![TGT_SERVICE_NAME.to_owned(), realm.to_owned()])
    }

    /// Name components joined with `/`, without the realm.
    pub fn name(&self) -> String {
        self.components.join("/")
    }

    pub fn is_tgt(&self) -> bool {
        self.components
            .first()
            .is_some_and(|service| service.eq_ignore_ascii_case(TGT_SERVICE_NAME))
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.realm)
    }
}
