use std::path::PathBuf;

xflags::xflags! {
    /// Keeps a service account authenticated to a Kerberos realm.
    cmd krb5-sidecar {
        /// TOML file with the same keys as the environment variables.
        /// The environment takes precedence over the file.
        optional -c, --config config: PathBuf

        /// Stop after writing the Kerberos files and obtaining the first TGT.
        optional --once
    }
}
