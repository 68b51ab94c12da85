/// SASL credentials and the plaintext-mechanism policy (spec §4.3).
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Allows PLAIN even when the transport is not TLS. Defaults to
    /// `false`; set only when the deployment's threat model accepts it.
    pub allow_plain_on_plaintext: bool,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into(), allow_plain_on_plaintext: false }
    }
}
