//! SASL authentication (spec §4.3): mechanism selection, PLAIN framing, and
//! a full RFC 5802 SCRAM client (SHA-1/256/512) with local verification of
//! the server's final signature.

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mechanism {
    Plain,
    ScramSha1,
    ScramSha256,
    ScramSha512,
}

impl Mechanism {
    pub fn name(self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::ScramSha1 => "SCRAM-SHA1",
            Mechanism::ScramSha256 => "SCRAM-SHA256",
            Mechanism::ScramSha512 => "SCRAM-SHA512",
        }
    }
}

/// Select the strongest mechanism present in both the server-advertised
/// list and our supported set. PLAIN is refused on a non-TLS transport
/// unless the caller explicitly allows it (spec §4.3).
pub fn select_mechanism(
    server_offered: &str,
    is_tls: bool,
    allow_plain_on_plaintext: bool,
) -> Option<Mechanism> {
    let offered: Vec<&str> = server_offered.split_whitespace().collect();
    [Mechanism::ScramSha512, Mechanism::ScramSha256, Mechanism::ScramSha1, Mechanism::Plain]
        .into_iter()
        .find(|m| offered.contains(&m.name()) && (*m != Mechanism::Plain || is_tls || allow_plain_on_plaintext))
}

pub fn plain_message(authzid: &str, username: &str, password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(authzid.len() + username.len() + password.len() + 2);
    out.extend_from_slice(authzid.as_bytes());
    out.push(0);
    out.extend_from_slice(username.as_bytes());
    out.push(0);
    out.extend_from_slice(password.as_bytes());
    out
}

#[derive(Debug, Error)]
pub enum ScramError {
    #[error("server-first message is malformed: {0}")]
    MalformedServerFirst(&'static str),
    #[error("server-final message is malformed: {0}")]
    MalformedServerFinal(&'static str),
    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,
    #[error("server signature verification failed")]
    SignatureMismatch,
    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn unb64(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(s)
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    b64(&bytes)
}

struct ParsedServerFirst {
    nonce: String,
    salt: Vec<u8>,
    iterations: u32,
}

fn parse_server_first(msg: &str) -> Result<ParsedServerFirst, ScramError> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;
    for field in msg.split(',') {
        let (key, value) = field
            .split_once('=')
            .ok_or(ScramError::MalformedServerFirst("field missing '='"))?;
        match key {
            "r" => nonce = Some(value.to_string()),
            "s" => salt = Some(unb64(value)?),
            "i" => {
                iterations =
                    Some(value.parse().map_err(|_| ScramError::MalformedServerFirst("bad iteration count"))?)
            }
            _ => {}
        }
    }
    Ok(ParsedServerFirst {
        nonce: nonce.ok_or(ScramError::MalformedServerFirst("missing nonce"))?,
        salt: salt.ok_or(ScramError::MalformedServerFirst("missing salt"))?,
        iterations: iterations.ok_or(ScramError::MalformedServerFirst("missing iteration count"))?,
    })
}

/// Evaluates RFC 5802's HMAC/XOR chain for one of the three digests this
/// client supports. The macro avoids three near-identical generic
/// implementations fighting the digest trait bounds separately.
macro_rules! scram_digest_impl {
    ($mod_name:ident, $digest:ty, $pbkdf2_fn:path) => {
        mod $mod_name {
            use super::*;

            pub fn salted_password(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
                let mut out = vec![0u8; <$digest as sha2::Digest>::output_size()];
                $pbkdf2_fn(password, salt, iterations, &mut out);
                out
            }

            fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
                let mut mac = Hmac::<$digest>::new_from_slice(key).expect("hmac accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }

            fn h(data: &[u8]) -> Vec<u8> {
                use sha2::Digest;
                <$digest>::digest(data).to_vec()
            }

            fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
                a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
            }

            pub fn client_final(
                salted_password: &[u8],
                auth_message: &str,
            ) -> (Vec<u8>, Vec<u8>) {
                let client_key = hmac(salted_password, b"Client Key");
                let stored_key = h(&client_key);
                let client_signature = hmac(&stored_key, auth_message.as_bytes());
                let client_proof = xor(&client_key, &client_signature);
                let server_key = hmac(salted_password, b"Server Key");
                let server_signature = hmac(&server_key, auth_message.as_bytes());
                (client_proof, server_signature)
            }
        }
    };
}

scram_digest_impl!(scram_sha1, sha1::Sha1, pbkdf2::pbkdf2_hmac::<sha1::Sha1>);
scram_digest_impl!(scram_sha256, sha2::Sha256, pbkdf2::pbkdf2_hmac::<sha2::Sha256>);
scram_digest_impl!(scram_sha512, sha2::Sha512, pbkdf2::pbkdf2_hmac::<sha2::Sha512>);

/// Drives one SCRAM exchange end to end: client-first -> server-first ->
/// client-final -> server-final, verifying the server signature locally
/// before reporting success (spec §4.3).
pub struct ScramClient {
    mechanism: Mechanism,
    username: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(mechanism: Mechanism, username: &str, password: &str) -> Self {
        let client_nonce = random_nonce();
        let client_first_bare = format!("n={},r={}", escape_username(username), client_nonce);
        Self {
            mechanism,
            username: username.to_string(),
            password: password.to_string(),
            client_nonce,
            client_first_bare,
            server_signature: None,
        }
    }

    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Consume the server-first message and produce the client-final
    /// message. Fails if the server nonce does not extend ours (RFC 5802
    /// §3 step 2).
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<String, ScramError> {
        let parsed = parse_server_first(server_first)?;
        if !parsed.nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceMismatch);
        }
        let channel_binding = b64(b"n,,");
        let client_final_without_proof =
            format!("c={},r={}", channel_binding, parsed.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let (proof, server_signature) = match self.mechanism {
            Mechanism::ScramSha1 => {
                let salted = scram_sha1::salted_password(self.password.as_bytes(), &parsed.salt, parsed.iterations);
                scram_sha1::client_final(&salted, &auth_message)
            }
            Mechanism::ScramSha256 => {
                let salted = scram_sha256::salted_password(self.password.as_bytes(), &parsed.salt, parsed.iterations);
                scram_sha256::client_final(&salted, &auth_message)
            }
            Mechanism::ScramSha512 => {
                let salted = scram_sha512::salted_password(self.password.as_bytes(), &parsed.salt, parsed.iterations);
                scram_sha512::client_final(&salted, &auth_message)
            }
            Mechanism::Plain => unreachable!("ScramClient is never constructed for PLAIN"),
        };
        self.server_signature = Some(server_signature);
        Ok(format!("{},p={}", client_final_without_proof, b64(&proof)))
    }

    /// Verify the server-final message's signature against the one we
    /// computed locally; any mismatch is an authentication failure (spec
    /// §4.3).
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), ScramError> {
        let value = server_final
            .strip_prefix("v=")
            .ok_or(ScramError::MalformedServerFinal("expected v= field"))?;
        let received = unb64(value)?;
        let expected = self
            .server_signature
            .as_ref()
            .expect("handle_server_first must be called before verify_server_final");
        if &received == expected {
            Ok(())
        } else {
            Err(ScramError::SignatureMismatch)
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mechanism_selection_prefers_strongest_offered() {
        let chosen = select_mechanism("PLAIN SCRAM-SHA1 SCRAM-SHA256", true, false).unwrap();
        assert_eq!(chosen, Mechanism::ScramSha256);
    }

    #[test]
    fn plain_is_refused_on_plaintext_transport_by_default() {
        let chosen = select_mechanism("PLAIN", false, false);
        assert_eq!(chosen, None);
    }

    #[test]
    fn plain_allowed_on_plaintext_when_explicitly_opted_in() {
        let chosen = select_mechanism("PLAIN", false, true).unwrap();
        assert_eq!(chosen, Mechanism::Plain);
    }

    #[test]
    fn scram_sha256_round_trip_with_a_fake_server() {
        // Emulates the server side to exercise the full four-message
        // exchange, including local signature verification.
        let password = b"s3cr3t".to_vec();
        let salt = b"fixed-salt-value".to_vec();
        let iterations = 4096u32;

        let mut client = ScramClient::new(Mechanism::ScramSha256, "alice", "s3cr3t");
        let client_first = client.client_first_message();
        let (_, client_first_bare) = client_first.split_once(",,").unwrap();
        let combined_nonce = format!(
            "{}{}",
            client_first_bare.split(',').nth(1).unwrap().trim_start_matches("r="),
            "server-extension"
        );
        let server_first = format!("r={},s={},i={}", combined_nonce, b64(&salt), iterations);

        let client_final = client.handle_server_first(&server_first).unwrap();

        // Server recomputes using the same inputs to produce its v=.
        let salted = scram_sha256::salted_password(&password, &salt, iterations);
        let channel_binding = b64(b"n,,");
        let client_final_without_proof = format!("c={},r={}", channel_binding, combined_nonce);
        let auth_message =
            format!("{},{},{}", client_first_bare, server_first, client_final_without_proof);
        let (_, server_signature) = scram_sha256::client_final(&salted, &auth_message);
        let server_final = format!("v={}", b64(&server_signature));

        assert!(client_final.starts_with("c="));
        client.verify_server_final(&server_final).unwrap();
    }

    #[test]
    fn tampered_server_signature_is_rejected() {
        let mut client = ScramClient::new(Mechanism::ScramSha256, "alice", "s3cr3t");
        let _ = client.client_first_message();
        let server_first = format!("r={}xyz,s={},i=4096", client.client_nonce, b64(b"salt"));
        client.handle_server_first(&server_first).unwrap();
        let err = client.verify_server_final("v=AAAA").unwrap_err();
        assert!(matches!(err, ScramError::Base64(_)) || matches!(err, ScramError::SignatureMismatch));
    }
}
