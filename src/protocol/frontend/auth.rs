//! Authentication messages.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageWriter;
use crate::protocol::message::Message;

/// SASL mechanism name.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header without channel binding.
const GS2_HEADER: &str = "n,,";

/// Build a PasswordMessage (cleartext or MD5 hashed password).
pub fn password(password: &str) -> Result<Message> {
    let size = 1 + 4 + password.len() + 1;
    let mut msg = MessageWriter::tagged(super::msg_type::PASSWORD, size)?;
    msg.write_cstr(password)?;
    msg.finish()
}

/// Compute MD5 password hash.
///
/// PostgreSQL MD5 password format: "md5" + md5(md5(password + username) + salt)
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    // First hash: md5(password + username)
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let first_hash = hasher.finalize();
    let first_hash_hex = format!("{:x}", first_hash);

    // Second hash: md5(first_hash_hex + salt)
    let mut hasher = Md5::new();
    hasher.update(first_hash_hex.as_bytes());
    hasher.update(salt);
    let second_hash = hasher.finalize();

    format!("md5{:x}", second_hash)
}

/// Build a SASLInitialResponse carrying the SCRAM client-first-message.
///
/// Layout: `SCRAM-SHA-256` NUL, int32 response length, `n,,n=,r=` + client nonce.
/// The user name is left empty because the server takes it from the startup packet.
pub fn sasl_initial_response(client_nonce: &str) -> Result<Message> {
    let response_len = GS2_HEADER.len() + "n=,r=".len() + client_nonce.len();
    let size = 1 + 4 + SCRAM_SHA_256.len() + 1 + 4 + response_len;
    let response_len = i32::try_from(response_len)
        .map_err(|_| Error::InvalidUsage("SCRAM nonce too long".into()))?;

    let mut msg = MessageWriter::tagged(super::msg_type::PASSWORD, size)?;
    msg.write_cstr(SCRAM_SHA_256)?;
    msg.write_i32(response_len)?;
    msg.write_str(GS2_HEADER)?;
    msg.write_str("n=,r=")?;
    msg.write_str(client_nonce)?;
    msg.finish()
}

/// Build a SASLResponse carrying the SCRAM client-final-message.
///
/// Layout: client-final-message-without-proof + `,p=` + base64 proof.
pub fn sasl_response(without_proof: &str, proof: &str) -> Result<Message> {
    let size = 1 + 4 + without_proof.len() + 3 + proof.len();
    let mut msg = MessageWriter::tagged(super::msg_type::PASSWORD, size)?;
    msg.write_str(without_proof)?;
    msg.write_str(",p=")?;
    msg.write_str(proof)?;
    msg.finish()
}

/// Client-final-message parts produced from a server-first-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFinal {
    /// `c=<channel binding>,r=<combined nonce>`
    pub without_proof: String,
    /// Base64 encoded ClientProof
    pub proof: String,
}

/// SCRAM-SHA-256 client implementation.
pub struct ScramClient {
    /// Client nonce
    nonce: String,
    /// Password
    password: String,
    /// Auth message for signature verification
    auth_message: Option<String>,
    /// Salted password for server signature verification
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    /// Create a new SCRAM client with a random nonce.
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        // Generate 24-byte random nonce, base64 encoded
        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(password, &BASE64.encode(nonce_bytes))
    }

    /// Create a SCRAM client with a fixed nonce.
    pub fn with_nonce(password: &str, nonce: &str) -> Self {
        Self {
            nonce: nonce.to_string(),
            password: password.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    /// Client nonce.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Build the SASLInitialResponse for this client.
    pub fn initial_response(&self) -> Result<Message> {
        sasl_initial_response(&self.nonce)
    }

    /// Get the bare client-first-message (without the GS2 header).
    fn client_first_message_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// Process server-first-message and compute the client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<ClientFinal> {
        use pbkdf2::pbkdf2_hmac;

        // Parse server-first-message: r=<nonce>,s=<salt>,i=<iterations>
        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt_b64 = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse().ok();
            }
        }

        let combined_nonce = combined_nonce
            .ok_or_else(|| Error::Auth("Missing nonce in server-first-message".into()))?;
        let salt_b64 =
            salt_b64.ok_or_else(|| Error::Auth("Missing salt in server-first-message".into()))?;
        let iterations: u32 = iterations
            .filter(|i| *i > 0)
            .ok_or_else(|| Error::Auth("Missing iterations in server-first-message".into()))?;

        // Verify nonce starts with our client nonce
        if !combined_nonce.starts_with(&self.nonce) || combined_nonce.len() == self.nonce.len() {
            return Err(Error::Auth(
                "Server nonce doesn't extend client nonce".into(),
            ));
        }

        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| Error::Auth(format!("Invalid salt: {}", e)))?;

        // SaltedPassword = Hi(Normalize(password), salt, iterations)
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );
        self.salted_password = Some(salted_password);

        // ClientKey = HMAC(SaltedPassword, "Client Key")
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;

        // StoredKey = H(ClientKey)
        let stored_key = Sha256::digest(client_key);

        // client-final-message-without-proof = c=base64(gs2-header),r=<nonce>
        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), combined_nonce);

        // AuthMessage = client-first-message-bare + "," + server-first-message + "," + client-final-message-without-proof
        let auth_message = format!(
            "{},{},{}",
            self.client_first_message_bare(),
            server_first,
            without_proof
        );

        // ClientSignature = HMAC(StoredKey, AuthMessage)
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        self.auth_message = Some(auth_message);

        // ClientProof = ClientKey XOR ClientSignature
        let mut client_proof = [0u8; 32];
        for (out, (k, s)) in client_proof
            .iter_mut()
            .zip(client_key.iter().zip(client_signature.iter()))
        {
            *out = k ^ s;
        }

        Ok(ClientFinal {
            without_proof,
            proof: BASE64.encode(client_proof),
        })
    }

    /// Build the SASLResponse for a server-first-message.
    pub fn final_response(&mut self, server_first: &str) -> Result<Message> {
        let ClientFinal {
            without_proof,
            proof,
        } = self.process_server_first(server_first)?;
        sasl_response(&without_proof, &proof)
    }

    /// Verify server-final-message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        // Parse server-final-message: v=<server-signature>
        let server_signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::Auth("Invalid server-final-message format".into()))?;

        let server_signature = BASE64
            .decode(server_signature_b64)
            .map_err(|e| Error::Auth(format!("Invalid server signature: {}", e)))?;

        let salted_password = self
            .salted_password
            .as_ref()
            .ok_or_else(|| Error::Auth("Missing salted password".into()))?;
        let auth_message = self
            .auth_message
            .as_ref()
            .ok_or_else(|| Error::Auth("Missing auth message".into()))?;

        // ServerKey = HMAC(SaltedPassword, "Server Key")
        let server_key = hmac_sha256(salted_password, b"Server Key")?;

        // ServerSignature = HMAC(ServerKey, AuthMessage)
        let expected_signature = hmac_sha256(&server_key, auth_message.as_bytes())?;

        if server_signature.as_slice() != expected_signature.as_slice() {
            return Err(Error::Auth("Server signature verification failed".into()));
        }

        Ok(())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("HMAC error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}
