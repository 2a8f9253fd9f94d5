use crate::core::{CredentialPair, Decryptor};
use crate::error::CollectorError;
use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::sync::OnceCell;

/// Holds the decrypted collector credentials for the lifetime of the process.
///
/// The cell starts empty and is filled by the first successful decrypt. A failed decrypt
/// leaves it empty, so the next invocation tries again.
pub struct CredentialCache {
    access_key_id: String,
    encrypted_secret_key: String,
    credentials: OnceCell<CredentialPair>,
}

impl CredentialCache {
    pub fn new(access_key_id: String, encrypted_secret_key: String) -> Self {
        Self {
            access_key_id,
            encrypted_secret_key,
            credentials: OnceCell::new(),
        }
    }

    #[cfg(any(test, feature = "mocks"))]
    pub fn is_resolved(&self) -> bool {
        self.credentials.initialized()
    }

    pub async fn get_decrypted_credentials<D: Decryptor>(
        &self,
        decryptor: &D,
    ) -> Result<&CredentialPair, CollectorError> {
        self.credentials
            .get_or_try_init(|| async move {
                let ciphertext = STANDARD
                    .decode(&self.encrypted_secret_key)
                    .map_err(|e| CollectorError::Decryption(format!("invalid ciphertext: {e}")))?;

                let plaintext = decryptor
                    .decrypt(ciphertext)
                    .await
                    .map_err(CollectorError::Decryption)?;

                tracing::info!("Decrypted collector credentials");
                Ok::<_, CollectorError>(CredentialPair {
                    access_key_id: self.access_key_id.clone(),
                    secret_key: String::from_utf8_lossy(&plaintext).into_owned(),
                })
            })
            .await
    }
}
