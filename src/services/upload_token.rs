use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadSlot {
    Original,
    Thumbnail,
}

impl UploadSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadSlot::Original => "original",
            UploadSlot::Thumbnail => "thumbnail",
        }
    }
}

impl Display for UploadSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UploadSlot {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "original" => Ok(UploadSlot::Original),
            "thumbnail" => Ok(UploadSlot::Thumbnail),
            _ => Err(()),
        }
    }
}

/// Signs internal upload URLs so a token authorizes exactly one
/// `(upload, slot)` pair until it expires.
pub struct UploadTokenSigner {
    secret: Vec<u8>,
}

impl UploadTokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    pub fn sign(&self, upload_id: Uuid, slot: UploadSlot, expires_unix: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts any key length");
        mac.update(format!("{upload_id}:{slot}:{expires_unix}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify(
        &self,
        upload_id: Uuid,
        slot: UploadSlot,
        expires_unix: i64,
        token: &str,
        now_unix: i64,
    ) -> bool {
        if now_unix > expires_unix {
            return false;
        }
        self.sign(upload_id, slot, expires_unix) == token
    }
}
