use chrono::{DateTime, Utc};
use rand::Rng;

use crate::entities::{Image, Share};
use crate::errors::{AppError, AppResult};
use crate::repositories::ShareRepository;

const CODE_LENGTH: usize = 8;
const CODE_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyzABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Public share links. Passwords are bcrypt-hashed at rest; responses only
/// expose whether one is required.
pub struct ShareService {
    shares: ShareRepository,
}

impl ShareService {
    pub fn new(shares: ShareRepository) -> Self {
        Self { shares }
    }

    pub async fn create(
        &self,
        image_ids: &[i64],
        password: Option<&str>,
        expire_at: Option<DateTime<Utc>>,
    ) -> AppResult<Share> {
        if image_ids.is_empty() {
            return Err(AppError::bad_request("a share needs at least one image"));
        }
        let password_hash = match password {
            Some(password) if !password.is_empty() => Some(
                bcrypt::hash(password, bcrypt::DEFAULT_COST)
                    .map_err(|error| AppError::Internal(error.into()))?,
            ),
            _ => None,
        };

        // Retry on the rare code collision.
        for _ in 0..5 {
            let code = Self::random_code();
            match self
                .shares
                .create(&code, password_hash.as_deref(), expire_at, image_ids)
                .await
            {
                Ok(share) => return Ok(share),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Err(AppError::Internal(anyhow::anyhow!(
            "could not allocate a unique share code"
        )))
    }

    pub async fn list(&self) -> AppResult<Vec<(Share, i64)>> {
        let shares = self.shares.list().await?;
        let mut result = Vec::with_capacity(shares.len());
        for share in shares {
            let count = self.shares.images_of(share.id).await?.len() as i64;
            result.push((share, count));
        }
        Ok(result)
    }

    pub async fn deactivate(&self, id: i64) -> AppResult<()> {
        if !self.shares.deactivate(id).await? {
            return Err(AppError::not_found("share not found"));
        }
        Ok(())
    }

    /// Public info lookup; inactive and expired codes look identical to
    /// unknown ones.
    pub async fn info(&self, code: &str) -> AppResult<(Share, i64)> {
        let share = self.usable_share(code).await?;
        let count = self.shares.images_of(share.id).await?.len() as i64;
        Ok((share, count))
    }

    /// Password-gated image listing; bumps the view counter on success.
    pub async fn access(&self, code: &str, password: Option<&str>) -> AppResult<Vec<Image>> {
        let share = self.usable_share(code).await?;
        if let Some(hash) = &share.password_hash {
            let supplied = password
                .ok_or_else(|| AppError::unauthorized("share password required"))?;
            let verified = bcrypt::verify(supplied, hash)
                .map_err(|error| AppError::Internal(error.into()))?;
            if !verified {
                return Err(AppError::unauthorized("wrong share password"));
            }
        }
        self.shares.bump_view_count(share.id).await?;
        Ok(self.shares.images_of(share.id).await?)
    }

    async fn usable_share(&self, code: &str) -> AppResult<Share> {
        let share = self
            .shares
            .get_by_code(code)
            .await?
            .ok_or_else(|| AppError::not_found("share not found"))?;
        if !share.is_active || share.is_expired(Utc::now()) {
            return Err(AppError::not_found("share not found"));
        }
        Ok(share)
    }

    fn random_code() -> String {
        let mut rng = rand::thread_rng();
        (0..CODE_LENGTH)
            .map(|_| {
                let index = rng.gen_range(0..CODE_ALPHABET.len());
                CODE_ALPHABET[index] as char
            })
            .collect()
    }
}
