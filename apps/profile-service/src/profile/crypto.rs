use std::sync::Arc;

use sealed_codec::{AeadCodec, BidxCodec, CodecError, DEFAULT_TRUNCATE_LEN, FULL_LENGTH, Transcode};
use tenant_keyset::{Aead, AeadDerivator, BidxDerivator, KeysetError};
use uuid::Uuid;

use super::types::{Profile, SealedProfile};

/// Seals and opens profile rows with keys derived for the row's tenant.
///
/// Every AEAD column is bound to the raw 16 bytes of the profile id. The name
/// index keeps the full MAC; the other indexes are truncated and therefore
/// only narrow the candidate set.
#[derive(Clone)]
pub struct ProfileCrypto {
    aead: Arc<AeadDerivator>,
    bidx: Arc<BidxDerivator>,
    truncate_len: usize,
    name_truncate_len: usize,
}

impl ProfileCrypto {
    pub fn new(aead: Arc<AeadDerivator>, bidx: Arc<BidxDerivator>) -> Self {
        Self {
            aead,
            bidx,
            truncate_len: DEFAULT_TRUNCATE_LEN,
            name_truncate_len: FULL_LENGTH,
        }
    }

    #[must_use]
    pub fn with_truncate_len(mut self, truncate_len: usize) -> Self {
        self.truncate_len = truncate_len;
        self
    }

    #[must_use]
    pub fn with_name_truncate_len(mut self, truncate_len: usize) -> Self {
        self.name_truncate_len = truncate_len;
        self
    }

    pub fn seal(&self, profile: &Profile) -> Result<SealedProfile, CodecError> {
        let text = self.aead_codec::<String>(profile.tenant_id, profile.id);
        let dob = self.aead_codec(profile.tenant_id, profile.id);
        let index = self.index_codec(profile.tenant_id, self.truncate_len);
        let name_index = self.index_codec(profile.tenant_id, self.name_truncate_len);

        Ok(SealedProfile {
            id: profile.id,
            tenant_id: profile.tenant_id,
            nin: text.encode(&profile.nin)?,
            nin_bidx: index.for_write(&profile.nin)?,
            name: text.encode(&profile.name)?,
            name_bidx: name_index.for_write(&profile.name)?,
            email: text.encode(&profile.email)?,
            email_bidx: index.for_write(&profile.email)?,
            phone: text.encode(&profile.phone)?,
            phone_bidx: index.for_write(&profile.phone)?,
            dob: dob.encode_nullable(profile.dob.as_ref())?,
        })
    }

    pub fn open(&self, sealed: &SealedProfile) -> Result<Profile, CodecError> {
        let text = self.aead_codec::<String>(sealed.tenant_id, sealed.id);
        let dob = self.aead_codec(sealed.tenant_id, sealed.id);
        Ok(Profile {
            id: sealed.id,
            tenant_id: sealed.tenant_id,
            nin: text.decode(&sealed.nin)?,
            name: text.decode(&sealed.name)?,
            email: text.decode(&sealed.email)?,
            phone: text.decode(&sealed.phone)?,
            dob: dob.decode_nullable(sealed.dob.as_deref())?,
        })
    }

    /// Index values of `name` under every enabled key, primary first.
    pub fn name_read_set(&self, tenant_id: Uuid, name: &str) -> Result<Vec<Vec<u8>>, CodecError> {
        self.index_codec::<String>(tenant_id, self.name_truncate_len)
            .for_read(&name.to_string())
    }

    pub fn event_aead(&self, tenant_id: Uuid) -> Result<Arc<Aead>, KeysetError> {
        self.aead.get_primitive(Some(tenant_id.as_bytes()))
    }

    fn aead_codec<T: Transcode>(&self, tenant_id: Uuid, id: Uuid) -> AeadCodec<T> {
        AeadCodec::new(
            self.aead.get_primitive_fn(Some(tenant_id.as_bytes())),
            id.as_bytes().to_vec(),
        )
    }

    fn index_codec<T: Transcode>(
        &self,
        tenant_id: Uuid,
        truncate_len: usize,
    ) -> BidxCodec<T> {
        BidxCodec::new(
            self.bidx.get_primitive_fn(Some(tenant_id.as_bytes())),
            truncate_len,
        )
    }
}
