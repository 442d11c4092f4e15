//! MD5 content checksums used to tag stored uploads.

use md5::{Digest, Md5};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_BUF_SIZE: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checksum([u8; 16]);

impl Checksum {
    /// Consumes `reader` to EOF and returns the digest of everything read.
    pub async fn compute<R>(reader: &mut R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self::from_hasher(hasher))
    }

    #[cfg(test)]
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    fn from_hasher(hasher: Md5) -> Self {
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    /// Lowercase hex, always 32 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
