//! Legacy BIFF8 workbooks protected with RC4 or CryptoAPI RC4
//!
//! The `Workbook` stream is encrypted in 1024-byte blocks, each with its own
//! RC4 key derived from the password and the block number. Record headers stay
//! in the clear, as do a handful of records that readers need before the
//! password is known.

use anyhow::{Context, Result, anyhow, bail};
use md5::Md5;
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};
use sha1::{Digest, Sha1};
use std::io::{Cursor, Write};

use super::offcrypto::{read_u32, slice};

const RECORD_FILEPASS: u16 = 0x002f;
const RECORD_EOF: u16 = 0x000a;
const RECORD_BOF: u16 = 0x0809;
const RECORD_BOUNDSHEET: u16 = 0x0085;

/// Records whose body is never encrypted
const PLAIN_RECORDS: &[u16] = &[RECORD_BOF, RECORD_FILEPASS, 0x0194, 0x0195, 0x00e1, 0x0196, 0x0138];

const BLOCK_SIZE: usize = 1024;
const ALG_RC4: u32 = 0x6801;

/// Offset and body length of the FILEPASS record in the workbook globals
pub fn find_filepass(stream: &[u8]) -> Option<(usize, usize)> {
    for (offset, record, len) in records(stream) {
        match record {
            RECORD_FILEPASS => return Some((offset, len)),
            RECORD_EOF => return None,
            _ => {}
        }
    }
    None
}

/// (offset, record type, body length) for each complete record header
fn records(stream: &[u8]) -> impl Iterator<Item = (usize, u16, usize)> + '_ {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let header = stream.get(offset..offset + 4)?;
        let record = u16::from_le_bytes([header[0], header[1]]);
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let at = offset;
        offset += 4 + len;
        Some((at, record, len))
    })
}

/// Password verifier from a FILEPASS record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rc4Encryption {
    /// RC4 1.1, MD5 based, always 128-bit keys
    Standard {
        salt: Vec<u8>,
        encrypted_verifier: Vec<u8>,
        encrypted_verifier_hash: Vec<u8>,
    },
    /// CryptoAPI RC4 (2.2, 3.2, 4.2), SHA-1 based
    CryptoApi {
        salt: Vec<u8>,
        key_bits: usize,
        encrypted_verifier: Vec<u8>,
        encrypted_verifier_hash: Vec<u8>,
    },
}

impl Rc4Encryption {
    /// Parse a FILEPASS record body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let word = |offset: usize| {
            body.get(offset..offset + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .context("FILEPASS record is truncated")
        };

        match word(0)? {
            0 => bail!("XOR-obfuscated XLS workbooks are not supported"),
            1 => {}
            other => bail!("unknown XLS encryption type {other}"),
        }

        let (major, minor) = (word(2)?, word(4)?);
        match (major, minor) {
            (1, 1) => Ok(Self::Standard {
                salt: slice(body, 6, 16)?,
                encrypted_verifier: slice(body, 22, 16)?,
                encrypted_verifier_hash: slice(body, 38, 16)?,
            }),
            (2..=4, 2) => Self::parse_cryptoapi(&body[6..]),
            _ => bail!("unsupported XLS encryption version {major}.{minor}"),
        }
    }

    /// Flags, header size, EncryptionHeader, EncryptionVerifier
    fn parse_cryptoapi(data: &[u8]) -> Result<Self> {
        let header_size = read_u32(data, 4)? as usize;
        let header = data
            .get(8..8 + header_size)
            .context("FILEPASS encryption header is truncated")?;

        let alg_id = read_u32(header, 8)?;
        if alg_id != ALG_RC4 && alg_id != 0 {
            bail!("unsupported XLS encryption algorithm 0x{alg_id:04x}");
        }
        let key_bits = match read_u32(header, 16)? {
            0 => 40,
            bits => bits as usize,
        };

        let verifier = &data[8 + header_size..];
        let salt_size = read_u32(verifier, 0)? as usize;
        let hash_size = read_u32(verifier, 20 + salt_size)? as usize;
        Ok(Self::CryptoApi {
            salt: slice(verifier, 4, salt_size)?,
            key_bits,
            encrypted_verifier: slice(verifier, 4 + salt_size, 16)?,
            encrypted_verifier_hash: slice(verifier, 24 + salt_size, hash_size)?,
        })
    }

    /// Per-password value every block key is derived from
    fn password_base(&self, password: &str) -> Vec<u8> {
        let utf16: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();
        match self {
            Self::Standard { salt, .. } => {
                let h0 = Md5::digest(&utf16);
                let mut buffer = Vec::with_capacity(21 * 16);
                for _ in 0..16 {
                    buffer.extend_from_slice(&h0[..5]);
                    buffer.extend_from_slice(salt);
                }
                Md5::digest(&buffer)[..5].to_vec()
            }
            Self::CryptoApi { salt, .. } => Sha1::new()
                .chain_update(salt)
                .chain_update(&utf16)
                .finalize()
                .to_vec(),
        }
    }

    fn block_key(&self, base: &[u8], block: u32) -> Result<Vec<u8>> {
        match self {
            Self::Standard { .. } => Ok(Md5::new()
                .chain_update(base)
                .chain_update(block.to_le_bytes())
                .finalize()
                .to_vec()),
            Self::CryptoApi { key_bits, .. } => {
                let hash = Sha1::new()
                    .chain_update(base)
                    .chain_update(block.to_le_bytes())
                    .finalize();
                match *key_bits {
                    40 => {
                        let mut key = hash[..5].to_vec();
                        key.resize(16, 0);
                        Ok(key)
                    }
                    128 => Ok(hash[..16].to_vec()),
                    bits => bail!("unsupported RC4 key size {bits}"),
                }
            }
        }
    }

    /// Check `password` against the stored verifier
    pub fn verify(&self, password: &str) -> Result<Option<Vec<u8>>> {
        let base = self.password_base(password);
        let key = self.block_key(&base, 0)?;

        let (encrypted_verifier, encrypted_verifier_hash) = match self {
            Self::Standard { encrypted_verifier, encrypted_verifier_hash, .. }
            | Self::CryptoApi { encrypted_verifier, encrypted_verifier_hash, .. } => {
                (encrypted_verifier, encrypted_verifier_hash)
            }
        };

        // verifier and hash share one keystream
        let mut buf = [encrypted_verifier.as_slice(), encrypted_verifier_hash.as_slice()].concat();
        keystream(&key)?.apply_keystream(&mut buf);
        let (verifier, hash) = buf.split_at(encrypted_verifier.len());

        let actual = match self {
            Self::Standard { .. } => Md5::digest(verifier).to_vec(),
            Self::CryptoApi { .. } => Sha1::digest(verifier).to_vec(),
        };
        if hash.get(..actual.len()) == Some(actual.as_slice()) {
            Ok(Some(base))
        } else {
            Ok(None)
        }
    }

    /// XOR the encrypted parts of `stream` with the keystream for `base`.
    ///
    /// The same call encrypts and decrypts.
    pub fn apply(&self, base: &[u8], stream: &[u8]) -> Result<Vec<u8>> {
        let mut out = stream.to_vec();
        for (index, block) in out.chunks_mut(BLOCK_SIZE).enumerate() {
            let key = self.block_key(base, index as u32)?;
            keystream(&key)?.apply_keystream(block);
        }

        // headers and plain records keep their original bytes
        for (offset, record, len) in records(stream) {
            let end = (offset + 4 + len).min(stream.len());
            let plain_end = if PLAIN_RECORDS.contains(&record) {
                end
            } else if record == RECORD_BOUNDSHEET {
                (offset + 8).min(end)
            } else {
                offset + 4
            };
            out[offset..plain_end].copy_from_slice(&stream[offset..plain_end]);
        }
        Ok(out)
    }
}

fn keystream(key: &[u8]) -> Result<Rc4<U16>> {
    Rc4::<U16>::new_from_slice(key).map_err(|_| anyhow!("invalid RC4 key length"))
}

/// A protected `.xls` held in memory until a password is found
#[derive(Debug)]
pub struct LegacyWorkbook {
    container: Vec<u8>,
    stream_name: String,
    stream: Vec<u8>,
    encryption: Rc4Encryption,
}

impl LegacyWorkbook {
    pub fn new(container: Vec<u8>, stream_name: &str, stream: Vec<u8>) -> Result<Self> {
        let (offset, len) = find_filepass(&stream).context("workbook has no FILEPASS record")?;
        let body = stream
            .get(offset + 4..offset + 4 + len)
            .context("FILEPASS record is truncated")?;
        let encryption = Rc4Encryption::parse(body)?;
        Ok(Self {
            container,
            stream_name: stream_name.to_string(),
            stream,
            encryption,
        })
    }

    /// The whole decrypted `.xls`, or `None` if `password` is wrong
    pub fn unlock(&self, password: &str) -> Result<Option<Vec<u8>>> {
        let Some(base) = self.encryption.verify(password)? else {
            return Ok(None);
        };

        let mut plain = self.encryption.apply(&base, &self.stream)?;
        blank_filepass(&mut plain);
        self.rewrite_container(&plain).map(Some)
    }

    /// Same-length overwrite keeps every other stream and all offsets intact
    fn rewrite_container(&self, stream: &[u8]) -> Result<Vec<u8>> {
        let mut compound = cfb::CompoundFile::open(Cursor::new(self.container.clone()))
            .context("failed to reopen OLE compound file")?;
        {
            let mut out = compound
                .open_stream(&self.stream_name)
                .with_context(|| format!("missing {} stream", self.stream_name))?;
            out.write_all(stream).context("failed to write decrypted workbook stream")?;
            out.flush()?;
        }
        compound.flush()?;
        Ok(compound.into_inner().into_inner())
    }
}

/// Retype FILEPASS as an unknown record of the same size with a zeroed body,
/// so sheet offsets in BOUNDSHEET stay valid.
fn blank_filepass(stream: &mut [u8]) {
    let Some((offset, len)) = find_filepass(stream) else {
        return;
    };
    stream[offset..offset + 2].fill(0);
    let end = (offset + 4 + len).min(stream.len());
    stream[offset + 4..end].fill(0);
}
