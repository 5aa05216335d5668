//! Password verification and package decryption for encrypted OOXML files
//!
//! An encrypted workbook is an OLE compound file with two streams:
//! `EncryptionInfo` (the key derivation parameters) and `EncryptedPackage`
//! (the original ZIP package, encrypted). Agile (4.4) and Standard (x.2)
//! encryption are supported; both check the password against a stored
//! verifier before any package data is touched.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyInit, KeyIvInit};
use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::Digest;

const SEGMENT_LENGTH: usize = 4096;
const AES_BLOCK: usize = 16;

const BLOCK_VERIFIER_INPUT: [u8; 8] = [0xfe, 0xa7, 0xd2, 0x76, 0x3b, 0x4b, 0x9e, 0x79];
const BLOCK_VERIFIER_VALUE: [u8; 8] = [0xd7, 0xaa, 0x0f, 0x6d, 0x30, 0x61, 0x34, 0x4e];
const BLOCK_KEY_VALUE: [u8; 8] = [0x14, 0x6e, 0x0b, 0xe7, 0xab, 0xac, 0xd0, 0xd6];

const STANDARD_SPIN_COUNT: u32 = 50_000;
const ALG_AES_128: u32 = 0x660e;
const ALG_AES_192: u32 = 0x660f;
const ALG_AES_256: u32 = 0x6610;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA1" | "SHA-1" => Ok(Self::Sha1),
            "SHA256" | "SHA-256" => Ok(Self::Sha256),
            "SHA384" | "SHA-384" => Ok(Self::Sha384),
            "SHA512" | "SHA-512" => Ok(Self::Sha512),
            _ => bail!("unsupported hash algorithm {name:?}"),
        }
    }

    fn digest(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            Self::Sha1 => run::<sha1::Sha1>(parts),
            Self::Sha256 => run::<sha2::Sha256>(parts),
            Self::Sha384 => run::<sha2::Sha384>(parts),
            Self::Sha512 => run::<sha2::Sha512>(parts),
        }
    }
}

/// Parsed `EncryptionInfo` stream
#[derive(Debug, Clone)]
pub enum EncryptionInfo {
    Agile(AgileInfo),
    Standard(StandardInfo),
}

impl EncryptionInfo {
    pub fn parse(stream: &[u8]) -> Result<Self> {
        if stream.len() < 8 {
            bail!("EncryptionInfo stream is truncated");
        }
        let major = u16::from_le_bytes([stream[0], stream[1]]);
        let minor = u16::from_le_bytes([stream[2], stream[3]]);

        match (major, minor) {
            (4, 4) => AgileInfo::parse(&stream[8..]).map(Self::Agile),
            (2..=4, 2) => StandardInfo::parse(&stream[8..]).map(Self::Standard),
            _ => bail!("unsupported encryption version {major}.{minor}"),
        }
    }

    /// The package key, or `None` if `password` is wrong
    pub fn unlock_key(&self, password: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Agile(info) => info.unlock_key(password),
            Self::Standard(info) => info.unlock_key(password),
        }
    }

    /// Decrypt an `EncryptedPackage` stream with a key from [`Self::unlock_key`]
    pub fn decrypt_package(&self, key: &[u8], package: &[u8]) -> Result<Vec<u8>> {
        let (size, body) = split_package(package)?;
        let mut plain = match self {
            Self::Agile(info) => info.decrypt_segments(key, body)?,
            Self::Standard(_) => aes_ecb_decrypt(key, block_aligned(body))?,
        };
        if plain.len() < size {
            bail!("encrypted package is truncated ({} of {} bytes)", plain.len(), size);
        }
        plain.truncate(size);
        Ok(plain)
    }
}

#[derive(Debug, Clone)]
pub struct AgileInfo {
    key_data: KeyData,
    password: PasswordKeyEncryptor,
}

#[derive(Debug, Clone)]
struct KeyData {
    salt: Vec<u8>,
    hash: HashAlgorithm,
    key_bits: usize,
    block_size: usize,
}

#[derive(Debug, Clone)]
struct PasswordKeyEncryptor {
    salt: Vec<u8>,
    hash: HashAlgorithm,
    spin_count: u32,
    key_bits: usize,
    encrypted_verifier_hash_input: Vec<u8>,
    encrypted_verifier_hash_value: Vec<u8>,
    encrypted_key_value: Vec<u8>,
}

impl AgileInfo {
    fn parse(xml: &[u8]) -> Result<Self> {
        let xml = std::str::from_utf8(xml).context("EncryptionInfo XML is not UTF-8")?;
        let xml = xml.trim_start_matches('\u{feff}').trim_end_matches('\0');
        let doc = roxmltree::Document::parse(xml).context("failed to parse EncryptionInfo XML")?;

        let key_data = doc
            .descendants()
            .find(|n| n.tag_name().name() == "keyData")
            .context("EncryptionInfo has no keyData element")?;
        let encrypted_key = doc
            .descendants()
            .find(|n| n.tag_name().name() == "encryptedKey" && n.attribute("spinCount").is_some())
            .context("EncryptionInfo has no password key encryptor")?;

        Ok(Self {
            key_data: KeyData {
                salt: attr_base64(&key_data, "saltValue")?,
                hash: HashAlgorithm::parse(attr(&key_data, "hashAlgorithm")?)?,
                key_bits: attr_number(&key_data, "keyBits")?,
                block_size: attr_number(&key_data, "blockSize")?,
            },
            password: PasswordKeyEncryptor {
                salt: attr_base64(&encrypted_key, "saltValue")?,
                hash: HashAlgorithm::parse(attr(&encrypted_key, "hashAlgorithm")?)?,
                spin_count: attr_number(&encrypted_key, "spinCount")?,
                key_bits: attr_number(&encrypted_key, "keyBits")?,
                encrypted_verifier_hash_input: attr_base64(&encrypted_key, "encryptedVerifierHashInput")?,
                encrypted_verifier_hash_value: attr_base64(&encrypted_key, "encryptedVerifierHashValue")?,
                encrypted_key_value: attr_base64(&encrypted_key, "encryptedKeyValue")?,
            },
        })
    }

    fn unlock_key(&self, password: &str) -> Result<Option<Vec<u8>>> {
        let encryptor = &self.password;
        let hash = encryptor.hash;
        let key_len = encryptor.key_bits / 8;
        let iv = fit(encryptor.salt.clone(), AES_BLOCK);
        let base = iterated_hash(hash, &encryptor.salt, password, encryptor.spin_count);

        let input_key = fit(hash.digest(&[&base, &BLOCK_VERIFIER_INPUT]), key_len);
        let verifier_input = aes_cbc_decrypt(&input_key, &iv, &encryptor.encrypted_verifier_hash_input)?;

        let value_key = fit(hash.digest(&[&base, &BLOCK_VERIFIER_VALUE]), key_len);
        let verifier_hash = aes_cbc_decrypt(&value_key, &iv, &encryptor.encrypted_verifier_hash_value)?;

        let actual = hash.digest(&[&verifier_input]);
        if verifier_hash.get(..actual.len()) != Some(actual.as_slice()) {
            return Ok(None);
        }

        let secret_key = fit(hash.digest(&[&base, &BLOCK_KEY_VALUE]), key_len);
        let mut key = aes_cbc_decrypt(&secret_key, &iv, &encryptor.encrypted_key_value)?;
        key.truncate(self.key_data.key_bits / 8);
        Ok(Some(key))
    }

    fn decrypt_segments(&self, key: &[u8], body: &[u8]) -> Result<Vec<u8>> {
        let mut plain = Vec::with_capacity(body.len());
        for (index, segment) in body.chunks(SEGMENT_LENGTH).enumerate() {
            let iv = self.segment_iv(index as u32);
            plain.extend(aes_cbc_decrypt(key, &iv, block_aligned(segment))?);
        }
        Ok(plain)
    }

    fn segment_iv(&self, index: u32) -> Vec<u8> {
        let data = &self.key_data;
        fit(data.hash.digest(&[&data.salt, &index.to_le_bytes()]), data.block_size)
    }
}

#[derive(Debug, Clone)]
pub struct StandardInfo {
    key_bits: usize,
    salt: Vec<u8>,
    encrypted_verifier: Vec<u8>,
    encrypted_verifier_hash: Vec<u8>,
}

impl StandardInfo {
    fn parse(data: &[u8]) -> Result<Self> {
        let header_size = read_u32(data, 0)? as usize;
        let header = data
            .get(4..4 + header_size)
            .context("EncryptionInfo header is truncated")?;

        let alg_id = read_u32(header, 8)?;
        if !matches!(alg_id, ALG_AES_128 | ALG_AES_192 | ALG_AES_256) {
            bail!("unsupported Standard encryption algorithm 0x{alg_id:04x}");
        }
        let key_bits = match read_u32(header, 16)? {
            0 => 128,
            bits => bits as usize,
        };

        let verifier = &data[4 + header_size..];
        let salt_size = read_u32(verifier, 0)? as usize;
        let salt = slice(verifier, 4, salt_size)?;
        let encrypted_verifier = slice(verifier, 4 + salt_size, 16)?;
        let encrypted_verifier_hash = slice(verifier, 24 + salt_size, 32)?;

        Ok(Self {
            key_bits,
            salt,
            encrypted_verifier,
            encrypted_verifier_hash,
        })
    }

    fn unlock_key(&self, password: &str) -> Result<Option<Vec<u8>>> {
        let sha1 = HashAlgorithm::Sha1;
        let base = iterated_hash(sha1, &self.salt, password, STANDARD_SPIN_COUNT);
        let final_hash = sha1.digest(&[&base, &0u32.to_le_bytes()]);

        let mut derived = xor_pad_hash(&final_hash, 0x36);
        derived.extend(xor_pad_hash(&final_hash, 0x5c));
        derived.truncate(self.key_bits / 8);

        let verifier = aes_ecb_decrypt(&derived, &self.encrypted_verifier)?;
        let verifier_hash = aes_ecb_decrypt(&derived, &self.encrypted_verifier_hash)?;
        let actual = sha1.digest(&[&verifier]);

        if verifier_hash.get(..actual.len()) == Some(actual.as_slice()) {
            Ok(Some(derived))
        } else {
            Ok(None)
        }
    }
}

/// `H0 = H(salt + password)`, then `Hn = H(n + Hn-1)` for each spin
fn iterated_hash(hash: HashAlgorithm, salt: &[u8], password: &str, spin_count: u32) -> Vec<u8> {
    let password: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut value = hash.digest(&[salt, &password]);
    for i in 0..spin_count {
        value = hash.digest(&[&i.to_le_bytes(), &value]);
    }
    value
}

fn xor_pad_hash(hash: &[u8], pad: u8) -> Vec<u8> {
    let mut buf = vec![pad; 64];
    for (b, h) in buf.iter_mut().zip(hash) {
        *b ^= h;
    }
    HashAlgorithm::Sha1.digest(&[&buf])
}

/// Truncate, or pad with 0x36, to exactly `len` bytes
fn fit(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    bytes.resize(len, 0x36);
    bytes
}

fn block_aligned(data: &[u8]) -> &[u8] {
    &data[..data.len() - data.len() % AES_BLOCK]
}

fn split_package(package: &[u8]) -> Result<(usize, &[u8])> {
    let header = package
        .get(..8)
        .context("EncryptedPackage stream is truncated")?;
    let mut size = [0u8; 8];
    size.copy_from_slice(header);
    let size = usize::try_from(u64::from_le_bytes(size)).context("EncryptedPackage size overflows")?;
    Ok((size, &package[8..]))
}

fn aes_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    fn run<C: BlockDecryptMut + KeyIvInit>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
        C::new_from_slices(key, iv)
            .map_err(|_| anyhow!("invalid AES key or IV length"))?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|_| anyhow!("ciphertext is not block aligned"))?;
        Ok(())
    }

    let mut buf = data.to_vec();
    match key.len() {
        16 => run::<cbc::Decryptor<aes::Aes128>>(key, iv, &mut buf)?,
        24 => run::<cbc::Decryptor<aes::Aes192>>(key, iv, &mut buf)?,
        32 => run::<cbc::Decryptor<aes::Aes256>>(key, iv, &mut buf)?,
        n => bail!("unsupported AES key length: {n} bytes"),
    }
    Ok(buf)
}

fn aes_ecb_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    fn run<C: BlockDecryptMut + KeyInit>(key: &[u8], buf: &mut [u8]) -> Result<()> {
        C::new_from_slice(key)
            .map_err(|_| anyhow!("invalid AES key length"))?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|_| anyhow!("ciphertext is not block aligned"))?;
        Ok(())
    }

    let mut buf = data.to_vec();
    match key.len() {
        16 => run::<ecb::Decryptor<aes::Aes128>>(key, &mut buf)?,
        24 => run::<ecb::Decryptor<aes::Aes192>>(key, &mut buf)?,
        32 => run::<ecb::Decryptor<aes::Aes256>>(key, &mut buf)?,
        n => bail!("unsupported AES key length: {n} bytes"),
    }
    Ok(buf)
}

fn attr<'a>(node: &roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name)
        .with_context(|| format!("{} is missing the {name} attribute", node.tag_name().name()))
}

fn attr_base64(node: &roxmltree::Node<'_, '_>, name: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(attr(node, name)?.trim())
        .with_context(|| format!("{name} is not valid base64"))
}

fn attr_number<T: std::str::FromStr>(node: &roxmltree::Node<'_, '_>, name: &str) -> Result<T> {
    attr(node, name)?
        .trim()
        .parse()
        .map_err(|_| anyhow!("{name} is not a number"))
}

pub(super) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .context("EncryptionInfo stream is truncated")
}

pub(super) fn slice(data: &[u8], offset: usize, len: usize) -> Result<Vec<u8>> {
    data.get(offset..offset + len)
        .map(<[u8]>::to_vec)
        .context("EncryptionInfo verifier is truncated")
}


#[cfg(test)]
mod tests {
    use super::testing::{agile_encrypt, standard_encrypt};
    use super::*;

    #[test]
    fn test_agile_roundtrip_with_correct_password() {
        let plain: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (info, package) = agile_encrypt(&plain, "s3cret");

        let info = EncryptionInfo::parse(&info).unwrap();
        assert!(matches!(info, EncryptionInfo::Agile(_)));

        let key = info.unlock_key("s3cret").unwrap().expect("password should verify");
        assert_eq!(key.len(), 32);
        let decrypted = info.decrypt_package(&key, &package).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn test_agile_wrong_password_is_rejected() {
        let (info, _) = agile_encrypt(b"PK\x03\x04payload", "right");
        let info = EncryptionInfo::parse(&info).unwrap();
        assert!(info.unlock_key("wrong").unwrap().is_none());
        assert!(info.unlock_key("Right").unwrap().is_none());
    }

    #[test]
    fn test_unsupported_version() {
        let stream = [0x03, 0x00, 0x03, 0x00, 0, 0, 0, 0];
        let err = EncryptionInfo::parse(&stream).unwrap_err();
        assert!(err.to_string().contains("unsupported encryption version 3.3"));
        assert!(EncryptionInfo::parse(&[0x04, 0x00]).is_err());
    }

    #[test]
    fn test_truncated_package() {
        let (info, package) = agile_encrypt(&[7u8; 100], "pw");
        let info = EncryptionInfo::parse(&info).unwrap();
        let key = info.unlock_key("pw").unwrap().unwrap();
        assert!(info.decrypt_package(&key, &package[..40]).is_err());
        assert!(info.decrypt_package(&key, &package[..4]).is_err());
    }

    #[test]
    fn test_standard_aes128_roundtrip() {
        let plain: Vec<u8> = (0..5_000u32).map(|i| (i % 241) as u8).collect();
        let (info, package) = standard_encrypt(&plain, "pw");

        let info = EncryptionInfo::parse(&info).unwrap();
        assert!(matches!(info, EncryptionInfo::Standard(_)));
        assert!(info.unlock_key("wrong").unwrap().is_none());

        let key = info.unlock_key("pw").unwrap().expect("password should verify");
        assert_eq!(key.len(), 16);
        assert_eq!(info.decrypt_package(&key, &package).unwrap(), plain);
    }

    #[test]
    fn test_standard_header_rejects_rc4() {
        // header size, flags, size extra, algId = RC4 (0x6801)
        let mut data = Vec::new();
        data.extend(32u32.to_le_bytes());
        data.extend([0u8; 8]);
        data.extend(0x6801u32.to_le_bytes());
        data.extend([0u8; 20]);
        let mut stream = vec![0x03, 0x00, 0x02, 0x00, 0x24, 0, 0, 0];
        stream.extend(data);
        let err = EncryptionInfo::parse(&stream).unwrap_err();
        assert!(err.to_string().contains("unsupported Standard encryption algorithm"));
    }

    #[test]
    fn test_fit_pads_and_truncates() {
        assert_eq!(fit(vec![1, 2, 3], 2), vec![1, 2]);
        assert_eq!(fit(vec![1], 3), vec![1, 0x36, 0x36]);
    }
}
