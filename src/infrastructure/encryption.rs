//! AES-256-GCM 私钥加密模块（Key Vault）
//!
//! 私钥以三段式信封静态存储：密文、完整性标签（keyHash）、nonce。
//! 解密只在签名作用域内发生，明文用 `Zeroizing` 包装，离开作用域即清零。

use std::str::FromStr;

use aes_gcm::{
    aead::{generic_array::GenericArray, AeadCore, AeadInPlace, KeyInit, OsRng},
    Aes256Gcm,
};
use anyhow::anyhow;
use ethers::{
    signers::{LocalWallet, Signer},
    types::Address,
};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    domain::EncryptedEnvelope,
    error::{EscrowError, Result},
};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// 关联数据：把密文绑定到用途上
const ENVELOPE_AAD: &[u8] = b"ironescrow:wallet-key:v1";

/// 加密密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }

    /// 解析主密钥
    ///
    /// 支持三种格式：64位hex、32字节原文、>=16字符口令（SHA-256派生）
    pub fn parse(key_str: &str) -> anyhow::Result<Self> {
        if key_str.is_empty() {
            return Err(anyhow!("master key empty"));
        }

        let mut key = [0u8; 32];
        // 64 字符但不是 hex 时按口令处理
        let hex_key = if key_str.len() == 64 {
            hex::decode(key_str).ok()
        } else {
            None
        };

        if let Some(mut decoded) = hex_key {
            key.copy_from_slice(&decoded);
            decoded.zeroize();
        } else if key_str.len() == 32 {
            key.copy_from_slice(key_str.as_bytes());
        } else if key_str.len() >= 16 {
            let mut hasher = Sha256::new();
            hasher.update(key_str.as_bytes());
            key.copy_from_slice(&hasher.finalize());
        } else {
            return Err(anyhow!("master key too short (min 16)"));
        }

        Ok(Self::new(key))
    }
}

/// 私钥保险库：无共享可变状态，每次解密相互独立
pub struct KeyVault {
    key: EncryptionKey,
}

impl KeyVault {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// 从环境变量读取主密钥
    pub fn from_env(var: &str) -> anyhow::Result<Self> {
        let key_str = Zeroizing::new(
            std::env::var(var).map_err(|_| anyhow!("{} environment variable not set", var))?,
        );
        Ok(Self::new(EncryptionKey::parse(&key_str)?))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|_| EscrowError::Crypto("invalid master key length".into()))
    }

    /// 加密私钥，每次调用使用新的随机 nonce
    pub fn encrypt(&self, plaintext_key: &str) -> Result<EncryptedEnvelope> {
        validate_private_key(plaintext_key)?;

        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut buffer = plaintext_key.as_bytes().to_vec();
        let tag = match cipher.encrypt_in_place_detached(&nonce, ENVELOPE_AAD, &mut buffer) {
            Ok(tag) => tag,
            Err(_) => {
                buffer.zeroize();
                return Err(EscrowError::Crypto("encryption failed".into()));
            }
        };

        Ok(EncryptedEnvelope {
            ciphertext: hex::encode(&buffer),
            key_hash: hex::encode(tag),
            nonce: hex::encode(nonce),
        })
    }

    /// 解密信封；标签不匹配是硬错误
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Zeroizing<String>> {
        let nonce = decode_part("nonce", &envelope.nonce)?;
        let tag = decode_part("key hash", &envelope.key_hash)?;
        let mut buffer = Zeroizing::new(decode_part("ciphertext", &envelope.ciphertext)?);

        if nonce.len() != NONCE_LEN {
            return Err(EscrowError::Crypto(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(EscrowError::Crypto(format!(
                "key hash must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }

        let cipher = self.cipher()?;
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                ENVELOPE_AAD,
                buffer.as_mut_slice(),
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| EscrowError::Crypto("integrity check failed".into()))?;

        let plaintext = std::str::from_utf8(buffer.as_slice())
            .map_err(|_| EscrowError::Crypto("decrypted key is not valid utf-8".into()))?;
        Ok(Zeroizing::new(plaintext.to_owned()))
    }

    /// 解密并构造签名账户；明文私钥不离开本函数
    pub fn signer(&self, envelope: &EncryptedEnvelope, chain_id: u64) -> Result<LocalWallet> {
        let plaintext = self.decrypt(envelope)?;
        let wallet = LocalWallet::from_str(plaintext.as_str())
            .map_err(|_| EscrowError::Crypto("decrypted key is not a valid private key".into()))?;
        Ok(wallet.with_chain_id(chain_id))
    }
}

fn decode_part(name: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| EscrowError::Crypto(format!("{} is not valid hex", name)))
}

/// 校验私钥格式：32字节十六进制（可带0x前缀），且为合法的 secp256k1 标量
pub fn validate_private_key(plaintext_key: &str) -> Result<()> {
    let hex_part = plaintext_key
        .strip_prefix("0x")
        .or_else(|| plaintext_key.strip_prefix("0X"))
        .unwrap_or(plaintext_key);
    if hex_part.len() != 64 {
        return Err(EscrowError::Crypto(
            "private key must be 32 bytes of hex".into(),
        ));
    }
    let bytes = Zeroizing::new(
        hex::decode(hex_part)
            .map_err(|_| EscrowError::Crypto("private key is not valid hex".into()))?,
    );
    k256::SecretKey::from_slice(bytes.as_slice())
        .map_err(|_| EscrowError::Crypto("private key is out of curve range".into()))?;
    Ok(())
}

/// 由私钥推导地址
pub fn derive_address(plaintext_key: &str) -> Result<Address> {
    validate_private_key(plaintext_key)?;
    let wallet = LocalWallet::from_str(plaintext_key)
        .map_err(|_| EscrowError::Crypto("private key rejected by signer".into()))?;
    Ok(wallet.address())
}
