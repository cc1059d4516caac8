//! The SECIO 1.0.0 handshake.
//!
//! Propose, select algorithms, exchange signed ephemeral keys, verify,
//! stretch the shared secret and install the ciphers. The handshake ends
//! with each side echoing the other's nonce over the secured stream.

use std::cmp::Ordering;
use std::str::FromStr;

use libp2p::identity::PublicKey;
use peernet_core::{CancelToken, SecioConfig};
use peernet_crypto::{
    order, select_best, stretch_keys, CipherKind, CryptoError, EphemeralKey, ExchangeKind,
    HashKind,
};
use prost::Message;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::proto::{read_fixed, write_fixed, Exchange, Propose, MAX_HANDSHAKE_RECORD};
use super::stream::Secio1Stream;
use crate::error::NetworkError;
use crate::peer::LocalPeer;

pub const NONCE_SIZE: usize = 16;

/// Algorithms both sides agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suite {
    pub exchange: ExchangeKind,
    pub cipher: CipherKind,
    pub hash: HashKind,
}

/// Result of a completed handshake.
#[derive(Debug)]
pub struct SecureSession<S> {
    pub stream: Secio1Stream<S>,
    pub remote_key: PublicKey,
    pub suite: Suite,
}

/// Keep only the names this node implements, in the configured order.
fn supported<T: FromStr>(names: &[String], what: &str) -> Result<String, NetworkError> {
    let kept: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| {
            let ok = T::from_str(name).is_ok();
            if !ok {
                tracing::warn!(kind = what, name, "skipping unsupported secio algorithm");
            }
            ok
        })
        .collect();
    if kept.is_empty() {
        return Err(NetworkError::NotSupported(format!("no usable secio {}", what)));
    }
    Ok(kept.join(","))
}

fn field<'a>(value: &'a Option<Vec<u8>>, what: &str) -> Result<&'a [u8], NetworkError> {
    value
        .as_deref()
        .ok_or_else(|| NetworkError::Protocol(format!("secio record missing {}", what)))
}

/// Run the handshake over `stream`. Aborts with `Cancelled` if `cancel` fires.
pub async fn handshake<S>(
    stream: S,
    local: &LocalPeer,
    config: &SecioConfig,
    cancel: &CancelToken,
) -> Result<SecureSession<S>, NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NetworkError::Cancelled),
        result = run(stream, local, config) => result,
    }
}

async fn run<S>(
    mut stream: S,
    local: &LocalPeer,
    config: &SecioConfig,
) -> Result<SecureSession<S>, NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchanges = supported::<ExchangeKind>(&config.exchanges, "exchanges")?;
    let ciphers = supported::<CipherKind>(&config.ciphers, "ciphers")?;
    let hashes = supported::<HashKind>(&config.hashes, "hashes")?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    let local_pub = local.public_key().encode_protobuf();

    // Propose.
    let propose_out = Propose {
        rand: Some(nonce.to_vec()),
        pubkey: Some(local_pub.clone()),
        exchanges: Some(exchanges.clone()),
        ciphers: Some(ciphers.clone()),
        hashes: Some(hashes.clone()),
    }
    .encode_to_vec();
    write_fixed(&mut stream, &propose_out).await?;
    let propose_in = read_fixed(&mut stream, MAX_HANDSHAKE_RECORD).await?;
    let remote = Propose::decode(propose_in.as_slice())?;

    let remote_pub = field(&remote.pubkey, "public key")?;
    let remote_nonce = field(&remote.rand, "nonce")?;
    let remote_key = PublicKey::try_decode_protobuf(remote_pub)?;

    // Select.
    let ordering = order(&local_pub, &nonce, remote_pub, remote_nonce)?;
    let pick = |ours: &str, theirs: &Option<String>, what: &'static str| {
        select_best(ordering, ours, theirs.as_deref().unwrap_or_default(), what)
    };
    let suite = Suite {
        exchange: pick(&exchanges, &remote.exchanges, "exchange")?.parse()?,
        cipher: pick(&ciphers, &remote.ciphers, "cipher")?.parse()?,
        hash: pick(&hashes, &remote.hashes, "hash")?.parse()?,
    };
    tracing::debug!(
        exchange = %suite.exchange,
        cipher = %suite.cipher,
        hash = %suite.hash,
        "secio algorithms selected"
    );

    // Exchange.
    let ephemeral = EphemeralKey::generate(suite.exchange);
    let epub = ephemeral.public_bytes();
    let corpus = [propose_out.as_slice(), propose_in.as_slice(), epub.as_slice()].concat();
    let signature = local
        .keypair()
        .sign(&corpus)
        .map_err(|e| NetworkError::Identity(format!("signing failed: {}", e)))?;
    let exchange_out = Exchange {
        epubkey: Some(epub),
        signature: Some(signature),
    }
    .encode_to_vec();
    write_fixed(&mut stream, &exchange_out).await?;
    let exchange_in = read_fixed(&mut stream, MAX_HANDSHAKE_RECORD).await?;
    let remote_exchange = Exchange::decode(exchange_in.as_slice())?;

    // Verify.
    let remote_epub = field(&remote_exchange.epubkey, "ephemeral key")?;
    let remote_sig = field(&remote_exchange.signature, "signature")?;
    let remote_corpus = [propose_in.as_slice(), propose_out.as_slice(), remote_epub].concat();
    if !remote_key.verify(&remote_corpus, remote_sig) {
        return Err(CryptoError::SignatureVerificationFailed.into());
    }

    // Derive and install.
    let secret = ephemeral.agree(remote_epub)?;
    let (k1, k2) = stretch_keys(suite.cipher, suite.hash, &secret)?;
    let (local_keys, remote_keys) = match ordering {
        Ordering::Greater => (&k1, &k2),
        _ => (&k2, &k1),
    };
    let mut secured = Secio1Stream::new(stream, suite.cipher, suite.hash, local_keys, remote_keys)?;

    // Each side proves it derived the same keys by echoing the other's nonce.
    secured.write_all(remote_nonce).await?;
    secured.flush().await?;
    let mut echoed = [0u8; NONCE_SIZE];
    secured.read_exact(&mut echoed).await?;
    if echoed != nonce {
        return Err(NetworkError::Integrity("nonce echo mismatch".into()));
    }

    tracing::info!(remote = %remote_key.to_peer_id(), "secio session established");
    Ok(SecureSession {
        stream: secured,
        remote_key,
        suite,
    })
}
