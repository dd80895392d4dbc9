//! Size-gated payload compression.
//!
//! Only the caller's payload is ever compressed. The key id in the inner
//! envelope stays outside the compressed region so the compression ratio
//! says nothing about it.
//!
//! Codec state is created lazily on first use and shared by every clone of
//! a [`Cipher`](crate::Cipher). A failed initialization is not sticky: the
//! next call tries again.

use crate::envelope::CompressionFlag;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use zeroize::Zeroizing;

/// Payloads shorter than this are stored uncompressed by default.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Default upper bound on a decompressed payload (64 MiB).
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// zstd level used by the shared compressor.
const ZSTD_LEVEL: i32 = 3;

/// Compression codec written into new sealed values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    /// zstd, flag `1`
    #[default]
    Zstd,
    /// lz4 block format with a length prefix, flag `2`
    Lz4,
}

impl CompressionAlgorithm {
    /// Wire flag recorded for payloads compressed with this algorithm.
    #[must_use]
    pub const fn flag(self) -> CompressionFlag {
        match self {
            Self::Zstd => CompressionFlag::ZSTD,
            Self::Lz4 => CompressionFlag::LZ4,
        }
    }

    /// Maps a wire flag back to its algorithm, if it names one.
    #[must_use]
    pub const fn from_flag(flag: CompressionFlag) -> Option<Self> {
        match flag.as_u8() {
            1 => Some(Self::Zstd),
            2 => Some(Self::Lz4),
            _ => None,
        }
    }

    /// Lower-case algorithm name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Zstd => "zstd",
            Self::Lz4 => "lz4",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zstd" => Ok(Self::Zstd),
            "lz4" => Ok(Self::Lz4),
            other => Err(Error::UnsupportedCompression(format!("algorithm {other:?}"))),
        }
    }
}

/// Whether sealing compresses, and whether codecs may be used at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    /// Seal compresses payloads at or above the threshold.
    #[default]
    Enabled,
    /// Seal never compresses. Open still decompresses existing values.
    Disabled,
    /// Codecs are never initialized. Opening a compressed value fails with
    /// `Error::UnsupportedCompression`.
    Unavailable,
}

/// Compression policy for a [`Cipher`](crate::Cipher).
///
/// # Example
///
/// ```
/// use fieldseal::compression::{CompressionAlgorithm, CompressionConfig};
///
/// let config = CompressionConfig::default()
///     .with_algorithm(CompressionAlgorithm::Lz4)
///     .with_threshold(256);
/// assert_eq!(config.threshold, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compression mode
    pub mode: CompressionMode,
    /// Codec used when sealing
    pub algorithm: CompressionAlgorithm,
    /// Minimum payload length, in bytes, that gets compressed
    pub threshold: usize,
    /// Decompressed payloads larger than this are rejected
    pub max_decompressed_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            mode: CompressionMode::Enabled,
            algorithm: CompressionAlgorithm::Zstd,
            threshold: DEFAULT_THRESHOLD,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }
}

impl CompressionConfig {
    /// Policy that never compresses on seal.
    #[must_use]
    pub fn disabled() -> Self {
        Self { mode: CompressionMode::Disabled, ..Self::default() }
    }

    /// Policy that never touches a codec, not even to decompress.
    #[must_use]
    pub fn unavailable() -> Self {
        Self { mode: CompressionMode::Unavailable, ..Self::default() }
    }

    /// Sets the codec used when sealing.
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the minimum payload size that gets compressed.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the decompressed size limit.
    #[must_use]
    pub const fn with_max_decompressed_size(mut self, limit: usize) -> Self {
        self.max_decompressed_size = limit;
        self
    }

    /// Checks that the size limits leave room for compression.
    ///
    /// The algorithm needs no check: every [`CompressionAlgorithm`] variant
    /// has a codec in this build.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCompressionConfig` if compression is enabled
    /// and `max_decompressed_size` is below `threshold`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.mode == CompressionMode::Enabled && self.max_decompressed_size < self.threshold {
            return Err(Error::InvalidCompressionConfig {
                threshold: self.threshold,
                max_decompressed_size: self.max_decompressed_size,
            });
        }
        Ok(())
    }
}

/// A compression codec.
///
/// Implementations must be usable from many threads at once; a codec whose
/// underlying state is not reentrant serializes internally.
pub trait Codec: Send + Sync {
    /// Compresses `input`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CompressionFailed` if the codec fails.
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, Error>;

    /// Decompresses `input`, refusing outputs larger than `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::DecompressionFailed` on malformed input or if the
    /// output would exceed `limit`.
    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, Error>;
}

/// zstd codec around one shared bulk compressor.
///
/// `zstd::bulk::Compressor` needs `&mut self`, so compression calls
/// serialize on its mutex. Decompression streams and holds no shared state.
pub struct ZstdCodec {
    compressor: Mutex<zstd::bulk::Compressor<'static>>,
}

impl ZstdCodec {
    /// Creates the shared compressor.
    ///
    /// # Errors
    ///
    /// Returns `Error::CompressionFailed` if the zstd context cannot be
    /// allocated.
    pub fn new(level: i32) -> Result<Self, Error> {
        let compressor = zstd::bulk::Compressor::new(level)
            .map_err(|e| Error::CompressionFailed(format!("zstd init: {e}")))?;
        Ok(Self { compressor: Mutex::new(compressor) })
    }
}

impl Codec for ZstdCodec {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut compressor = self.compressor.lock().unwrap_or_else(PoisonError::into_inner);
        compressor.compress(input).map_err(|e| Error::CompressionFailed(format!("zstd: {e}")))
    }

    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, Error> {
        let decoder = zstd::stream::read::Decoder::new(input)
            .map_err(|e| Error::DecompressionFailed(format!("zstd: {e}")))?;

        let mut output = Vec::new();
        decoder
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut output)
            .map_err(|e| Error::DecompressionFailed(format!("zstd: {e}")))?;

        if output.len() > limit {
            output.fill(0);
            return Err(Error::DecompressionFailed(format!(
                "decompressed size exceeds limit of {limit} bytes"
            )));
        }
        Ok(output)
    }
}

/// lz4 block codec with a little-endian `u32` length prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        if u32::try_from(input.len()).is_err() {
            return Err(Error::CompressionFailed("lz4: payload exceeds 4 GiB".to_string()));
        }
        Ok(lz4_flex::block::compress_prepend_size(input))
    }

    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, Error> {
        let Some(prefix) = input.get(..4) else {
            return Err(Error::DecompressionFailed("lz4: missing length prefix".to_string()));
        };
        let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if declared > limit {
            return Err(Error::DecompressionFailed(format!(
                "decompressed size exceeds limit of {limit} bytes"
            )));
        }

        let mut output = lz4_flex::block::decompress_size_prepended(input)
            .map_err(|e| Error::DecompressionFailed(format!("lz4: {e}")))?;
        if output.len() != declared {
            let actual = output.len();
            output.fill(0);
            return Err(Error::DecompressionFailed(format!(
                "lz4: length prefix says {declared} bytes, decoded {actual}"
            )));
        }
        Ok(output)
    }
}

/// Observable lifecycle of a [`LazyCodec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    /// No initialization attempted yet
    Uninitialized,
    /// Codec is ready and shared
    Ready,
    /// Last initialization failed; the next use retries
    FailedRetryable,
}

type Initializer = Box<dyn Fn() -> Result<Arc<dyn Codec>, Error> + Send + Sync>;

/// A codec created on first use.
///
/// Initialization is gated by a mutex so exactly one caller runs it at a
/// time. Once a codec is ready every caller gets the same instance without
/// locking. Failures leave the slot empty and bump a counter.
pub struct LazyCodec {
    algorithm: CompressionAlgorithm,
    ready: OnceLock<Arc<dyn Codec>>,
    failures: Mutex<u32>,
    init: Initializer,
}

impl LazyCodec {
    /// Creates a slot that builds the codec with `init` on first use.
    pub fn new<F>(algorithm: CompressionAlgorithm, init: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Codec>, Error> + Send + Sync + 'static,
    {
        Self { algorithm, ready: OnceLock::new(), failures: Mutex::new(0), init: Box::new(init) }
    }

    /// Creates a slot for one of the built-in codecs.
    #[must_use]
    pub fn builtin(algorithm: CompressionAlgorithm) -> Self {
        match algorithm {
            CompressionAlgorithm::Zstd => Self::new(algorithm, || {
                Ok(Arc::new(ZstdCodec::new(ZSTD_LEVEL)?) as Arc<dyn Codec>)
            }),
            CompressionAlgorithm::Lz4 => {
                Self::new(algorithm, || Ok(Arc::new(Lz4Codec) as Arc<dyn Codec>))
            }
        }
    }

    /// Returns the ready codec, initializing it if needed.
    ///
    /// # Errors
    ///
    /// Returns the initializer's error. The slot stays retryable.
    pub fn get(&self) -> Result<Arc<dyn Codec>, Error> {
        if let Some(codec) = self.ready.get() {
            return Ok(Arc::clone(codec));
        }

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);

        // another caller may have finished while we waited for the lock
        if let Some(codec) = self.ready.get() {
            return Ok(Arc::clone(codec));
        }

        match (self.init)() {
            Ok(codec) => {
                tracing::debug!(algorithm = %self.algorithm, "compression codec ready");
                Ok(Arc::clone(self.ready.get_or_init(|| codec)))
            }
            Err(err) => {
                *failures += 1;
                tracing::warn!(
                    algorithm = %self.algorithm,
                    attempts = *failures,
                    error = %err,
                    "compression codec initialization failed; will retry"
                );
                Err(err)
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CodecState {
        if self.ready.get().is_some() {
            return CodecState::Ready;
        }
        if *self.failures.lock().unwrap_or_else(PoisonError::into_inner) > 0 {
            CodecState::FailedRetryable
        } else {
            CodecState::Uninitialized
        }
    }
}

/// Compression subsystem shared by a cipher context.
pub struct Compression {
    config: CompressionConfig,
    zstd: LazyCodec,
    lz4: LazyCodec,
}

impl Compression {
    /// Creates the subsystem. No codec is initialized yet.
    #[must_use]
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            config,
            zstd: LazyCodec::builtin(CompressionAlgorithm::Zstd),
            lz4: LazyCodec::builtin(CompressionAlgorithm::Lz4),
        }
    }

    /// Replaces one codec slot, mainly to inject custom initializers.
    #[must_use]
    pub fn with_codec(mut self, codec: LazyCodec) -> Self {
        match codec.algorithm {
            CompressionAlgorithm::Zstd => self.zstd = codec,
            CompressionAlgorithm::Lz4 => self.lz4 = codec,
        }
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Lifecycle state of one codec slot.
    #[must_use]
    pub fn codec_state(&self, algorithm: CompressionAlgorithm) -> CodecState {
        self.slot(algorithm).state()
    }

    fn slot(&self, algorithm: CompressionAlgorithm) -> &LazyCodec {
        match algorithm {
            CompressionAlgorithm::Zstd => &self.zstd,
            CompressionAlgorithm::Lz4 => &self.lz4,
        }
    }

    /// Applies the seal-time policy to `payload`.
    ///
    /// Returns `None` when the payload should be stored as-is: compression
    /// is not enabled, the payload is under the threshold, the payload is
    /// larger than `max_decompressed_size` (it could not be opened again),
    /// or compressing did not make it smaller.
    ///
    /// # Errors
    ///
    /// Returns `Error::CompressionFailed` if the codec cannot be initialized
    /// or fails.
    pub fn compress(
        &self,
        payload: &[u8],
    ) -> Result<Option<(CompressionFlag, Zeroizing<Vec<u8>>)>, Error> {
        if self.config.mode != CompressionMode::Enabled
            || payload.len() < self.config.threshold
            || payload.len() > self.config.max_decompressed_size
        {
            return Ok(None);
        }

        let algorithm = self.config.algorithm;
        let compressed = Zeroizing::new(self.slot(algorithm).get()?.compress(payload)?);
        if compressed.len() >= payload.len() {
            return Ok(None);
        }

        Ok(Some((algorithm.flag(), compressed)))
    }

    /// Reverses `compress` according to the flag stored in a sealed value.
    ///
    /// # Errors
    ///
    /// - `Error::UnsupportedCompression` for a reserved flag, or any
    ///   compressed flag when compression is unavailable
    /// - `Error::DecompressionFailed` for malformed or oversized data
    /// - `Error::CompressionFailed` if the codec cannot be initialized
    pub fn decompress(
        &self,
        flag: CompressionFlag,
        payload: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        if !flag.is_compressed() {
            return Ok(Zeroizing::new(payload.to_vec()));
        }

        let Some(algorithm) = CompressionAlgorithm::from_flag(flag) else {
            return Err(Error::UnsupportedCompression(format!("flag {}", flag.as_u8())));
        };
        if self.config.mode == CompressionMode::Unavailable {
            return Err(Error::UnsupportedCompression(format!(
                "flag {} ({algorithm}): compression unavailable",
                flag.as_u8()
            )));
        }

        let codec = self.slot(algorithm).get()?;
        Ok(Zeroizing::new(codec.decompress(payload, self.config.max_decompressed_size)?))
    }
}
