use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CTX_SIZE: u32 = 4096;
pub const DEFAULT_BATCH_SIZE: u32 = 2048;
pub const DEFAULT_UBATCH_SIZE: u32 = 512;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

/// Flat map of llama-server runtime flags.
///
/// Every field is optional so a per-model map can be layered over the
/// configured defaults with [`RuntimeFlags::merged_over`]. Unset fields fall
/// back to the constants above when the launch command is built.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ubatch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_layers: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_batch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_parallel: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_sequences: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mlock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmap: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash_attn: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numa: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simple_io: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_all: Option<bool>,

    // multimodal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multimodal_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmproj_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_vision: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_batch_size: Option<u32>,

    /// Passed through verbatim after every mapped flag.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl RuntimeFlags {
    /// Fill every unset field of `self` from `base`.
    pub fn merged_over(self, base: &RuntimeFlags) -> RuntimeFlags {
        let base = base.clone();
        RuntimeFlags {
            ctx_size: self.ctx_size.or(base.ctx_size),
            batch_size: self.batch_size.or(base.batch_size),
            ubatch_size: self.ubatch_size.or(base.ubatch_size),
            gpu_layers: self.gpu_layers.or(base.gpu_layers),
            threads: self.threads.or(base.threads),
            thread_batch: self.thread_batch.or(base.thread_batch),
            host: self.host.or(base.host),
            port: self.port.or(base.port),
            n_parallel: self.n_parallel.or(base.n_parallel),
            n_sequences: self.n_sequences.or(base.n_sequences),
            mlock: self.mlock.or(base.mlock),
            mmap: self.mmap.or(base.mmap),
            flash_attn: self.flash_attn.or(base.flash_attn),
            numa: self.numa.or(base.numa),
            simple_io: self.simple_io.or(base.simple_io),
            verbose: self.verbose.or(base.verbose),
            log_all: self.log_all.or(base.log_all),
            multimodal_enabled: self.multimodal_enabled.or(base.multimodal_enabled),
            mmproj_path: self.mmproj_path.or(base.mmproj_path),
            enable_vision: self.enable_vision.or(base.enable_vision),
            image_batch_size: self.image_batch_size.or(base.image_batch_size),
            enable_audio: self.enable_audio.or(base.enable_audio),
            audio_batch_size: self.audio_batch_size.or(base.audio_batch_size),
            extra_args: if self.extra_args.is_empty() {
                base.extra_args
            } else {
                self.extra_args
            },
        }
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}
