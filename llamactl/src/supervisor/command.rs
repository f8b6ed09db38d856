//! llama-server command line construction.

use std::path::Path;
use std::process::Stdio;

use llamactl_shared::RuntimeFlags;
use llamactl_shared::config::{DEFAULT_BATCH_SIZE, DEFAULT_CTX_SIZE, DEFAULT_UBATCH_SIZE};
use tokio::process::Command;

/// Program plus arguments for one llama-server instance.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchCommand {
    program: String,
    args: Vec<String>,
}

impl LaunchCommand {
    /// `server_command` is the program followed by any fixed leading arguments.
    /// The model arguments are appended after them.
    pub fn build(server_command: &[String], model_path: &Path, flags: &RuntimeFlags) -> Self {
        let (program, leading) = match server_command.split_first() {
            Some((program, leading)) => (program.clone(), leading.to_vec()),
            None => ("llama-server".to_string(), Vec::new()),
        };

        let mut cmd = Self {
            program,
            args: leading,
        };

        cmd.arg("-m").arg(model_path.display().to_string());
        cmd.pair("-c", flags.ctx_size.unwrap_or(DEFAULT_CTX_SIZE));
        cmd.pair("-b", flags.batch_size.unwrap_or(DEFAULT_BATCH_SIZE));
        cmd.pair("-ub", flags.ubatch_size.unwrap_or(DEFAULT_UBATCH_SIZE));

        // projector is only passed when it actually exists on disk
        if let Some(mmproj) = flags
            .mmproj_path
            .as_deref()
            .filter(|p| flags.multimodal_enabled == Some(true) && p.exists())
        {
            cmd.arg("--mmproj").arg(mmproj.display().to_string());
            if flags.enable_vision == Some(true) {
                cmd.arg("--vision");
                if let Some(n) = flags.image_batch_size {
                    cmd.pair("--image-batch-size", n);
                }
            }
            if flags.enable_audio == Some(true) {
                cmd.arg("--audio");
                if let Some(n) = flags.audio_batch_size {
                    cmd.pair("--audio-batch-size", n);
                }
            }
        }

        if let Some(n) = flags.gpu_layers {
            cmd.pair("-ngl", n);
        }
        if let Some(n) = flags.threads {
            cmd.pair("-t", n);
        }
        if let Some(n) = flags.thread_batch {
            cmd.pair("-tb", n);
        }

        cmd.switch("--mlock", flags.mlock == Some(true));
        cmd.switch("--no-mmap", flags.mmap == Some(false));
        cmd.switch("-fa", flags.flash_attn == Some(true));
        cmd.switch("--numa", flags.numa == Some(true));
        cmd.switch("--simple-io", flags.simple_io == Some(true));

        cmd.pair("--host", flags.host());
        cmd.pair("--port", flags.port());
        cmd.pair("-np", flags.n_parallel.unwrap_or(1));
        cmd.pair("-ns", flags.n_sequences.unwrap_or(1));

        cmd.switch("--verbose", flags.verbose == Some(true));
        cmd.switch("--log-all", flags.log_all == Some(true));

        cmd.args.extend(flags.extra_args.iter().cloned());
        cmd
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Shell-style rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// A tokio command with piped output. The child is killed if its handle
    /// is dropped, so a crashed watcher cannot leak a server.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    fn pair(&mut self, flag: &str, value: impl ToString) {
        self.arg(flag).arg(value.to_string());
    }

    fn switch(&mut self, flag: &str, on: bool) {
        if on {
            self.arg(flag);
        }
    }
}
