use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use super::{ConversionCall, VoiceEngine};
use crate::config::EngineConfig;
use crate::error::EngineError;

const ENTRY_POINT: &str = "core.py";
const HOP_LENGTH: &str = "128";
const EMBEDDER: &str = "contentvec";
const STDERR_TAIL: usize = 2048;

/// Drives an Applio checkout through its `core.py` command line.
///
/// Each conversion is one interpreter process, run from the install root so
/// the engine's relative asset paths resolve.
#[derive(Debug, Clone)]
pub struct ApplioEngine {
    root: PathBuf,
    python: String,
    device: String,
}

impl ApplioEngine {
    /// Check the install, fetch missing prerequisites and select a device.
    ///
    /// Blocking; call it from a blocking context (the [`EngineHandle`](super::EngineHandle)
    /// factory does).
    pub fn prepare(cfg: &EngineConfig) -> Result<Self, EngineError> {
        let entry = cfg.root.join(ENTRY_POINT);
        if !entry.is_file() {
            return Err(EngineError::Construction(format!(
                "engine entry point not found at {}",
                entry.display()
            )));
        }

        if !pitch_predictor(&cfg.root).is_file() {
            info!(root = %cfg.root.display(), "downloading engine prerequisites");
            let status = Command::new(&cfg.python)
                .current_dir(&cfg.root)
                .args([ENTRY_POINT, "prerequisites", "--models", "True", "--exe", "True"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match status {
                Ok(s) if s.success() => info!("engine prerequisites ready"),
                Ok(s) => warn!(status = %s, "prerequisite download failed; continuing"),
                Err(e) => warn!(error = %e, "prerequisite download could not start; continuing"),
            }
        }

        let device = cfg.device.clone().unwrap_or_else(probe_device);

        Ok(Self {
            root: cfg.root.clone(),
            python: cfg.python.clone(),
            device,
        })
    }
}

impl VoiceEngine for ApplioEngine {
    fn device(&self) -> &str {
        &self.device
    }

    fn convert(&self, call: &ConversionCall) -> Result<Option<PathBuf>, EngineError> {
        if !call.model_path.is_file() {
            return Err(EngineError::Rejected(format!(
                "model file {} is missing",
                call.model_path.display()
            )));
        }

        debug!(
            model = %call.model_path.display(),
            f0_method = call.f0_method.as_str(),
            pitch = call.pitch,
            "invoking engine"
        );
        let output = Command::new(&self.python)
            .current_dir(&self.root)
            .args(infer_args(call))
            .env("RVC_DEVICE", &self.device)
            .stdin(Stdio::null())
            .output()
            .map_err(EngineError::Spawn)?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                status: output.status.to_string(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL),
            });
        }

        // The CLI reports success on stdout only; the output file is the contract.
        Ok(None)
    }
}

fn pitch_predictor(root: &Path) -> PathBuf {
    root.join("rvc").join("models").join("predictors").join("rmvpe.pt")
}

/// `cuda:0` when a GPU is listed by the driver tools, `cpu` otherwise.
fn probe_device() -> String {
    let gpu = Command::new("nvidia-smi")
        .arg("-L")
        .stderr(Stdio::null())
        .output()
        .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).contains("GPU"))
        .unwrap_or(false);
    if gpu { "cuda:0".to_owned() } else { "cpu".to_owned() }
}

fn infer_args(call: &ConversionCall) -> Vec<OsString> {
    let index = call
        .index_path
        .as_ref()
        .map(|p| p.as_os_str().to_owned())
        .unwrap_or_default();

    let mut args: Vec<OsString> = vec![ENTRY_POINT.into(), "infer".into()];
    let mut flag = |name: &str, value: OsString| {
        args.push(format!("--{name}").into());
        args.push(value);
    };
    flag("pitch", call.pitch.to_string().into());
    flag("index_rate", call.index_rate.to_string().into());
    flag("volume_envelope", call.volume_envelope.to_string().into());
    flag("protect", call.protect.to_string().into());
    flag("hop_length", HOP_LENGTH.into());
    flag("f0_method", call.f0_method.as_str().into());
    flag("input_path", call.input_path.as_os_str().to_owned());
    flag("output_path", call.output_path.as_os_str().to_owned());
    flag("pth_path", call.model_path.as_os_str().to_owned());
    flag("index_path", index);
    flag("split_audio", "False".into());
    flag("f0_autotune", "False".into());
    flag("clean_audio", "False".into());
    flag("export_format", "WAV".into());
    flag("embedder_model", EMBEDDER.into());
    args
}

fn tail(text: &str, max: usize) -> String {
    let text = text.trim_end();
    if text.len() <= max {
        return text.to_owned();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
