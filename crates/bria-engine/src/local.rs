use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bria_contracts::{BriaError, NormalizedResult, Result};
use image::DynamicImage;
use serde_json::{json, Value};

use crate::background::encode_png;
use crate::config::BriaConfig;
use crate::{bytes_to_data_uri, truncate_text};

pub const DEFAULT_TEXT_TO_IMAGE_MODEL: &str = "runwayml/stable-diffusion-v1-5";
pub const DEFAULT_INPAINT_MODEL: &str = "runwayml/stable-diffusion-inpainting";
pub const LOCAL_INSTALL_HINT: &str =
    "pip install 'diffusers[torch]' transformers accelerate torch pillow";
// Every module imported by the driver script.
const REQUIRED_MODULES: &[&str] = &["torch", "diffusers", "PIL"];

const DRIVER_SCRIPT: &str = include_str!("../resources/local_diffusion.py");

fn probe_script() -> String {
    let modules = REQUIRED_MODULES
        .iter()
        .map(|module| format!("'{module}'"))
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "import importlib.util, json\n\
missing = [m for m in ({modules},) if importlib.util.find_spec(m) is None]\n\
print(json.dumps({{'missing': missing}}))\n"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCapability {
    Available { runtime: String },
    Unavailable { missing: Vec<String>, install_hint: String },
}

impl LocalCapability {
    pub fn unavailable(missing: &[&str]) -> Self {
        LocalCapability::Unavailable {
            missing: missing.iter().map(|item| (*item).to_string()).collect(),
            install_hint: LOCAL_INSTALL_HINT.to_string(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, LocalCapability::Available { .. })
    }

    pub fn to_value(&self) -> Value {
        match self {
            LocalCapability::Available { runtime } => {
                json!({ "available": true, "runtime": runtime })
            }
            LocalCapability::Unavailable {
                missing,
                install_hint,
            } => json!({
                "available": false,
                "missing": missing,
                "install_hint": install_hint,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalOptions {
    pub num_images: u32,
    pub seed: Option<u64>,
    pub model_name: Option<String>,
    pub steps: u32,
    pub guidance_scale: f64,
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self {
            num_images: 1,
            seed: None,
            model_name: None,
            steps: 25,
            guidance_scale: 7.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffusionMode {
    TextToImage,
    Inpaint,
}

impl DiffusionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffusionMode::TextToImage => "text_to_image",
            DiffusionMode::Inpaint => "inpaint",
        }
    }

    fn feature(self) -> &'static str {
        match self {
            DiffusionMode::TextToImage => "local diffusion",
            DiffusionMode::Inpaint => "local inpainting",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            DiffusionMode::TextToImage => DEFAULT_TEXT_TO_IMAGE_MODEL,
            DiffusionMode::Inpaint => DEFAULT_INPAINT_MODEL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiffusionJob {
    pub mode: DiffusionMode,
    pub prompt: String,
    pub model_name: String,
    pub num_images: u32,
    pub seed: Option<u64>,
    pub steps: u32,
    pub guidance_scale: f64,
    pub image_png: Option<Vec<u8>>,
    pub mask_png: Option<Vec<u8>>,
}

impl DiffusionJob {
    fn new(mode: DiffusionMode, prompt: &str, options: &LocalOptions) -> Self {
        Self {
            mode,
            prompt: prompt.to_string(),
            model_name: options
                .model_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(mode.default_model())
                .to_string(),
            num_images: options.num_images.max(1),
            seed: options.seed,
            steps: options.steps.max(1),
            guidance_scale: options.guidance_scale,
            image_png: None,
            mask_png: None,
        }
    }

    pub fn to_payload(&self) -> Value {
        json!({
            "mode": self.mode.as_str(),
            "prompt": self.prompt,
            "model_name": self.model_name,
            "num_images": self.num_images,
            "seed": self.seed,
            "steps": self.steps,
            "guidance_scale": self.guidance_scale,
            "image_png": self.image_png.as_ref().map(|bytes| BASE64.encode(bytes)),
            "mask_png": self.mask_png.as_ref().map(|bytes| BASE64.encode(bytes)),
        })
    }
}

pub trait DiffusionRuntime: Send + Sync {
    fn name(&self) -> &str;
    fn probe(&self) -> LocalCapability;
    fn run(&self, job: &DiffusionJob) -> Result<Vec<Vec<u8>>>;
}

pub struct PythonDiffusers {
    python: String,
}

impl PythonDiffusers {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl DiffusionRuntime for PythonDiffusers {
    fn name(&self) -> &str {
        "python-diffusers"
    }

    fn probe(&self) -> LocalCapability {
        let output = match Command::new(&self.python).arg("-c").arg(probe_script()).output() {
            Ok(output) => output,
            Err(err) => {
                tracing::debug!(python = %self.python, error = %err, "python interpreter not runnable");
                let mut missing = vec![self.python.as_str()];
                missing.extend_from_slice(REQUIRED_MODULES);
                return LocalCapability::unavailable(&missing);
            }
        };
        if !output.status.success() {
            return LocalCapability::unavailable(REQUIRED_MODULES);
        }
        let missing = serde_json::from_slice::<Value>(&output.stdout)
            .ok()
            .and_then(|payload| payload.get("missing").and_then(Value::as_array).cloned())
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            });
        match missing {
            Some(missing) if missing.is_empty() => LocalCapability::Available {
                runtime: self.name().to_string(),
            },
            Some(missing) => LocalCapability::Unavailable {
                missing,
                install_hint: LOCAL_INSTALL_HINT.to_string(),
            },
            None => LocalCapability::unavailable(REQUIRED_MODULES),
        }
    }

    fn run(&self, job: &DiffusionJob) -> Result<Vec<Vec<u8>>> {
        let mut child = Command::new(&self.python)
            .arg("-c")
            .arg(DRIVER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => BriaError::LocalRuntime(format!(
                    "python interpreter '{}' not found",
                    self.python
                )),
                _ => BriaError::Io(err),
            })?;

        let payload = serde_json::to_vec(&job.to_payload())?;
        // A driver that dies on import closes stdin early; its stderr says why.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&payload),
            None => Ok(()),
        };
        let output = child.wait_with_output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(BriaError::LocalRuntime(format!(
                "{} exited with {}: {}",
                self.name(),
                output.status,
                truncate_text(stderr.trim(), 512)
            )));
        }
        match written {
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                return Err(BriaError::LocalRuntime(format!(
                    "{} stopped reading the job: {}",
                    self.name(),
                    truncate_text(stderr.trim(), 512)
                )));
            }
            Err(err) => return Err(BriaError::Io(err)),
            Ok(()) => {}
        }

        let parsed: Value = serde_json::from_slice(&output.stdout)?;
        let rows = parsed
            .get("images")
            .and_then(Value::as_array)
            .ok_or_else(|| BriaError::LocalRuntime("driver output missing 'images'".to_string()))?;
        rows.iter()
            .filter_map(Value::as_str)
            .map(|encoded| {
                BASE64.decode(encoded.as_bytes()).map_err(|err| {
                    BriaError::LocalRuntime(format!("driver returned invalid base64: {err}"))
                })
            })
            .collect()
    }
}

pub struct LocalDiffusion {
    runtime: Box<dyn DiffusionRuntime>,
    capability: LocalCapability,
}

impl LocalDiffusion {
    pub fn detect<R: DiffusionRuntime + 'static>(runtime: R) -> Self {
        let capability = runtime.probe();
        match &capability {
            LocalCapability::Available { runtime } => {
                tracing::info!(runtime = %runtime, "local diffusion available")
            }
            LocalCapability::Unavailable { missing, .. } => {
                tracing::info!(missing = ?missing, "local diffusion unavailable")
            }
        }
        Self {
            runtime: Box::new(runtime),
            capability,
        }
    }

    pub fn from_config(config: &BriaConfig) -> Self {
        Self::detect(PythonDiffusers::new(config.python.clone()))
    }

    pub fn capability(&self) -> &LocalCapability {
        &self.capability
    }

    pub fn generate_hd_local(
        &self,
        prompt: &str,
        options: &LocalOptions,
    ) -> Result<NormalizedResult> {
        self.ensure_available(DiffusionMode::TextToImage)?;
        let job = DiffusionJob::new(DiffusionMode::TextToImage, prompt, options);
        self.execute(&job)
    }

    pub fn inpaint_local(
        &self,
        image: &[u8],
        mask: &[u8],
        prompt: &str,
        options: &LocalOptions,
    ) -> Result<NormalizedResult> {
        self.ensure_available(DiffusionMode::Inpaint)?;
        let mut job = DiffusionJob::new(DiffusionMode::Inpaint, prompt, options);
        job.image_png = Some(rgb_png(image, "image")?);
        job.mask_png = Some(rgb_png(mask, "mask")?);
        self.execute(&job)
    }

    fn ensure_available(&self, mode: DiffusionMode) -> Result<()> {
        match &self.capability {
            LocalCapability::Available { .. } => Ok(()),
            LocalCapability::Unavailable {
                missing,
                install_hint,
            } => Err(BriaError::Unavailable {
                feature: mode.feature().to_string(),
                missing: missing.join(", "),
                install_hint: install_hint.clone(),
            }),
        }
    }

    fn execute(&self, job: &DiffusionJob) -> Result<NormalizedResult> {
        tracing::debug!(
            runtime = self.runtime.name(),
            mode = job.mode.as_str(),
            model = %job.model_name,
            num_images = job.num_images,
            "running local diffusion"
        );
        let images = self.runtime.run(job)?;
        let urls = images
            .iter()
            .map(|png| bytes_to_data_uri(png, "image/png"))
            .collect::<Vec<String>>();
        NormalizedResult::new(urls).ok_or_else(|| {
            BriaError::LocalRuntime(format!("{} produced no images", self.runtime.name()))
        })
    }
}

fn rgb_png(bytes: &[u8], label: &str) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| BriaError::Image(format!("could not decode inpaint {label}: {err}")))?;
    encode_png(&DynamicImage::ImageRgb8(decoded.to_rgb8()))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use bria_contracts::{BriaError, Locator};
    use image::{DynamicImage, RgbImage, RgbaImage};

    use super::{
        DiffusionJob, DiffusionMode, DiffusionRuntime, LocalCapability, LocalDiffusion,
        LocalOptions, PythonDiffusers, DEFAULT_INPAINT_MODEL, DEFAULT_TEXT_TO_IMAGE_MODEL,
    };
    use crate::background::encode_png;

    struct FakeRuntime {
        capability: LocalCapability,
        jobs: Arc<Mutex<Vec<DiffusionJob>>>,
    }

    impl FakeRuntime {
        fn available() -> (Self, Arc<Mutex<Vec<DiffusionJob>>>) {
            let jobs = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    capability: LocalCapability::Available {
                        runtime: "fake".to_string(),
                    },
                    jobs: jobs.clone(),
                },
                jobs,
            )
        }

        fn missing() -> Self {
            Self {
                capability: LocalCapability::unavailable(&["torch", "diffusers"]),
                jobs: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl DiffusionRuntime for FakeRuntime {
        fn name(&self) -> &str {
            "fake"
        }

        fn probe(&self) -> LocalCapability {
            self.capability.clone()
        }

        fn run(&self, job: &DiffusionJob) -> bria_contracts::Result<Vec<Vec<u8>>> {
            if let Ok(mut jobs) = self.jobs.lock() {
                jobs.push(job.clone());
            }
            Ok((0..job.num_images).map(|idx| vec![idx as u8; 3]).collect())
        }
    }

    #[cfg(unix)]
    fn fake_python(dir: &Path, body: &str) -> anyhow::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("python");
        std::fs::write(&path, format!("#!/bin/sh\n{body}"))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    fn noise_png(side: u32) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        let image = RgbImage::from_fn(side, side, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let [r, g, b, _] = state.to_le_bytes();
            image::Rgb([r, g, b])
        });
        encode_png(&DynamicImage::ImageRgb8(image)).unwrap_or_default()
    }

    fn rgba_png() -> Vec<u8> {
        encode_png(&DynamicImage::ImageRgba8(RgbaImage::new(4, 4))).unwrap_or_default()
    }

    #[test]
    fn missing_dependencies_are_reported_for_both_modes() {
        let local = LocalDiffusion::detect(FakeRuntime::missing());
        assert!(!local.capability().is_available());

        let err = local
            .generate_hd_local("prompt", &LocalOptions::default())
            .err()
            .expect("unavailable runtime must fail");
        assert!(matches!(err, BriaError::Unavailable { .. }));
        let text = err.to_string();
        assert!(text.contains("diffusers") && text.contains("torch"));
        assert!(text.contains("pip install"));

        let err = local
            .inpaint_local(b"0", b"0", "prompt", &LocalOptions::default())
            .err()
            .expect("unavailable runtime must fail before decoding inputs");
        assert!(err.to_string().starts_with("local inpainting is unavailable"));
    }

    #[test]
    fn generated_images_become_png_data_uris() -> anyhow::Result<()> {
        let (runtime, jobs) = FakeRuntime::available();
        let local = LocalDiffusion::detect(runtime);
        let options = LocalOptions {
            num_images: 2,
            seed: Some(11),
            ..LocalOptions::default()
        };
        let result = local.generate_hd_local("a fox", &options)?;
        assert_eq!(result.len(), 2);
        assert!(result
            .urls()
            .iter()
            .all(|url| url.starts_with("data:image/png;base64,")));
        assert_eq!(Locator::parse(&result.urls()[1]).decode(), Some(vec![1, 1, 1]));

        let jobs = jobs.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].mode, DiffusionMode::TextToImage);
        assert_eq!(jobs[0].model_name, DEFAULT_TEXT_TO_IMAGE_MODEL);
        assert_eq!(jobs[0].seed, Some(11));
        assert_eq!(jobs[0].steps, 25);
        Ok(())
    }

    #[test]
    fn inpaint_reencodes_inputs_as_rgb_png() -> anyhow::Result<()> {
        let (runtime, jobs) = FakeRuntime::available();
        let local = LocalDiffusion::detect(runtime);
        let png = rgba_png();
        let result = local.inpaint_local(&png, &png, "fill", &LocalOptions::default())?;
        assert_eq!(result.len(), 1);

        let jobs = jobs.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(jobs[0].model_name, DEFAULT_INPAINT_MODEL);
        let image = jobs[0].image_png.as_deref().expect("image bytes");
        assert_eq!(image::load_from_memory(image)?.color(), image::ColorType::Rgb8);
        let payload = jobs[0].to_payload();
        assert_eq!(payload["mode"], "inpaint");
        assert!(payload["mask_png"].is_string());
        Ok(())
    }

    #[test]
    fn undecodable_inpaint_input_fails_when_available() {
        let (runtime, _) = FakeRuntime::available();
        let local = LocalDiffusion::detect(runtime);
        let err = local
            .inpaint_local(b"0", b"0", "fill", &LocalOptions::default())
            .err();
        assert!(matches!(err, Some(BriaError::Image(_))));
    }

    #[test]
    fn python_probe_without_interpreter_is_unavailable() {
        let runtime = PythonDiffusers::new("/nonexistent/python-for-bria-tests");
        match runtime.probe() {
            LocalCapability::Unavailable { missing, .. } => {
                assert!(missing.iter().any(|item| item == "diffusers"));
            }
            other => panic!("unexpected capability {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn probe_checks_every_driver_import() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let python = fake_python(
            temp.path(),
            r#"case "$2" in
  *"'PIL'"*) echo '{"missing": ["PIL"]}' ;;
  *) echo '{"missing": []}' ;;
esac
"#,
        )?;
        let local = LocalDiffusion::detect(PythonDiffusers::new(python.display().to_string()));
        let err = local
            .generate_hd_local("prompt", &LocalOptions::default())
            .err()
            .expect("pillow is missing");
        let text = err.to_string();
        assert!(text.contains("missing PIL"), "{text}");
        assert!(text.contains("pillow"), "{text}");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn driver_import_failure_surfaces_stderr_for_large_jobs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let python = fake_python(
            temp.path(),
            r#"case "$2" in
  *find_spec*) echo '{"missing": []}' ;;
  *) echo "ModuleNotFoundError: No module named 'PIL'" >&2; exit 1 ;;
esac
"#,
        )?;
        let local = LocalDiffusion::detect(PythonDiffusers::new(python.display().to_string()));
        assert!(local.capability().is_available());

        let png = noise_png(512);
        let err = local
            .inpaint_local(&png, &png, "fill", &LocalOptions::default())
            .err()
            .expect("driver exits before reading the job");
        match err {
            BriaError::LocalRuntime(message) => {
                assert!(message.contains("No module named 'PIL'"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        Ok(())
    }
}
