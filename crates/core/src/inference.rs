//! The parameter record handed to the lip-sync engine.
//!
//! [`InferenceRequest`] enumerates every engine tunable. Only the four paths
//! vary between requests; everything else is pinned to the deployment
//! defaults below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Deployment defaults
// ---------------------------------------------------------------------------

/// Default checkpoint location, relative to the working directory.
pub const DEFAULT_CHECKPOINT_PATH: &str = "checkpoints/wav2lip.pth";

/// Output frame rate. Only consulted by the engine for video face inputs.
pub const DEFAULT_FPS: u32 = 25;

/// Face crop padding: top, bottom, left, right.
pub const DEFAULT_PADS: [i32; 4] = [0, 20, 0, 0];

pub const DEFAULT_FACE_DET_BATCH_SIZE: u32 = 16;
pub const DEFAULT_ENGINE_BATCH_SIZE: u32 = 128;
pub const DEFAULT_RESIZE_FACTOR: u32 = 1;

/// Crop rectangle (top, bottom, left, right); `-1` extends to the edge.
pub const AUTO_CROP: [i32; 4] = [0, -1, 0, -1];

/// Fixed face box (top, bottom, left, right); all `-1` means auto-detect.
pub const AUTO_BOX: [i32; 4] = [-1, -1, -1, -1];

/// Mouth-region resolution the generator network expects.
pub const ENGINE_IMG_SIZE: u32 = 96;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Complete argument record for one engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub checkpoint_path: PathBuf,
    pub face_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    /// The face input is a single still image rather than a video.
    #[serde(rename = "static")]
    pub static_image: bool,
    pub fps: u32,
    pub pads: [i32; 4],
    pub face_det_batch_size: u32,
    pub engine_batch_size: u32,
    pub resize_factor: u32,
    pub crop: [i32; 4],
    #[serde(rename = "box")]
    pub bounding_box: [i32; 4],
    pub rotate: bool,
    pub no_smooth: bool,
    pub no_resize: bool,
    pub img_size: u32,
}

impl InferenceRequest {
    /// Assemble a request from staged paths, filling in every default.
    ///
    /// Pure: no filesystem access, no validation of the paths.
    pub fn build(
        face_path: impl Into<PathBuf>,
        audio_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            face_path: face_path.into(),
            audio_path: audio_path.into(),
            output_path: output_path.into(),
            static_image: true,
            fps: DEFAULT_FPS,
            pads: DEFAULT_PADS,
            face_det_batch_size: DEFAULT_FACE_DET_BATCH_SIZE,
            engine_batch_size: DEFAULT_ENGINE_BATCH_SIZE,
            resize_factor: DEFAULT_RESIZE_FACTOR,
            crop: AUTO_CROP,
            bounding_box: AUTO_BOX,
            rotate: false,
            no_smooth: false,
            no_resize: false,
            img_size: ENGINE_IMG_SIZE,
        }
    }

    /// Render the record as engine command-line arguments.
    ///
    /// Boolean switches (`--rotate`, `--nosmooth`, `--noresize`) appear only
    /// when set; `--static` always carries an explicit value.
    pub fn to_engine_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(40);

        push_path(&mut args, "--checkpoint_path", &self.checkpoint_path);
        push_path(&mut args, "--face", &self.face_path);
        push_path(&mut args, "--audio", &self.audio_path);
        push_path(&mut args, "--outfile", &self.output_path);

        args.push("--static".into());
        args.push(if self.static_image { "True" } else { "False" }.into());

        args.push("--fps".into());
        args.push(self.fps.to_string());

        push_quad(&mut args, "--pads", &self.pads);

        args.push("--face_det_batch_size".into());
        args.push(self.face_det_batch_size.to_string());
        args.push("--wav2lip_batch_size".into());
        args.push(self.engine_batch_size.to_string());
        args.push("--resize_factor".into());
        args.push(self.resize_factor.to_string());

        push_quad(&mut args, "--crop", &self.crop);
        push_quad(&mut args, "--box", &self.bounding_box);

        args.push("--img_size".into());
        args.push(self.img_size.to_string());

        if self.rotate {
            args.push("--rotate".into());
        }
        if self.no_smooth {
            args.push("--nosmooth".into());
        }
        if self.no_resize {
            args.push("--noresize".into());
        }

        args
    }
}

fn push_path(args: &mut Vec<String>, flag: &str, path: &Path) {
    args.push(flag.to_string());
    args.push(path.to_string_lossy().into_owned());
}

fn push_quad(args: &mut Vec<String>, flag: &str, values: &[i32; 4]) {
    args.push(flag.to_string());
    args.extend(values.iter().map(i32::to_string));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
