//! Render job files
//!
//! ```yaml
//! tail_secs: 2.0
//! session:
//!   channels:
//!     - name: vocals
//!       effects:
//!         - kind: Reverb
//!           params: { mode: 1.0 }
//! sources:
//!   - tag: vocals
//!     path: vocals.wav
//! impulse_responses:
//!   - channel: vocals
//!     effect: 0
//!     path: hall.wav
//! ```
//!
//! Relative paths are resolved against the job file's directory.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use mixbus_core::config::load_yaml;
use mixbus_core::SessionSnapshot;

/// One input file, fed to every channel whose input bus is `tag`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub tag: String,
    pub path: PathBuf,
}

/// Impulse response for the reverb at `effect` on `channel` (`"master"` allowed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpulseSpec {
    pub channel: String,
    pub effect: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderJob {
    pub session: SessionSnapshot,
    pub sources: Vec<SourceSpec>,
    pub impulse_responses: Vec<ImpulseSpec>,
    /// Extra seconds rendered after the longest source ends
    pub tail_secs: f32,
}

impl RenderJob {
    /// Load a job and make its paths absolute
    pub fn load(path: &Path) -> Result<Self> {
        let mut job: RenderJob = load_yaml(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        job.resolve_paths(base);
        Ok(job)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.sources.iter_mut().for_each(|s| resolve(&mut s.path));
        self.impulse_responses.iter_mut().for_each(|i| resolve(&mut i.path));
    }

    /// Channel count of the channels reading `tag`, if any reads it
    ///
    /// `output_channels` stands in for channels that follow the output format.
    pub fn input_width(&self, tag: &str, output_channels: usize) -> Option<usize> {
        self.session
            .channels
            .iter()
            .find(|c| c.input_bus.as_deref().unwrap_or(&c.name) == tag)
            .map(|c| c.channels.unwrap_or(output_channels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yaml");
        std::fs::write(
            &path,
            "
session:
  channels:
    - name: vox
      input_bus: mic
      channels: 1
    - name: pad
sources:
  - tag: mic
    path: takes/vox.wav
  - tag: pad
    path: /abs/pad.wav
",
        )
        .unwrap();

        let job = RenderJob::load(&path).unwrap();
        assert_eq!(job.sources[0].path, dir.path().join("takes/vox.wav"));
        assert_eq!(job.sources[1].path, PathBuf::from("/abs/pad.wav"));
        assert_eq!(job.tail_secs, 0.0);
        assert!(job.impulse_responses.is_empty());

        assert_eq!(job.input_width("mic", 2), Some(1));
        assert_eq!(job.input_width("pad", 2), Some(2));
        assert_eq!(job.input_width("vox", 2), None, "vox reads 'mic', not its own name");
    }

    #[test]
    fn test_missing_job_is_an_error() {
        assert!(RenderJob::load(Path::new("/nonexistent/job.yaml")).is_err());
    }
}
