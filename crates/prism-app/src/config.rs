// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use prism_render::{PresentPolicy, RenderSettings, RenderSize, ViewportSettings, ViewportSync};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub viewport: ViewportCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub present_mode: PresentModeCfg,
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default = "default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,
    /// Unset: on in debug builds.
    #[serde(default)]
    pub validation: Option<bool>,
    #[serde(default = "default_true")]
    pub prefer_discrete: bool,
    #[serde(default)]
    pub required_shaders: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
    Uncapped,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViewportSyncCfg {
    #[default]
    Inline,
    Separate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewportCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_viewport_width")]
    pub width: u32,
    #[serde(default = "default_viewport_height")]
    pub height: u32,
    #[serde(default = "default_tolerance")]
    pub tolerance: u32,
    #[serde(default)]
    pub sync: ViewportSyncCfg,
    #[serde(default = "default_true")]
    pub fenced: bool,
    #[serde(default = "default_viewport_clear")]
    pub clear_color: [f32; 4],
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::Mailbox,
            frames_in_flight: default_frames_in_flight(),
            handoff_timeout_ms: default_handoff_timeout_ms(),
            validation: None,
            prefer_discrete: true,
            required_shaders: Vec::new(),
        }
    }
}

impl Default for ViewportCfg {
    fn default() -> Self {
        ViewportCfg {
            enabled: true,
            width: default_viewport_width(),
            height: default_viewport_height(),
            tolerance: default_tolerance(),
            sync: ViewportSyncCfg::Inline,
            fenced: true,
            clear_color: default_viewport_clear(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_viewport_clear() -> [f32; 4] {
    [0.10, 0.10, 0.12, 1.0]
}
fn default_true() -> bool {
    true
}
fn default_frames_in_flight() -> usize {
    2
}
fn default_handoff_timeout_ms() -> u64 {
    1000
}
fn default_viewport_width() -> u32 {
    800
}
fn default_viewport_height() -> u32 {
    600
}
fn default_tolerance() -> u32 {
    8
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_settings(&self) -> RenderSettings {
        let r = &self.render;
        let v = &self.viewport;
        if r.frames_in_flight == 0 {
            warn!("frames_in_flight = 0 is invalid, using 1");
        }
        RenderSettings {
            clear_color: r.clear_color,
            present_policy: match r.present_mode {
                PresentModeCfg::Mailbox => PresentPolicy::Mailbox,
                PresentModeCfg::Fifo => PresentPolicy::Fifo,
                PresentModeCfg::Uncapped => PresentPolicy::Uncapped,
            },
            frames_in_flight: r.frames_in_flight.max(1),
            handoff_timeout: Duration::from_millis(r.handoff_timeout_ms),
            validation: r.validation.unwrap_or(cfg!(debug_assertions)),
            prefer_discrete: r.prefer_discrete,
            required_shaders: r.required_shaders.clone(),
            viewport: ViewportSettings {
                enabled: v.enabled,
                size: RenderSize::new(v.width, v.height),
                tolerance: v.tolerance,
                clear_color: v.clear_color,
                sync: match v.sync {
                    ViewportSyncCfg::Inline => ViewportSync::Inline,
                    ViewportSyncCfg::Separate => ViewportSync::Separate { fenced: v.fenced },
                },
            },
        }
    }
}

/// A missing file means defaults; a malformed one is an error.
pub fn load_cfg(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(s) => AppCfg::parse(&s).with_context(|| format!("parsing {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("{} not found, using defaults", path.display());
            Ok(AppCfg::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let s = AppCfg::parse("").unwrap().to_settings();
        assert_eq!(s.present_policy, PresentPolicy::Mailbox);
        assert_eq!(s.frames_in_flight, 2);
        assert_eq!(s.handoff_timeout, Duration::from_secs(1));
        assert_eq!(s.viewport.size, RenderSize::new(800, 600));
        assert_eq!(s.viewport.tolerance, 8);
        assert_eq!(s.viewport.sync, ViewportSync::Inline);
    }

    #[test]
    fn sections_override_fields() {
        let cfg = AppCfg::parse(
            r#"
            [render]
            present_mode = "uncapped"
            frames_in_flight = 3
            handoff_timeout_ms = 250
            validation = false
            required_shaders = ["ui.vert", "ui.frag"]

            [viewport]
            width = 1024
            height = 768
            sync = "separate"
            fenced = false
            "#,
        )
        .unwrap();
        let s = cfg.to_settings();
        assert_eq!(s.present_policy, PresentPolicy::Uncapped);
        assert_eq!(s.frames_in_flight, 3);
        assert_eq!(s.handoff_timeout, Duration::from_millis(250));
        assert!(!s.validation);
        assert_eq!(s.required_shaders, vec!["ui.vert", "ui.frag"]);
        assert_eq!(s.viewport.size, RenderSize::new(1024, 768));
        assert_eq!(s.viewport.sync, ViewportSync::Separate { fenced: false });
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let cfg = AppCfg::parse("[render]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(cfg.to_settings().frames_in_flight, 1);
    }

    #[test]
    fn unknown_present_mode_is_rejected() {
        assert!(AppCfg::parse("[render]\npresent_mode = \"vsync\"\n").is_err());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let cfg = load_cfg(Path::new("definitely/not/here/prism.toml")).unwrap();
        assert!(cfg.viewport.enabled);
    }
}
