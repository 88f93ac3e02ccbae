//! `stub://` locator parsing shared by the synthetic source and sink.
//!
//! Format: `stub://<name>?frames=N&width=W&height=H&fps=F`. Every parameter is
//! optional; unknown keys are rejected so typos do not silently fall back.

use anyhow::{anyhow, Result};

pub(crate) const STUB_SCHEME: &str = "stub://";

const DEFAULT_FRAMES: u64 = 90;
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_FPS: f64 = 30.0;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StubLocator {
    pub name: String,
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

pub(crate) fn is_stub(path: &str) -> bool {
    path.starts_with(STUB_SCHEME)
}

pub(crate) fn parse_stub(path: &str) -> Result<StubLocator> {
    let rest = path
        .strip_prefix(STUB_SCHEME)
        .ok_or_else(|| anyhow!("'{}' is not a stub:// locator", path))?;
    let mut parts = rest.splitn(2, '?');
    let name = parts.next().unwrap_or("");
    if name.is_empty() {
        return Err(anyhow!("stub locator '{}' has no name", path));
    }

    let mut locator = StubLocator {
        name: name.to_string(),
        frames: DEFAULT_FRAMES,
        width: DEFAULT_WIDTH,
        height: DEFAULT_HEIGHT,
        fps: DEFAULT_FPS,
    };

    if let Some(query) = parts.next() {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub parameter '{}' is missing a value", pair))?;
            match key {
                "frames" => locator.frames = parse_value(key, value)?,
                "width" => locator.width = parse_value(key, value)?,
                "height" => locator.height = parse_value(key, value)?,
                "fps" => locator.fps = parse_value(key, value)?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
    }

    if locator.width == 0 || locator.height == 0 {
        return Err(anyhow!("stub dimensions must be non-zero"));
    }
    if !(locator.fps > 0.0) {
        return Err(anyhow!("stub fps must be > 0"));
    }
    Ok(locator)
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid value '{}' for stub parameter '{}'", value, key))
}
