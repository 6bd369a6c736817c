use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RenderError;

/// One of the four assessment states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateKey {
    C,
    T,
    R,
    L,
}

impl StateKey {
    pub const ALL: [StateKey; 4] = [StateKey::C, StateKey::T, StateKey::R, StateKey::L];

    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::C => "C",
            StateKey::T => "T",
            StateKey::R => "R",
            StateKey::L => "L",
        }
    }

    pub fn from_char(ch: char) -> Option<Self> {
        match ch.to_ascii_uppercase() {
            'C' => Some(StateKey::C),
            'T' => Some(StateKey::T),
            'R' => Some(StateKey::R),
            'L' => Some(StateKey::L),
            _ => None,
        }
    }

    /// Reads a key from loose payload text: the first non-space character
    /// decides, so `"t"`, `"T"` and `" T "` are all `T`.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        raw.trim().chars().next().and_then(Self::from_char)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dominant + second state, naming one of the 12 template variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Combo {
    pub dom: StateKey,
    pub second: StateKey,
}

impl Combo {
    /// `None` unless both keys are present and distinct.
    pub fn new(dom: Option<StateKey>, second: Option<StateKey>) -> Option<Self> {
        match (dom, second) {
            (Some(dom), Some(second)) if dom != second => Some(Self { dom, second }),
            _ => None,
        }
    }

    /// Every valid combination, dominant-major.
    pub fn all() -> impl Iterator<Item = Combo> {
        StateKey::ALL.into_iter().flat_map(|dom| {
            StateKey::ALL
                .into_iter()
                .filter_map(move |second| Combo::new(Some(dom), Some(second)))
        })
    }
}

impl fmt::Display for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dom, self.second)
    }
}

impl FromStr for Combo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        let (Some(a), Some(b), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(format!("combination must be two letters, got {s:?}"));
        };
        Combo::new(StateKey::from_char(a), StateKey::from_char(b))
            .ok_or_else(|| format!("{s:?} is not a valid combination of C, T, R, L"))
    }
}

/// Picks the template combination, falling back to `default` when either key
/// is missing or both are the same.
pub fn select_combo(dom: Option<StateKey>, second: Option<StateKey>, default: Combo) -> Combo {
    match Combo::new(dom, second) {
        Some(combo) => combo,
        None => {
            debug!(?dom, ?second, %default, "incomplete combination, using default");
            default
        }
    }
}

pub fn template_file_name(prefix: &str, combo: Combo) -> String {
    format!("{prefix}_{combo}.pdf")
}

/// First directory in `dirs` that holds `file_name`.
pub fn locate(dirs: &[PathBuf], file_name: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// Reads `file_name` from the first search directory that has it.
pub async fn read_asset(dirs: &[PathBuf], file_name: &str) -> Result<(PathBuf, Vec<u8>), RenderError> {
    let path = locate(dirs, file_name).ok_or_else(|| RenderError::AssetNotFound {
        name: file_name.to_string(),
        searched: dirs.iter().map(|d| d.display().to_string()).collect(),
    })?;
    let bytes = tokio::fs::read(&path).await?;
    info!("📄 Loaded {} ({} bytes)", path.display(), bytes.len());
    Ok((path, bytes))
}

/// Reads a configured asset path. Absolute paths (or relative ones that
/// exist) are read directly; otherwise the file name is searched in `dirs`.
pub async fn read_configured(path: &Path, dirs: &[PathBuf]) -> Result<Vec<u8>, RenderError> {
    if path.is_file() {
        return Ok(tokio::fs::read(path).await?);
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    read_asset(dirs, &file_name).await.map(|(_, bytes)| bytes)
}
