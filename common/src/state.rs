use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Cosmetic filter applied to every captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterKind {
    /// Unmodified frame
    #[default]
    None,
    /// RGB channel split with shifted horizontal bands
    Glitch,
    /// Glowing colour-cycled edges over a dark base
    Neon,
    /// Soft blur glow with a warm tint
    Dreamy,
    /// Faded warm film look with vignette and grain
    Retro,
    /// High contrast black and white
    Noir,
    /// Flat posterized colour with ink outlines
    Cartoon,
    /// Sepia with grain
    Vintage,
    /// Plain grayscale
    Bw,
    /// White instant-film border
    Polaroid,
}

/// Solid border added around a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Border {
    pub color: [u8; 3],
    /// Fraction of the width used on the top, left and right edges.
    pub side: f32,
    /// Fraction of the height used on the bottom edge.
    pub bottom: f32,
}

impl FilterKind {
    pub const ALL: [FilterKind; 10] = [
        FilterKind::None,
        FilterKind::Glitch,
        FilterKind::Neon,
        FilterKind::Dreamy,
        FilterKind::Retro,
        FilterKind::Noir,
        FilterKind::Cartoon,
        FilterKind::Vintage,
        FilterKind::Bw,
        FilterKind::Polaroid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterKind::None => "NONE",
            FilterKind::Glitch => "GLITCH",
            FilterKind::Neon => "NEON",
            FilterKind::Dreamy => "DREAMY",
            FilterKind::Retro => "RETRO",
            FilterKind::Noir => "NOIR",
            FilterKind::Cartoon => "CARTOON",
            FilterKind::Vintage => "VINTAGE",
            FilterKind::Bw => "BW",
            FilterKind::Polaroid => "POLAROID",
        }
    }

    /// Strict, case-insensitive lookup. `NORMAL` and `COLOR` are accepted
    /// as aliases of `NONE` and `SEPIA` of `VINTAGE`; anything else unknown
    /// is rejected.
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.as_str() {
            "NORMAL" | "COLOR" => return Some(FilterKind::None),
            "SEPIA" => return Some(FilterKind::Vintage),
            _ => {}
        }
        Self::ALL.into_iter().find(|f| f.as_str() == upper)
    }

    /// Total lookup: empty or unknown names resolve to `NONE`.
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or_default()
    }

    /// Output has identical R, G and B channels.
    pub fn is_monochrome(self) -> bool {
        matches!(self, FilterKind::Noir | FilterKind::Bw)
    }

    pub fn border(self) -> Option<Border> {
        match self {
            FilterKind::Polaroid => Some(Border {
                color: [255, 255, 255],
                side: 0.05,
                bottom: 0.25,
            }),
            _ => None,
        }
    }

    /// Output pixels depend on a random source.
    pub fn has_grain(self) -> bool {
        matches!(self, FilterKind::Retro | FilterKind::Vintage)
    }

    fn index(self) -> u8 {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0) as u8
    }

    fn from_index(i: u8) -> Self {
        Self::ALL.get(i as usize).copied().unwrap_or_default()
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many frames a trigger captures and how they are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaptureMode {
    #[default]
    Single,
    Burst,
    Gif,
}

impl CaptureMode {
    pub const ALL: [CaptureMode; 3] = [CaptureMode::Single, CaptureMode::Burst, CaptureMode::Gif];

    pub fn as_str(self) -> &'static str {
        match self {
            CaptureMode::Single => "SINGLE",
            CaptureMode::Burst => "BURST",
            CaptureMode::Gif => "GIF",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|m| m.as_str() == upper)
    }

    /// Unknown names resolve to `SINGLE`.
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or_default()
    }

    fn index(self) -> u8 {
        match self {
            CaptureMode::Single => 0,
            CaptureMode::Burst => 1,
            CaptureMode::Gif => 2,
        }
    }

    fn from_index(i: u8) -> Self {
        Self::ALL.get(i as usize).copied().unwrap_or_default()
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name did not match any known filter or mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} {name:?}")]
pub struct UnknownName {
    pub kind: &'static str,
    pub name: String,
}

/// Filter and mode shared between the controller loop, the gallery
/// handlers, the keyboard reader and the realtime listener.
///
/// Each field is a single atomic so writers never block the capture loop.
/// Readers take a [`BoothState::snapshot`] once per cycle.
#[derive(Debug, Default)]
pub struct BoothState {
    filter: AtomicU8,
    mode: AtomicU8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub filter: FilterKind,
    pub mode: CaptureMode,
}

impl BoothState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> FilterKind {
        FilterKind::from_index(self.filter.load(Ordering::Acquire))
    }

    pub fn mode(&self) -> CaptureMode {
        CaptureMode::from_index(self.mode.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            filter: self.filter(),
            mode: self.mode(),
        }
    }

    pub fn set_filter(&self, filter: FilterKind) {
        self.filter.store(filter.index(), Ordering::Release);
        tracing::info!(%filter, "filter changed");
    }

    pub fn set_mode(&self, mode: CaptureMode) {
        self.mode.store(mode.index(), Ordering::Release);
        tracing::info!(%mode, "capture mode changed");
    }

    /// Set the filter from untrusted input, leaving state unchanged on
    /// unknown names.
    pub fn set_filter_named(&self, name: &str) -> Result<FilterKind, UnknownName> {
        let filter = FilterKind::parse(name).ok_or_else(|| UnknownName {
            kind: "filter",
            name: name.to_string(),
        })?;
        self.set_filter(filter);
        Ok(filter)
    }

    pub fn set_mode_named(&self, name: &str) -> Result<CaptureMode, UnknownName> {
        let mode = CaptureMode::parse(name).ok_or_else(|| UnknownName {
            kind: "mode",
            name: name.to_string(),
        })?;
        self.set_mode(mode);
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn total_resolution_falls_back_to_defaults() {
        assert_eq!(FilterKind::from_name("neon"), FilterKind::Neon);
        assert_eq!(FilterKind::from_name(" Noir "), FilterKind::Noir);
        assert_eq!(FilterKind::from_name("NORMAL"), FilterKind::None);
        assert_eq!(FilterKind::from_name("COLOR"), FilterKind::None);
        assert_eq!(FilterKind::from_name(""), FilterKind::None);
        assert_eq!(FilterKind::from_name("sparkle"), FilterKind::None);
        assert_eq!(CaptureMode::from_name("gif"), CaptureMode::Gif);
        assert_eq!(CaptureMode::from_name("video"), CaptureMode::Single);
    }

    #[test]
    fn strict_resolution_rejects_unknown() {
        assert_eq!(FilterKind::parse("sparkle"), None);
        assert_eq!(FilterKind::parse(""), None);
        assert_eq!(FilterKind::parse("polaroid"), Some(FilterKind::Polaroid));
        assert_eq!(CaptureMode::parse("timelapse"), None);
    }

    #[test]
    fn every_filter_name_round_trips() {
        for filter in FilterKind::ALL {
            assert_eq!(FilterKind::parse(filter.as_str()), Some(filter));
        }
    }

    #[test]
    fn class_predicates() {
        assert!(FilterKind::Noir.is_monochrome());
        assert!(FilterKind::Bw.is_monochrome());
        assert!(!FilterKind::Retro.is_monochrome());
        assert!(FilterKind::Polaroid.border().is_some());
        assert!(FilterKind::Glitch.border().is_none());
    }

    #[test]
    fn state_starts_at_defaults() {
        let state = BoothState::new();
        assert_eq!(
            state.snapshot(),
            StateSnapshot {
                filter: FilterKind::None,
                mode: CaptureMode::Single
            }
        );
    }

    #[test]
    fn named_writes_validate() {
        let state = BoothState::new();
        assert_eq!(state.set_filter_named("dreamy"), Ok(FilterKind::Dreamy));
        assert!(state.set_filter_named("sparkle").is_err());
        assert_eq!(state.filter(), FilterKind::Dreamy);
        assert!(state.set_mode_named("burst").is_ok());
        assert!(state.set_mode_named("panorama").is_err());
        assert_eq!(state.mode(), CaptureMode::Burst);
    }

    #[test]
    fn writes_visible_across_threads() {
        let state = Arc::new(BoothState::new());
        let writer = Arc::clone(&state);
        std::thread::spawn(move || {
            writer.set_filter(FilterKind::Cartoon);
            writer.set_mode(CaptureMode::Gif);
        })
        .join()
        .unwrap();
        assert_eq!(state.filter(), FilterKind::Cartoon);
        assert_eq!(state.mode(), CaptureMode::Gif);
    }

    #[test]
    fn serializes_uppercase() {
        let json = serde_json::to_string(&FilterKind::Bw).unwrap();
        assert_eq!(json, "\"BW\"");
    }
}
